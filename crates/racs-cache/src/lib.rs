//! Process-local HEAD-response cache (§4.5).

pub mod head_cache;

pub use head_cache::HeadCache;
