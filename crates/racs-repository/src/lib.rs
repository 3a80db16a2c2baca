//! Storage backend abstraction: the `Repository` trait, its adapters
//! (filesystem, S3, Cloud Files), and the key-quoting and listing
//! helpers they share (§4.1).

pub mod adapters;
pub mod factory;
pub mod listing;
pub mod quoting;
pub mod repository;

pub use factory::build_repository;
pub use repository::{BucketListing, ObjectMetaData, RepoAttrs, Repository};
