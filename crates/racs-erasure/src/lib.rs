//! The (k,m) erasure codec and FECMeta binding (§4.2, §3).

pub mod codec;
pub mod fec;

pub use codec::{ErasureCodec, ErasureError};
pub use fec::{FecMeta, FECMETA_HEADER};
