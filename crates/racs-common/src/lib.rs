//! Shared types, configuration, and error kinds for the RACS proxy.

pub mod config;
pub mod error;
pub mod timefmt;
pub mod types;

pub use config::Config;
pub use error::{RacsError, Result};
pub use types::{BucketName, EcParams, ObjectKey, ReadPolicy, UserMetadata};
