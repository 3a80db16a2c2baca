//! Error types shared across the RACS proxy.
//!
//! This is the closed kind set every repository adapter, the erasure
//! codec, and the fan-out executor translate their own failures into
//! (§7 of the design). HTTP handlers never see adapter-native errors.

use thiserror::Error;

/// Common result type for RACS operations.
pub type Result<T> = std::result::Result<T, RacsError>;

/// Closed error kind set at the repository/core boundary.
#[derive(Debug, Error)]
pub enum RacsError {
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    #[error("not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("backend transient error: {0}")]
    BackendTransient(String),

    #[error("Content-MD5 mismatch")]
    Md5Mismatch,

    #[error("quorum unreachable ({successes}/{quorum} of {total})")]
    QuorumUnreachable {
        successes: usize,
        quorum: usize,
        total: usize,
    },

    #[error("share decode verification failed: {0}")]
    DecodeVerifyFailed(String),

    #[error("erasure coding error: {0}")]
    ErasureCoding(String),

    #[error("lock acquisition timed out after {0:?}")]
    LockTimeout(std::time::Duration),

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A request recognized the S3 feature it named (a header or query
    /// parameter RACS parses) but the feature itself is a declared
    /// non-goal (§1): ACL enforcement, server-side copy, multipart
    /// upload, request-payment, bucket location. Distinct from
    /// [`Self::NotImplemented`], which is for verbs RACS never parses
    /// at all (POST) and maps to 501.
    #[error("recognized but unimplemented feature: {0}")]
    FeatureUnimplemented(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RacsError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchBucket(_) | Self::NotFound { .. })
    }

    /// HTTP status code for S3 API compatibility.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::NoSuchBucket(_) | Self::NotFound { .. } => 404,
            Self::BucketNotEmpty(_) => 409,
            Self::Md5Mismatch | Self::InvalidRequest(_) => 400,
            Self::NotImplemented(_) => 501,
            Self::QuorumUnreachable { .. }
            | Self::DecodeVerifyFailed(_)
            | Self::ErasureCoding(_)
            | Self::Adapter(_)
            | Self::BackendTransient(_)
            | Self::Configuration(_)
            | Self::LockTimeout(_)
            | Self::FeatureUnimplemented(_)
            | Self::Io(_) => 500,
        }
    }

    /// S3 error code string used in the `<Error><Code>` XML element.
    #[must_use]
    pub fn s3_error_code(&self) -> &'static str {
        match self {
            Self::NoSuchBucket(_) => "NoSuchBucket",
            Self::NotFound { .. } => "NoSuchKey",
            Self::BucketNotEmpty(_) => "BucketNotEmpty",
            Self::Md5Mismatch => "BadDigest",
            Self::InvalidRequest(_) => "InvalidArgument",
            Self::NotImplemented(_) | Self::FeatureUnimplemented(_) => "NotImplemented",
            _ => "InternalError",
        }
    }
}
