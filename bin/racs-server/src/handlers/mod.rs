//! HTTP handlers for the S3 dialect subset (§4.6).

pub mod admin;
pub mod bucket;
pub mod object;
