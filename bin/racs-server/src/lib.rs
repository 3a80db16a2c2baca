//! RACS: a proxy exposing a subset of the S3 HTTP API while striping
//! objects across N heterogeneous backend repositories via erasure
//! coding (§1, §2).
//!
//! Split into a library and a thin binary so the HTTP surface can be
//! driven directly in integration tests (`tests/`) without spawning a
//! real listener, matching this workspace's own gateway crate layout.

pub mod cli;
pub mod features;
pub mod handlers;
pub mod metrics;
pub mod request_id;
pub mod router;
pub mod state;
pub mod xml;
