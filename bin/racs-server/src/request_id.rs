//! Synthesizes `x-amz-request-id` / `x-amz-id-2` the way S3 does:
//! well-formed, but arbitrary (§6).

use rand::Rng;

const BASE62: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub struct RequestId {
    /// 16 hex characters.
    pub request_id: String,
    /// 64 base62 characters.
    pub id2: String,
}

impl RequestId {
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let request_id = (0..16).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect();
        let id2 = (0..64)
            .map(|_| BASE62[rng.gen_range(0..BASE62.len())] as char)
            .collect();
        Self { request_id, id2 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_the_documented_lengths() {
        let id = RequestId::generate();
        assert_eq!(id.request_id.len(), 16);
        assert_eq!(id.id2.len(), 64);
        assert!(id.request_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(id.id2.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
