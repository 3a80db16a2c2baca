//! FECMeta: the per-object binding stored as a custom-metadata header
//! on every share (§3, §4.2).

use racs_common::RacsError;

/// Header name every repository adapter stores FECMeta under. Always
/// written on PUT and always stripped before handing metadata back to
/// the client.
pub const FECMETA_HEADER: &str = "x-racs-fecmeta";

/// Original object size, full MD5, and the codec parameters needed to
/// pick the decode matrix. A share is not self-describing without it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FecMeta {
    pub size: u64,
    pub md5_hex: String,
    pub k: u8,
    pub m: u8,
}

impl FecMeta {
    #[must_use]
    pub fn new(size: u64, md5_hex: String, k: u8, m: u8) -> Self {
        Self { size, md5_hex, k, m }
    }

    /// Serialize to the compact `size:md5:k:m` wire form stored in the
    /// single reserved header value.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}:{}:{}:{}", self.size, self.md5_hex, self.k, self.m)
    }

    /// Parse the wire form produced by [`FecMeta::encode`].
    pub fn decode(s: &str) -> racs_common::Result<Self> {
        let mut parts = s.split(':');
        let size = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(|| RacsError::DecodeVerifyFailed("fecmeta: missing size".into()))?;
        let md5_hex = parts
            .next()
            .ok_or_else(|| RacsError::DecodeVerifyFailed("fecmeta: missing md5".into()))?
            .to_string();
        let k = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or_else(|| RacsError::DecodeVerifyFailed("fecmeta: missing k".into()))?;
        let m = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or_else(|| RacsError::DecodeVerifyFailed("fecmeta: missing m".into()))?;
        Ok(Self { size, md5_hex, k, m })
    }

    #[must_use]
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.md5_hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_wire_form() {
        let meta = FecMeta::new(42, "d41d8cd98f00b204e9800998ecf8427e".into(), 2, 3);
        let encoded = meta.encode();
        let decoded = FecMeta::decode(&encoded).unwrap();
        assert_eq!(meta, decoded);
    }

    #[test]
    fn etag_is_quoted() {
        let meta = FecMeta::new(0, "abc".into(), 1, 1);
        assert_eq!(meta.etag(), "\"abc\"");
    }
}
