//! Reed-Solomon (k,m) codec bound to [`FecMeta`] (§4.2).
//!
//! RACS needs only the MDS case: a flat set of m shares, any k of
//! which reconstruct the object. There is no local-parity grouping
//! and no platform-specific backend selection here, unlike the
//! broader erasure-coding needs of a sharded block store.

use md5::{Digest, Md5};
use reed_solomon_simd::{ReedSolomonDecoder, ReedSolomonEncoder};
use thiserror::Error;

use crate::fec::FecMeta;

#[derive(Debug, Error)]
pub enum ErasureError {
    #[error("invalid erasure configuration: {0}")]
    InvalidConfig(String),

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("decoding failed: {0}")]
    DecodingFailed(String),

    #[error("insufficient shares: have {available}, need {required}")]
    InsufficientShares { available: usize, required: usize },

    #[error("decoded payload does not match FECMeta: expected md5 {expected}, got {actual}")]
    VerifyFailed { expected: String, actual: String },
}

impl From<ErasureError> for racs_common::RacsError {
    fn from(e: ErasureError) -> Self {
        match e {
            ErasureError::VerifyFailed { .. } => {
                racs_common::RacsError::DecodeVerifyFailed(e.to_string())
            }
            other => racs_common::RacsError::ErasureCoding(other.to_string()),
        }
    }
}

/// Wraps a (k,m) Reed-Solomon encoder/decoder pair for one set of
/// parameters. Cheap to construct; holds no state beyond k and m.
pub struct ErasureCodec {
    k: u8,
    m: u8,
}

impl ErasureCodec {
    pub fn new(k: u8, m: u8) -> Result<Self, ErasureError> {
        if k == 0 {
            return Err(ErasureError::InvalidConfig("k must be >= 1".into()));
        }
        if k > m {
            return Err(ErasureError::InvalidConfig(format!("k ({k}) must be <= m ({m})")));
        }
        if usize::from(m) > 255 {
            return Err(ErasureError::InvalidConfig("m must be <= 255".into()));
        }
        Ok(Self { k, m })
    }

    #[must_use]
    pub const fn k(&self) -> u8 {
        self.k
    }

    #[must_use]
    pub const fn m(&self) -> u8 {
        self.m
    }

    /// Encode `data` into m shares plus the FECMeta binding them.
    pub fn encode(&self, data: &[u8]) -> Result<(Vec<Vec<u8>>, FecMeta), ErasureError> {
        let k = usize::from(self.k);
        let parity = usize::from(self.m - self.k);

        let mut hasher = Md5::new();
        hasher.update(data);
        let md5_hex = hex::encode(hasher.finalize());

        let shard_size = data.len().div_ceil(k).max(64);
        let mut padded = vec![0u8; shard_size * k];
        padded[..data.len()].copy_from_slice(data);

        let data_shards: Vec<&[u8]> = (0..k).map(|i| &padded[i * shard_size..(i + 1) * shard_size]).collect();

        let mut shares: Vec<Vec<u8>> = Vec::with_capacity(k + parity);
        shares.extend(data_shards.iter().map(|s| s.to_vec()));

        if parity > 0 {
            let mut encoder = ReedSolomonEncoder::new(k, parity, shard_size)
                .map_err(|e| ErasureError::InvalidConfig(e.to_string()))?;
            for shard in &data_shards {
                encoder
                    .add_original_shard(shard)
                    .map_err(|e| ErasureError::EncodingFailed(e.to_string()))?;
            }
            let result = encoder
                .encode()
                .map_err(|e| ErasureError::EncodingFailed(e.to_string()))?;
            shares.extend(result.recovery_iter().map(<[u8]>::to_vec));
        }

        let fecmeta = FecMeta::new(data.len() as u64, md5_hex, self.k, self.m);
        Ok((shares, fecmeta))
    }

    /// Reconstruct the payload from any k of the m shares and verify
    /// it against `fecmeta`.
    pub fn decode(
        &self,
        shares: &mut [Option<Vec<u8>>],
        fecmeta: &FecMeta,
    ) -> Result<Vec<u8>, ErasureError> {
        let k = usize::from(self.k);
        let parity = usize::from(self.m - self.k);

        let available = shares.iter().filter(|s| s.is_some()).count();
        if available < k {
            return Err(ErasureError::InsufficientShares {
                available,
                required: k,
            });
        }

        let shard_size = shares
            .iter()
            .find_map(|s| s.as_ref().map(Vec::len))
            .ok_or(ErasureError::InsufficientShares {
                available: 0,
                required: k,
            })?;

        let data_shards: Vec<Vec<u8>> = if shares[..k].iter().all(Option::is_some) {
            shares[..k]
                .iter()
                .map(|s| s.clone().expect("checked all-some above"))
                .collect()
        } else {
            if parity == 0 {
                return Err(ErasureError::InsufficientShares {
                    available,
                    required: k,
                });
            }
            let mut decoder = ReedSolomonDecoder::new(k, parity, shard_size)
                .map_err(|e| ErasureError::InvalidConfig(e.to_string()))?;

            for (i, shard) in shares.iter().enumerate().take(k) {
                if let Some(data) = shard {
                    decoder
                        .add_original_shard(i, data.as_slice())
                        .map_err(|e| ErasureError::DecodingFailed(e.to_string()))?;
                }
            }
            for i in 0..parity {
                if let Some(data) = &shares[k + i] {
                    decoder
                        .add_recovery_shard(i, data.as_slice())
                        .map_err(|e| ErasureError::DecodingFailed(e.to_string()))?;
                }
            }

            let result = decoder
                .decode()
                .map_err(|e| ErasureError::DecodingFailed(e.to_string()))?;

            (0..k)
                .map(|i| {
                    if let Some(data) = &shares[i] {
                        Ok(data.clone())
                    } else if let Some(restored) = result.restored_original(i) {
                        Ok(restored.to_vec())
                    } else {
                        Err(ErasureError::DecodingFailed(format!(
                            "failed to restore data shard {i}"
                        )))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut output = Vec::with_capacity(k * shard_size);
        for shard in &data_shards {
            output.extend_from_slice(shard);
        }
        output.truncate(fecmeta.size as usize);

        let mut hasher = Md5::new();
        hasher.update(&output);
        let actual_md5 = hex::encode(hasher.finalize());
        if actual_md5 != fecmeta.md5_hex {
            return Err(ErasureError::VerifyFailed {
                expected: fecmeta.md5_hex.clone(),
                actual: actual_md5,
            });
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_shares_present() {
        let codec = ErasureCodec::new(4, 6).unwrap();
        let data = b"the quick brown fox jumps over the lazy dog, repeated for padding";
        let (shares, fecmeta) = codec.encode(data).unwrap();
        assert_eq!(shares.len(), 6);

        let mut opts: Vec<Option<Vec<u8>>> = shares.into_iter().map(Some).collect();
        let decoded = codec.decode(&mut opts, &fecmeta).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn tolerates_m_minus_k_missing_shares() {
        let codec = ErasureCodec::new(2, 3).unwrap();
        let data = vec![7u8; 4096];
        let (shares, fecmeta) = codec.encode(&data).unwrap();

        let mut opts: Vec<Option<Vec<u8>>> = shares.into_iter().map(Some).collect();
        opts[0] = None;
        let decoded = codec.decode(&mut opts, &fecmeta).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn zero_byte_object_round_trips() {
        let codec = ErasureCodec::new(2, 3).unwrap();
        let (shares, fecmeta) = codec.encode(&[]).unwrap();
        let mut opts: Vec<Option<Vec<u8>>> = shares.into_iter().map(Some).collect();
        let decoded = codec.decode(&mut opts, &fecmeta).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn insufficient_shares_errors() {
        let codec = ErasureCodec::new(3, 4).unwrap();
        let data = vec![1u8; 128];
        let (shares, fecmeta) = codec.encode(&data).unwrap();
        let mut opts: Vec<Option<Vec<u8>>> = shares.into_iter().map(Some).collect();
        opts[0] = None;
        opts[1] = None;
        let result = codec.decode(&mut opts, &fecmeta);
        assert!(matches!(result, Err(ErasureError::InsufficientShares { .. })));
    }

    #[test]
    fn rejects_k_greater_than_m() {
        assert!(ErasureCodec::new(5, 3).is_err());
    }

    #[test]
    fn k_equals_m_has_no_parity() {
        let codec = ErasureCodec::new(3, 3).unwrap();
        let data = b"no parity shares, just a straight split";
        let (shares, fecmeta) = codec.encode(data).unwrap();
        assert_eq!(shares.len(), 3);
        let mut opts: Vec<Option<Vec<u8>>> = shares.into_iter().map(Some).collect();
        let decoded = codec.decode(&mut opts, &fecmeta).unwrap();
        assert_eq!(decoded, data);
    }
}
