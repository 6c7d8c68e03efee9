//! (n, k) Reed-Solomon stripe codec.
//!
//! A stripe of `k * shard_size` bytes splits into k data shards; encoding
//! fills the n − k parity shards. Any k of the n shards reconstruct the
//! stripe. Shard order is the shard index and must be preserved end to end —
//! the i-th chunk recorded in a stripe's manifest is shard i.

use reed_solomon_erasure::galois_8::ReedSolomon;
use thiserror::Error;

/// Default (n, k) = (6, 3): three data shards, three parity shards.
pub const DEFAULT_TOTAL_SHARDS: usize = 6;
pub const DEFAULT_DATA_SHARDS: usize = 3;
/// Default shard payload size; a stripe is `data_shards * shard_size` bytes.
pub const DEFAULT_SHARD_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid codec parameters (n={total}, k={data}): need n > k >= 1, n <= 256")]
    BadParameters { total: usize, data: usize },
    #[error("stripe length {len} is not divisible by {data} data shards")]
    UnalignedStripe { len: usize, data: usize },
    #[error("expected {expected} shards, got {got}")]
    WrongShardCount { expected: usize, got: usize },
    #[error("only {present} of {needed} shards present")]
    InsufficientShards { present: usize, needed: usize },
    #[error("reed-solomon failure: {0}")]
    ReedSolomon(reed_solomon_erasure::Error),
}

/// Stateless (n, k) codec. Instances are cheap to clone; the Reed-Solomon
/// coder itself is built per operation, matching the symmetric encode /
/// reconstruct call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeCodec {
    total_shards: usize,
    data_shards: usize,
}

impl Default for StripeCodec {
    fn default() -> Self {
        Self {
            total_shards: DEFAULT_TOTAL_SHARDS,
            data_shards: DEFAULT_DATA_SHARDS,
        }
    }
}

impl StripeCodec {
    pub fn new(total_shards: usize, data_shards: usize) -> Result<Self, CodecError> {
        // galois_8 supports at most 256 shards in total.
        if data_shards == 0 || total_shards <= data_shards || total_shards > 256 {
            return Err(CodecError::BadParameters {
                total: total_shards,
                data: data_shards,
            });
        }
        Ok(Self {
            total_shards,
            data_shards,
        })
    }

    pub fn total_shards(&self) -> usize {
        self.total_shards
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.total_shards - self.data_shards
    }

    /// Stripe size for a given shard payload size.
    pub fn stripe_size(&self, shard_size: usize) -> usize {
        self.data_shards * shard_size
    }

    fn coder(&self) -> Result<ReedSolomon, CodecError> {
        ReedSolomon::new(self.data_shards, self.parity_shards())
            .map_err(CodecError::ReedSolomon)
    }

    /// Split a stripe into k data shards plus zeroed parity shards.
    /// The stripe length must be divisible by k; callers zero-pad upstream.
    pub fn split(&self, stripe: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
        if stripe.is_empty() || stripe.len() % self.data_shards != 0 {
            return Err(CodecError::UnalignedStripe {
                len: stripe.len(),
                data: self.data_shards,
            });
        }
        let shard_len = stripe.len() / self.data_shards;
        let mut shards: Vec<Vec<u8>> = stripe
            .chunks(shard_len)
            .map(|chunk| chunk.to_vec())
            .collect();
        shards.resize(self.total_shards, vec![0u8; shard_len]);
        Ok(shards)
    }

    /// Fill the parity shards in place.
    pub fn encode(&self, shards: &mut [Vec<u8>]) -> Result<(), CodecError> {
        if shards.len() != self.total_shards {
            return Err(CodecError::WrongShardCount {
                expected: self.total_shards,
                got: shards.len(),
            });
        }
        self.coder()?.encode(shards).map_err(CodecError::ReedSolomon)
    }

    /// Split and encode in one step: stripe bytes in, n ordered shards out.
    pub fn encode_stripe(&self, stripe: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
        let mut shards = self.split(stripe)?;
        self.encode(&mut shards)?;
        Ok(shards)
    }

    /// Rebuild the missing shards from any k present ones.
    pub fn reconstruct(&self, shards: &mut Vec<Option<Vec<u8>>>) -> Result<(), CodecError> {
        if shards.len() != self.total_shards {
            return Err(CodecError::WrongShardCount {
                expected: self.total_shards,
                got: shards.len(),
            });
        }
        let present = shards.iter().filter(|s| s.is_some()).count();
        if present < self.data_shards {
            return Err(CodecError::InsufficientShards {
                present,
                needed: self.data_shards,
            });
        }
        self.coder()?
            .reconstruct(shards)
            .map_err(CodecError::ReedSolomon)
    }

    /// Concatenate the k data shards and truncate to the stripe's original
    /// (pre-padding) length. All data shards must be present; callers run
    /// [`StripeCodec::reconstruct`] first.
    pub fn join(
        &self,
        shards: &[Option<Vec<u8>>],
        original_len: usize,
    ) -> Result<Vec<u8>, CodecError> {
        if shards.len() != self.total_shards {
            return Err(CodecError::WrongShardCount {
                expected: self.total_shards,
                got: shards.len(),
            });
        }
        let mut out = Vec::with_capacity(original_len);
        for shard in shards.iter().take(self.data_shards) {
            let shard = shard.as_ref().ok_or(CodecError::InsufficientShards {
                present: shards
                    .iter()
                    .take(self.data_shards)
                    .filter(|s| s.is_some())
                    .count(),
                needed: self.data_shards,
            })?;
            out.extend_from_slice(shard);
        }
        out.truncate(original_len);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stripe(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(StripeCodec::new(3, 3).is_err());
        assert!(StripeCodec::new(2, 0).is_err());
        assert!(StripeCodec::new(300, 100).is_err());
        assert!(StripeCodec::new(6, 3).is_ok());
        assert!(StripeCodec::new(2, 1).is_ok());
    }

    #[test]
    fn test_split_shapes() {
        let codec = StripeCodec::new(6, 3).unwrap();
        let shards = codec.split(&sample_stripe(12288)).unwrap();
        assert_eq!(shards.len(), 6);
        assert!(shards.iter().all(|s| s.len() == 4096));
        // Data shards carry the stripe bytes in order.
        assert_eq!(shards[0], sample_stripe(12288)[..4096].to_vec());
        assert_eq!(shards[2], sample_stripe(12288)[8192..].to_vec());
    }

    #[test]
    fn test_split_rejects_unaligned() {
        let codec = StripeCodec::new(6, 3).unwrap();
        assert!(matches!(
            codec.split(&sample_stripe(12289)),
            Err(CodecError::UnalignedStripe { .. })
        ));
        assert!(codec.split(&[]).is_err());
    }

    #[test]
    fn test_round_trip_all_shards() {
        let codec = StripeCodec::new(6, 3).unwrap();
        let stripe = sample_stripe(12288);
        let shards = codec.encode_stripe(&stripe).unwrap();
        let mut opts: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        codec.reconstruct(&mut opts).unwrap();
        assert_eq!(codec.join(&opts, 12288).unwrap(), stripe);
    }

    #[test]
    fn test_round_trip_with_any_parity_loss() {
        let codec = StripeCodec::new(6, 3).unwrap();
        let stripe = sample_stripe(12288);
        let shards = codec.encode_stripe(&stripe).unwrap();

        // Withhold every (n - k)-sized subset boundary case: drop all data
        // shards, drop all parity shards, drop a mix.
        for withheld in [[0usize, 1, 2], [3, 4, 5], [0, 2, 4]] {
            let mut opts: Vec<Option<Vec<u8>>> =
                shards.iter().cloned().map(Some).collect();
            for idx in withheld {
                opts[idx] = None;
            }
            codec.reconstruct(&mut opts).unwrap();
            assert_eq!(codec.join(&opts, 12288).unwrap(), stripe, "withheld {withheld:?}");
        }
    }

    #[test]
    fn test_join_truncates_padding() {
        let codec = StripeCodec::new(6, 3).unwrap();
        let mut stripe = b"hello world".to_vec();
        stripe.resize(12288, 0);
        let shards = codec.encode_stripe(&stripe).unwrap();
        let opts: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        assert_eq!(codec.join(&opts, 11).unwrap(), b"hello world");
    }

    #[test]
    fn test_insufficient_shards() {
        let codec = StripeCodec::new(6, 3).unwrap();
        let shards = codec.encode_stripe(&sample_stripe(12288)).unwrap();
        let mut opts: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        opts[0] = None;
        opts[2] = None;
        opts[3] = None;
        opts[5] = None;
        assert!(matches!(
            codec.reconstruct(&mut opts),
            Err(CodecError::InsufficientShards {
                present: 2,
                needed: 3
            })
        ));
    }

    #[test]
    fn test_other_geometries() {
        for (n, k) in [(2, 1), (4, 2), (9, 6)] {
            let codec = StripeCodec::new(n, k).unwrap();
            let stripe = sample_stripe(k * 64);
            let shards = codec.encode_stripe(&stripe).unwrap();
            let mut opts: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
            // Withhold the maximum tolerable count, preferring data shards.
            for idx in 0..(n - k) {
                opts[idx] = None;
            }
            codec.reconstruct(&mut opts).unwrap();
            assert_eq!(codec.join(&opts, stripe.len()).unwrap(), stripe, "(n,k)=({n},{k})");
        }
    }
}
