//! Hashing and bucketing.
//!
//! Every SDK must map the same key to the same bucket, so both hash functions here have to be
//! bit-identical to the server and the other SDKs.
use std::io::Cursor;

use serde::{Deserialize, Serialize};

use crate::models::Partition;

/// Hash algorithm used by a flag. Serialized as its numeric wire id (`1` or `2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum HashAlgorithm {
    /// Additive 31-multiplier hash. Flags created before murmur was introduced.
    #[default]
    Legacy,
    /// MurmurHash3 x86 32-bit.
    Murmur,
}

impl TryFrom<u8> for HashAlgorithm {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(HashAlgorithm::Legacy),
            2 => Ok(HashAlgorithm::Murmur),
            other => Err(format!("unknown hash algorithm: {other}")),
        }
    }
}

impl From<HashAlgorithm> for u8 {
    fn from(value: HashAlgorithm) -> u8 {
        match value {
            HashAlgorithm::Legacy => 1,
            HashAlgorithm::Murmur => 2,
        }
    }
}

/// Hash `key` with `seed` under the given algorithm.
pub fn hash(key: &str, seed: i32, algorithm: HashAlgorithm) -> i32 {
    match algorithm {
        HashAlgorithm::Legacy => legacy_hash(key, seed),
        HashAlgorithm::Murmur => murmur3_32(key.as_bytes(), seed as u32) as i32,
    }
}

/// Bucket in `1..=100` for `key`.
pub fn bucket(key: &str, seed: i32, algorithm: HashAlgorithm) -> u8 {
    bucket_for_hash(hash(key, seed, algorithm))
}

fn bucket_for_hash(hash: i32) -> u8 {
    // i64 so that abs(i32::MIN) does not overflow.
    ((i64::from(hash).abs() % 100) + 1) as u8
}

/// Pick the treatment for `bucket` by walking `partitions` and accumulating their sizes.
///
/// Returns `None` if the partitions do not cover the bucket (including an empty list).
pub fn treatment_for_bucket(bucket: u8, partitions: &[Partition]) -> Option<&str> {
    let mut covered: u32 = 0;
    for partition in partitions {
        covered += u32::from(partition.size);
        if covered >= u32::from(bucket) {
            return Some(&partition.treatment);
        }
    }
    None
}

/// Legacy hash: `h = 31 * h + c` over the key's code points with 32-bit wraparound, XORed with
/// the seed.
fn legacy_hash(key: &str, seed: i32) -> i32 {
    let h = key
        .chars()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32));
    h ^ seed
}

/// MurmurHash3 x86 32-bit.
fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    // Reading from a slice cannot fail.
    murmur3::murmur3_32(&mut Cursor::new(data), seed).unwrap_or_default()
}
