//! Routing records to output partitions.
//!
//! [`HashPartitioner`] spreads records by a hash of their encoding. A
//! [`range::RangePartitioner`] keeps keys ordered across partitions: split points are
//! sampled from the inputs ([`split_points`]) and looked up through a
//! [`trie::PartitionTrie`].

use std::marker::PhantomData;

use crate::codec::BinaryRecord;
use crate::error::{Result, ShuffleError};

pub mod range;
pub mod split_points;
pub mod trie;

/// Assigns each record an output partition in `0..partition_count`.
pub trait Partitioner<T>: Send + Sync {
    fn partition_for(&self, record: &T, partition_count: u32) -> Result<u32>;
}

/// A record type with a byte-string key that orders it for range partitioning.
///
/// The record's encoding must start with these bytes, so that comparing encoded
/// records by prefix agrees with comparing keys.
pub trait PartitionKey {
    fn key_bytes(&self) -> &[u8];
}

/// Partitions by FNV-1a hash of the encoded record.
pub struct HashPartitioner<T> {
    _marker: PhantomData<fn(&T)>,
}

impl<T> HashPartitioner<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for HashPartitioner<T> {
    fn default() -> Self {
        Self::new()
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

impl<T: BinaryRecord> Partitioner<T> for HashPartitioner<T> {
    fn partition_for(&self, record: &T, partition_count: u32) -> Result<u32> {
        if partition_count == 0 {
            return Err(ShuffleError::invalid_argument(
                "partition_count",
                "must be at least 1",
            ));
        }
        let hash = fnv1a(&record.to_bytes()?);
        Ok((hash % u64::from(partition_count)) as u32)
    }
}
