//! Key/value records ordered by key.

use std::cmp::Ordering;
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::codec::{BinaryRecord, CodecKind, decode_element, decode_element_into, encode_element};
use crate::compare::{RawComparator, SortableRecord, default_comparator};
use crate::error::Result;

/// A key and its payload, encoded as the key followed by the value.
///
/// Equality and ordering look at the key only: two pairs with the same key are
/// interchangeable as far as sorting and merging are concerned.
#[derive(Debug, Clone, Default)]
pub struct Pair<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Pair<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}

impl<K: Ord, V> PartialEq for Pair<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<K: Ord, V> Eq for Pair<K, V> {}

impl<K: Ord, V> PartialOrd for Pair<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, V> Ord for Pair<K, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl<K: BinaryRecord, V: BinaryRecord> BinaryRecord for Pair<K, V> {
    const KIND: CodecKind = CodecKind::BuiltIn;

    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        encode_element(&self.key, writer)?;
        encode_element(&self.value, writer)
    }

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let key = decode_element::<K, R>(reader)?;
        let value = decode_element::<V, R>(reader)?;
        Ok(Self { key, value })
    }

    fn decode_into<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
        decode_element_into(&mut self.key, reader)?;
        decode_element_into(&mut self.value, reader)
    }
}

/// Orders pairs by their keys alone, with the key type's own comparator.
///
/// The encoded key comes first in a pair and raw comparators ignore trailing bytes,
/// so the value bytes are never looked at.
pub struct PairKeyComparator<K, V> {
    key: Arc<dyn RawComparator<K>>,
    _marker: PhantomData<fn() -> V>,
}

impl<K, V> PairKeyComparator<K, V> {
    pub fn new(key: Arc<dyn RawComparator<K>>) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }
}

impl<K, V> RawComparator<Pair<K, V>> for PairKeyComparator<K, V> {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        self.key.compare_raw(a, b)
    }

    fn compare(&self, a: &Pair<K, V>, b: &Pair<K, V>) -> Ordering {
        self.key.compare(&a.key, &b.key)
    }
}

impl<K, V> SortableRecord for Pair<K, V>
where
    K: SortableRecord,
    V: BinaryRecord + Default,
{
    fn raw_comparator() -> Option<Arc<dyn RawComparator<Self>>> {
        Some(Arc::new(PairKeyComparator::<K, V>::new(default_comparator::<K>())))
    }
}
