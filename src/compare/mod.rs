//! Comparators over serialized records.
//!
//! A [`RawComparator`] orders two encoded records without decoding them where the
//! encoding allows it. Each raw operand starts with exactly one encoded value; bytes
//! after it are ignored, which is what lets a key comparator order whole key/value
//! records. Raw and value comparisons always agree in sign.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::RawRecordView;
use crate::codec::{BinaryRecord, CodecKind, CodecRegistry, ValueCodec};
use crate::error::Result;

pub mod builtin;
pub mod pair;

pub use builtin::{
    BoolComparator, DateTimeComparator, FixedBytesComparator, LengthPrefixedComparator,
    ScalarComparator,
};
pub use pair::{Pair, PairKeyComparator};

/// Orders records of type `T`, either encoded or decoded.
pub trait RawComparator<T>: Send + Sync {
    /// Compare two encoded records. Fails only when an operand is not a valid encoding.
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Result<Ordering>;

    fn compare(&self, a: &T, b: &T) -> Ordering;

    fn compare_views(&self, a: RawRecordView<'_>, b: RawRecordView<'_>) -> Result<Ordering> {
        self.compare_raw(a.bytes(), b.bytes())
    }
}

impl<T, C: RawComparator<T> + ?Sized> RawComparator<T> for Arc<C> {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        (**self).compare_raw(a, b)
    }

    fn compare(&self, a: &T, b: &T) -> Ordering {
        (**self).compare(a, b)
    }
}

/// A record type with a natural sort order.
///
/// Types whose encoding can be ordered byte-wise return a dedicated comparator from
/// [`SortableRecord::raw_comparator`]; all others are compared by decoding.
pub trait SortableRecord: BinaryRecord + Ord + Default {
    fn raw_comparator() -> Option<Arc<dyn RawComparator<Self>>> {
        None
    }
}

/// The comparator sorts and merges use for `T` unless told otherwise.
///
/// A dedicated comparator only understands `T`'s own encoding, so a type with an
/// external codec in the global registry is always compared by decoding.
pub fn default_comparator<T: SortableRecord>() -> Arc<dyn RawComparator<T>> {
    if CodecRegistry::global().kind_of::<T>() == CodecKind::External {
        return Arc::new(DeserializingComparator::<T>::new());
    }
    T::raw_comparator().unwrap_or_else(|| Arc::new(DeserializingComparator::<T>::new()))
}

/// Decodes both operands, then compares values.
///
/// Decoding goes through one pair of scratch records that is overwritten on every
/// comparison, so comparing allocates only what the codec's in-place read allocates.
pub struct DeserializingComparator<T> {
    codec: Arc<dyn ValueCodec<T>>,
    scratch: Mutex<(T, T)>,
}

impl<T: BinaryRecord + Default> DeserializingComparator<T> {
    pub fn new() -> Self {
        Self::with_codec(CodecRegistry::global().resolve::<T>())
    }
}

impl<T: BinaryRecord + Default> Default for DeserializingComparator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default> DeserializingComparator<T> {
    pub fn with_codec(codec: Arc<dyn ValueCodec<T>>) -> Self {
        Self {
            codec,
            scratch: Mutex::new((T::default(), T::default())),
        }
    }
}

impl<T: Ord + Send> RawComparator<T> for DeserializingComparator<T> {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        let mut scratch = self.scratch.lock();
        let (left, right) = &mut *scratch;
        self.codec.read_into(left, &mut &a[..])?;
        self.codec.read_into(right, &mut &b[..])?;
        Ok((*left).cmp(&*right))
    }

    fn compare(&self, a: &T, b: &T) -> Ordering {
        a.cmp(b)
    }
}

/// Reverses another comparator.
pub struct InvertedComparator<C> {
    inner: C,
}

impl<C> InvertedComparator<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<T, C: RawComparator<T>> RawComparator<T> for InvertedComparator<C> {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        self.inner.compare_raw(b, a)
    }

    fn compare(&self, a: &T, b: &T) -> Ordering {
        self.inner.compare(b, a)
    }
}

/// Orders by an arbitrary value-level function, decoding every operand.
///
/// For sort orders other than the type's natural one, e.g. descending on one field.
pub struct ByKeyComparator<T, K, F> {
    codec: Arc<dyn ValueCodec<T>>,
    key: F,
    _marker: PhantomData<fn() -> K>,
}

impl<T: BinaryRecord, K: Ord, F: Fn(&T) -> K + Send + Sync> ByKeyComparator<T, K, F> {
    pub fn new(key: F) -> Self {
        Self {
            codec: CodecRegistry::global().resolve::<T>(),
            key,
            _marker: PhantomData,
        }
    }
}

impl<T, K, F> RawComparator<T> for ByKeyComparator<T, K, F>
where
    K: Ord,
    F: Fn(&T) -> K + Send + Sync,
{
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        let a = self.codec.read(&mut &a[..])?;
        let b = self.codec.read(&mut &b[..])?;
        Ok(self.compare(&a, &b))
    }

    fn compare(&self, a: &T, b: &T) -> Ordering {
        (self.key)(a).cmp(&(self.key)(b))
    }
}

impl<A: SortableRecord, B: SortableRecord> SortableRecord for (A, B) {}
impl<A: SortableRecord, B: SortableRecord, C: SortableRecord> SortableRecord for (A, B, C) {}
impl<A, B, C, D> SortableRecord for (A, B, C, D)
where
    A: SortableRecord,
    B: SortableRecord,
    C: SortableRecord,
    D: SortableRecord,
{
}
impl<T: SortableRecord> SortableRecord for Vec<T> {}
