//! Dedicated raw comparators for the built-in encodings.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::codec::Decimal;
use crate::codec::builtin::TICKS_MASK;
use crate::codec::varint::decode_varint;
use crate::compare::{RawComparator, SortableRecord};
use crate::error::{Result, ShuffleError};
use crate::partition::PartitionKey;

fn short_operand(len: usize, what: &str) -> ShuffleError {
    ShuffleError::format(format!("{len}-byte operand is too short for {what}"))
}

/// Fixed-width little-endian number.
pub trait LeScalar: Copy + Send + Sync + 'static {
    const WIDTH: usize;

    /// `bytes` is exactly `WIDTH` long.
    fn from_le_slice(bytes: &[u8]) -> Self;

    fn order(&self, other: &Self) -> Ordering;
}

macro_rules! le_scalar {
    ($($ty:ty => $cmp:ident),* $(,)?) => {$(
        impl LeScalar for $ty {
            const WIDTH: usize = size_of::<$ty>();

            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_le_bytes(buf)
            }

            fn order(&self, other: &Self) -> Ordering {
                self.$cmp(other)
            }
        }
    )*};
}

le_scalar!(
    i8 => cmp,
    u8 => cmp,
    i16 => cmp,
    u16 => cmp,
    i32 => cmp,
    u32 => cmp,
    i64 => cmp,
    u64 => cmp,
    i128 => cmp,
    f32 => total_cmp,
    f64 => total_cmp,
);

/// Compares fixed-width integers and floats. Floats use IEEE total order.
pub struct ScalarComparator<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: LeScalar> ScalarComparator<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    fn operand(bytes: &[u8]) -> Result<T> {
        bytes
            .get(..T::WIDTH)
            .map(T::from_le_slice)
            .ok_or_else(|| short_operand(bytes.len(), std::any::type_name::<T>()))
    }
}

impl<T: LeScalar> Default for ScalarComparator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: LeScalar> RawComparator<T> for ScalarComparator<T> {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        Ok(Self::operand(a)?.order(&Self::operand(b)?))
    }

    fn compare(&self, a: &T, b: &T) -> Ordering {
        a.order(b)
    }
}

#[derive(Default)]
pub struct BoolComparator;

impl RawComparator<bool> for BoolComparator {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        match (a.first(), b.first()) {
            (Some(x), Some(y)) => Ok(x.cmp(y)),
            (None, _) => Err(short_operand(0, "bool")),
            (_, None) => Err(short_operand(0, "bool")),
        }
    }

    fn compare(&self, a: &bool, b: &bool) -> Ordering {
        a.cmp(b)
    }
}

/// Compares 7-bit length-prefixed byte strings: only the length header is decoded,
/// the payloads are compared byte-wise and the shorter one wins a tie.
pub struct LengthPrefixedComparator<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> LengthPrefixedComparator<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for LengthPrefixedComparator<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn length_prefixed_payload(bytes: &[u8]) -> Result<&[u8]> {
    let (len, header) = decode_varint(bytes)?;
    header
        .checked_add(len as usize)
        .and_then(|end| bytes.get(header..end))
        .ok_or_else(|| {
            ShuffleError::format(format!(
                "length header announces {len} bytes but only {} follow",
                bytes.len() - header
            ))
        })
}

impl<T: AsRef<[u8]>> RawComparator<T> for LengthPrefixedComparator<T> {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        Ok(length_prefixed_payload(a)?.cmp(length_prefixed_payload(b)?))
    }

    fn compare(&self, a: &T, b: &T) -> Ordering {
        a.as_ref().cmp(b.as_ref())
    }
}

/// Date/time values as 100ns ticks; finer precision is not part of the encoding.
pub trait Ticks {
    fn ticks(&self) -> i128;
}

impl Ticks for DateTime<Utc> {
    fn ticks(&self) -> i128 {
        i128::from(self.timestamp()) * 10_000_000 + i128::from(self.timestamp_subsec_nanos() / 100)
    }
}

impl Ticks for NaiveDateTime {
    fn ticks(&self) -> i128 {
        self.and_utc().ticks()
    }
}

pub struct DateTimeComparator<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> DateTimeComparator<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    fn operand(bytes: &[u8]) -> Result<u64> {
        let raw = bytes
            .get(..8)
            .ok_or_else(|| short_operand(bytes.len(), "a date/time"))?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf) & TICKS_MASK)
    }
}

impl<T> Default for DateTimeComparator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ticks> RawComparator<T> for DateTimeComparator<T> {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        Ok(Self::operand(a)?.cmp(&Self::operand(b)?))
    }

    fn compare(&self, a: &T, b: &T) -> Ordering {
        a.ticks().cmp(&b.ticks())
    }
}

/// Compares the first `width` bytes of records whose encoding starts with their key.
#[derive(Debug, Clone, Copy)]
pub struct FixedBytesComparator {
    width: usize,
}

impl FixedBytesComparator {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    fn prefix<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[..bytes.len().min(self.width)]
    }
}

impl<T: PartitionKey> RawComparator<T> for FixedBytesComparator {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        if a.len() < self.width || b.len() < self.width {
            return Err(short_operand(a.len().min(b.len()), "a fixed-width key"));
        }
        Ok(a[..self.width].cmp(&b[..self.width]))
    }

    fn compare(&self, a: &T, b: &T) -> Ordering {
        self.prefix(a.key_bytes()).cmp(self.prefix(b.key_bytes()))
    }
}

macro_rules! sortable_with {
    ($($ty:ty => $cmp:expr),* $(,)?) => {$(
        impl SortableRecord for $ty {
            fn raw_comparator() -> Option<Arc<dyn RawComparator<Self>>> {
                Some(Arc::new($cmp))
            }
        }
    )*};
}

sortable_with!(
    i8 => ScalarComparator::<i8>::new(),
    u8 => ScalarComparator::<u8>::new(),
    i16 => ScalarComparator::<i16>::new(),
    u16 => ScalarComparator::<u16>::new(),
    i32 => ScalarComparator::<i32>::new(),
    u32 => ScalarComparator::<u32>::new(),
    i64 => ScalarComparator::<i64>::new(),
    u64 => ScalarComparator::<u64>::new(),
    i128 => ScalarComparator::<i128>::new(),
    bool => BoolComparator,
    String => LengthPrefixedComparator::<String>::new(),
    Bytes => LengthPrefixedComparator::<Bytes>::new(),
    DateTime<Utc> => DateTimeComparator::<DateTime<Utc>>::new(),
    NaiveDateTime => DateTimeComparator::<NaiveDateTime>::new(),
);

// Scales differ between equal values, so decimals are compared decoded.
impl SortableRecord for Decimal {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BinaryRecord;
    use crate::compare::default_comparator;
    use rand::Rng;
    use rand::distr::{Alphanumeric, SampleString};

    fn check_consistency<T>(pairs: impl IntoIterator<Item = (T, T)>)
    where
        T: SortableRecord + std::fmt::Debug,
    {
        let cmp = default_comparator::<T>();
        for (a, b) in pairs {
            let ea = a.to_bytes().unwrap();
            let eb = b.to_bytes().unwrap();
            assert_eq!(
                cmp.compare_raw(&ea, &eb).unwrap(),
                cmp.compare(&a, &b),
                "{a:?} vs {b:?}"
            );
        }
    }

    #[test]
    fn test_integer_consistency() {
        let mut rng = rand::rng();
        check_consistency((0..500).map(|_| (rng.random::<i32>(), rng.random::<i32>())));
        check_consistency((0..500).map(|_| (rng.random::<i64>(), rng.random::<i64>())));
        check_consistency((0..500).map(|_| (rng.random::<u16>(), rng.random::<u16>())));
        check_consistency((0..500).map(|_| (rng.random::<i8>(), rng.random::<i8>())));
        check_consistency([(-1i64, 1i64), (i64::MIN, i64::MAX), (0, 0), (256, 1)]);
    }

    #[test]
    fn test_string_consistency() {
        let mut rng = rand::rng();
        let pairs: Vec<(String, String)> = (0..500)
            .map(|_| {
                let la = rng.random_range(0..6);
                let lb = rng.random_range(0..6);
                (
                    Alphanumeric.sample_string(&mut rng, la),
                    Alphanumeric.sample_string(&mut rng, lb),
                )
            })
            .collect();
        check_consistency(pairs);
        check_consistency([
            ("ab".to_string(), "abc".to_string()),
            ("b".to_string(), "abc".to_string()),
            (String::new(), String::new()),
            ("é".to_string(), "z".to_string()),
        ]);
    }

    #[test]
    fn test_bytes_and_bool_consistency() {
        check_consistency([
            (Bytes::from_static(b"\x00\xff"), Bytes::from_static(b"\x01")),
            (Bytes::from_static(b""), Bytes::from_static(b"\x00")),
            (Bytes::from(vec![7u8; 200]), Bytes::from(vec![7u8; 199])),
        ]);
        check_consistency([(false, true), (true, true), (true, false)]);
    }

    #[test]
    fn test_date_time_consistency() {
        let mut rng = rand::rng();
        let pairs: Vec<_> = (0..200)
            .map(|_| {
                let a = DateTime::from_timestamp(rng.random_range(-1_000_000_000..2_000_000_000), 0)
                    .unwrap();
                let b = DateTime::from_timestamp(rng.random_range(-1_000_000_000..2_000_000_000), 0)
                    .unwrap();
                (a, b)
            })
            .collect();
        check_consistency(pairs.clone());
        check_consistency(pairs.into_iter().map(|(a, b)| (a.naive_utc(), b.naive_utc())));
    }

    #[test]
    fn test_decimal_compares_by_value() {
        let one = Decimal::new(10, 1).unwrap();
        let one_again = Decimal::new(100, 2).unwrap();
        let half = Decimal::new(5, 1).unwrap();
        check_consistency([(one, one_again), (half, one), (one, half)]);
    }

    #[test]
    fn test_floats_use_total_order() {
        let cmp = ScalarComparator::<f64>::new();
        let nan = f64::NAN.to_bytes().unwrap();
        let inf = f64::INFINITY.to_bytes().unwrap();
        assert_eq!(cmp.compare_raw(&inf, &nan).unwrap(), Ordering::Less);
        assert_eq!(cmp.compare(&-0.0, &0.0), Ordering::Less);
    }

    #[test]
    fn test_length_prefix_past_end_is_format_error() {
        let cmp = LengthPrefixedComparator::<String>::new();
        assert!(cmp.compare_raw(&[5, b'a'], &[0]).unwrap_err().is_format());
    }

    #[test]
    fn test_short_scalar_operand_is_format_error() {
        let cmp = ScalarComparator::<u32>::new();
        assert!(cmp.compare_raw(&[1, 2], &[0, 0, 0, 0]).unwrap_err().is_format());
    }
}
