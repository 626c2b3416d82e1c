//! Built-in codecs for scalars, strings, byte arrays, date/times, tuples and arrays.
//!
//! Fixed-width numbers are little-endian. Strings and byte arrays carry a 7-bit
//! encoded byte length; arrays carry a 7-bit encoded element count.

use std::cmp::Ordering;
use std::io::{Read, Write};

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::codec::varint::{read_varint, write_varint};
use crate::codec::{BinaryRecord, CodecKind, decode_element, decode_element_into, encode_element};
use crate::error::{Result, ShuffleError};

pub(crate) fn read_array<const N: usize, R: Read + ?Sized>(
    reader: &mut R,
    what: &str,
) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader
        .read_exact(&mut buf)
        .map_err(|e| ShuffleError::from_read(e, what))?;
    Ok(buf)
}

fn write_len<W: Write + ?Sized>(writer: &mut W, len: usize, what: &str) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| {
        ShuffleError::invalid_argument("length", format!("{what} of {len} elements is too long"))
    })?;
    write_varint(writer, len)?;
    Ok(())
}

/// Replace `buf` with the next `len` bytes of `reader`.
///
/// The buffer grows with the bytes actually read, so a corrupt length on a short
/// stream fails without allocating `len` bytes first.
pub(crate) fn read_len_bytes<R: Read + ?Sized>(
    reader: &mut R,
    len: usize,
    buf: &mut Vec<u8>,
    what: &str,
) -> Result<()> {
    buf.clear();
    let read = (&mut *reader).take(len as u64).read_to_end(buf)?;
    if read < len {
        return Err(ShuffleError::format(format!(
            "stream ended after {read} of {len} bytes of {what}"
        )));
    }
    Ok(())
}

fn read_len_prefixed<R: Read + ?Sized>(reader: &mut R, buf: &mut Vec<u8>, what: &str) -> Result<()> {
    let len = read_varint(reader)? as usize;
    read_len_bytes(reader, len, buf, what)
}

macro_rules! fixed_width_record {
    ($($ty:ty),* $(,)?) => {$(
        impl BinaryRecord for $ty {
            const KIND: CodecKind = CodecKind::BuiltIn;

            fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
                writer.write_all(&self.to_le_bytes())?;
                Ok(())
            }

            fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
                Ok(<$ty>::from_le_bytes(read_array(reader, stringify!($ty))?))
            }
        }
    )*};
}

fixed_width_record!(i8, u8, i16, u16, i32, u32, i64, u64, i128, f32, f64);

impl BinaryRecord for bool {
    const KIND: CodecKind = CodecKind::BuiltIn;

    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&[u8::from(*self)])?;
        Ok(())
    }

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        match read_array::<1, R>(reader, "bool")?[0] {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(ShuffleError::format(format!("{b} is not a valid bool"))),
        }
    }
}

impl BinaryRecord for String {
    const KIND: CodecKind = CodecKind::BuiltIn;

    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        write_len(writer, self.len(), "string")?;
        writer.write_all(self.as_bytes())?;
        Ok(())
    }

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut buf = Vec::new();
        read_len_prefixed(reader, &mut buf, "a string")?;
        String::from_utf8(buf).map_err(|e| ShuffleError::format(format!("invalid UTF-8: {e}")))
    }

    fn decode_into<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
        let mut buf = std::mem::take(self).into_bytes();
        read_len_prefixed(reader, &mut buf, "a string")?;
        *self = String::from_utf8(buf)
            .map_err(|e| ShuffleError::format(format!("invalid UTF-8: {e}")))?;
        Ok(())
    }
}

impl BinaryRecord for Bytes {
    const KIND: CodecKind = CodecKind::BuiltIn;

    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        write_len(writer, self.len(), "byte array")?;
        writer.write_all(self)?;
        Ok(())
    }

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut buf = Vec::new();
        read_len_prefixed(reader, &mut buf, "a byte array")?;
        Ok(Bytes::from(buf))
    }
}

// Date/times are stored like .NET binary date/times: the kind in the top two bits and
// 100ns ticks since 0001-01-01T00:00:00 in the rest.
const TICKS_PER_SECOND: i64 = 10_000_000;
const SECONDS_BEFORE_UNIX_EPOCH: i64 = 62_135_596_800;
const KIND_SHIFT: u32 = 62;
pub(crate) const TICKS_MASK: u64 = (1 << KIND_SHIFT) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum DateTimeKind {
    Unspecified = 0,
    Utc = 1,
}

fn encode_ticks<W: Write + ?Sized>(
    writer: &mut W,
    kind: DateTimeKind,
    secs: i64,
    nanos: u32,
) -> Result<()> {
    let ticks = secs
        .checked_add(SECONDS_BEFORE_UNIX_EPOCH)
        .and_then(|s| s.checked_mul(TICKS_PER_SECOND))
        .and_then(|t| t.checked_add(i64::from(nanos.min(999_999_999) / 100)))
        .filter(|t| (0..=TICKS_MASK as i64).contains(t))
        .ok_or_else(|| {
            ShuffleError::invalid_argument("date_time", "value is outside years 1 to 9999")
        })?;
    let value = ((kind as u64) << KIND_SHIFT) | ticks as u64;
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn decode_ticks<R: Read + ?Sized>(reader: &mut R, expected: DateTimeKind) -> Result<DateTime<Utc>> {
    let value = u64::from_le_bytes(read_array(reader, "a date/time")?);
    let kind = (value >> KIND_SHIFT) as u8;
    if kind != expected as u8 {
        return Err(ShuffleError::format(format!(
            "date/time kind {kind} does not match expected kind {:?}",
            expected
        )));
    }
    let ticks = (value & TICKS_MASK) as i64;
    let secs = ticks / TICKS_PER_SECOND - SECONDS_BEFORE_UNIX_EPOCH;
    let nanos = (ticks % TICKS_PER_SECOND) as u32 * 100;
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| ShuffleError::format(format!("{ticks} ticks is not a valid date/time")))
}

impl BinaryRecord for DateTime<Utc> {
    const KIND: CodecKind = CodecKind::BuiltIn;

    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        encode_ticks(
            writer,
            DateTimeKind::Utc,
            self.timestamp(),
            self.timestamp_subsec_nanos(),
        )
    }

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        decode_ticks(reader, DateTimeKind::Utc)
    }
}

impl BinaryRecord for NaiveDateTime {
    const KIND: CodecKind = CodecKind::BuiltIn;

    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        let utc = self.and_utc();
        encode_ticks(
            writer,
            DateTimeKind::Unspecified,
            utc.timestamp(),
            utc.timestamp_subsec_nanos(),
        )
    }

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Ok(decode_ticks(reader, DateTimeKind::Unspecified)?.naive_utc())
    }
}

/// Fixed-point decimal number: `mantissa × 10^-scale`.
///
/// Equality and ordering are by numeric value, so `1.0` and `1.00` compare equal.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decimal {
    pub mantissa: i128,
    pub scale: u8,
}

pub const MAX_DECIMAL_SCALE: u8 = 38;

impl Decimal {
    pub fn new(mantissa: i128, scale: u8) -> Result<Self> {
        if scale > MAX_DECIMAL_SCALE {
            return Err(ShuffleError::invalid_argument(
                "scale",
                format!("{scale} exceeds the maximum of {MAX_DECIMAL_SCALE}"),
            ));
        }
        Ok(Self { mantissa, scale })
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.scale.cmp(&other.scale) {
            Ordering::Equal => self.mantissa.cmp(&other.mantissa),
            Ordering::Greater => other.cmp(self).reverse(),
            Ordering::Less => {
                if self.mantissa == 0 {
                    return 0.cmp(&other.mantissa);
                }
                // Scale self up to other's scale; on overflow its magnitude exceeds
                // every i128, so the sign alone decides.
                let diff = u32::from(other.scale - self.scale);
                match 10i128
                    .checked_pow(diff)
                    .and_then(|p| self.mantissa.checked_mul(p))
                {
                    Some(scaled) => scaled.cmp(&other.mantissa),
                    None if self.mantissa < 0 => Ordering::Less,
                    None => Ordering::Greater,
                }
            }
        }
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl std::fmt::Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let digits = self.mantissa.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        let sign = if self.mantissa < 0 { "-" } else { "" };
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

impl BinaryRecord for Decimal {
    const KIND: CodecKind = CodecKind::BuiltIn;

    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.mantissa.to_le_bytes())?;
        writer.write_all(&[self.scale])?;
        Ok(())
    }

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mantissa = i128::from_le_bytes(read_array(reader, "a decimal")?);
        let [scale] = read_array::<1, R>(reader, "a decimal")?;
        Decimal::new(mantissa, scale).map_err(|e| ShuffleError::format(e.to_string()))
    }
}

macro_rules! tuple_record {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: BinaryRecord),+> BinaryRecord for ($($name,)+) {
            const KIND: CodecKind = CodecKind::BuiltIn;

            fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
                $(encode_element(&self.$idx, writer)?;)+
                Ok(())
            }

            fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
                Ok(($(decode_element::<$name, R>(reader)?,)+))
            }

            fn decode_into<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
                $(decode_element_into(&mut self.$idx, reader)?;)+
                Ok(())
            }
        }
    };
}

tuple_record!(A: 0, B: 1);
tuple_record!(A: 0, B: 1, C: 2);
tuple_record!(A: 0, B: 1, C: 2, D: 3);

impl<T: BinaryRecord> BinaryRecord for Vec<T> {
    const KIND: CodecKind = CodecKind::BuiltIn;

    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        write_len(writer, self.len(), "array")?;
        for item in self {
            encode_element(item, writer)?;
        }
        Ok(())
    }

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let count = read_varint(reader)? as usize;
        // Corrupt counts must not turn into huge allocations up front.
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(decode_element::<T, R>(reader)?);
        }
        Ok(items)
    }

    fn decode_into<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
        let count = read_varint(reader)? as usize;
        let reused = count.min(self.len());
        for item in &mut self[..reused] {
            decode_element_into(item, reader)?;
        }
        self.truncate(count);
        for _ in reused..count {
            self.push(decode_element::<T, R>(reader)?);
        }
        Ok(())
    }
}
