//! Binary record codecs.
//!
//! A record type is encoded by exactly one codec, chosen per type:
//!
//! 1. an external [`ValueCodec`] registered in the [`CodecRegistry`] (value types whose
//!    encoding is owned by someone else),
//! 2. the type's own self-describing [`Writable`] implementation (mutable record types
//!    that can be read in place), or
//! 3. a built-in codec for scalars, strings, byte arrays, date/times, tuples, arrays
//!    and enums.
//!
//! The encoded form carries no type information. A reader must be opened with the same
//! record type the data was written with; this is not verified at runtime.

use std::io::{Read, Write};
use std::marker::PhantomData;

use crate::error::Result;

pub mod builtin;
pub mod record_file;
pub mod registry;
pub mod stream;
pub mod varint;

pub use builtin::Decimal;
pub use registry::CodecRegistry;

/// Which strategy encodes a record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    External,
    SelfDescribing,
    BuiltIn,
}

/// A type with a binary encoding.
///
/// `decode` produces a fresh value; `decode_into` overwrites an existing one so a
/// reader can reuse a single instance across reads.
pub trait BinaryRecord: Sized + Send + 'static {
    const KIND: CodecKind;

    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()>;

    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self>;

    fn decode_into<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
        *self = Self::decode(reader)?;
        Ok(())
    }

    /// Encode into a fresh buffer.
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }
}

/// Self-describing record type that serializes its own state.
///
/// Implement this together with [`Default`] and invoke [`writable_record!`] to make the
/// type usable as a [`BinaryRecord`]; `read_from` then doubles as the record-reuse path.
pub trait Writable {
    fn write_to(&self, writer: &mut dyn Write) -> Result<()>;

    fn read_from(&mut self, reader: &mut dyn Read) -> Result<()>;
}

/// Encode one element of a composite record (tuple, array, pair).
///
/// An external codec registered for `T` in the global registry wins over `T`'s own
/// encoding, exactly as it does for a stream of bare `T` records.
pub fn encode_element<T: BinaryRecord, W: Write + ?Sized>(value: &T, writer: &mut W) -> Result<()> {
    match CodecRegistry::global().lookup::<T>() {
        Some(codec) => {
            let mut writer = writer;
            codec.write(value, &mut writer)
        }
        None => value.encode(writer),
    }
}

/// Decode one element written by [`encode_element`].
pub fn decode_element<T: BinaryRecord, R: Read + ?Sized>(reader: &mut R) -> Result<T> {
    match CodecRegistry::global().lookup::<T>() {
        Some(codec) => {
            let mut reader = reader;
            codec.read(&mut reader)
        }
        None => T::decode(reader),
    }
}

/// Decode one element written by [`encode_element`] in place.
pub fn decode_element_into<T: BinaryRecord, R: Read + ?Sized>(
    value: &mut T,
    reader: &mut R,
) -> Result<()> {
    match CodecRegistry::global().lookup::<T>() {
        Some(codec) => {
            let mut reader = reader;
            codec.read_into(value, &mut reader)
        }
        None => value.decode_into(reader),
    }
}

/// Codec owned by something other than the record type.
pub trait ValueCodec<T>: Send + Sync {
    fn write(&self, value: &T, writer: &mut dyn Write) -> Result<()>;

    fn read(&self, reader: &mut dyn Read) -> Result<T>;

    fn read_into(&self, value: &mut T, reader: &mut dyn Read) -> Result<()> {
        *value = self.read(reader)?;
        Ok(())
    }

    fn kind(&self) -> CodecKind {
        CodecKind::External
    }
}

/// [`ValueCodec`] that delegates to the type's [`BinaryRecord`] implementation.
pub struct RecordCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> RecordCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for RecordCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: BinaryRecord> ValueCodec<T> for RecordCodec<T> {
    fn write(&self, value: &T, writer: &mut dyn Write) -> Result<()> {
        value.encode(writer)
    }

    fn read(&self, reader: &mut dyn Read) -> Result<T> {
        T::decode(reader)
    }

    fn read_into(&self, value: &mut T, reader: &mut dyn Read) -> Result<()> {
        value.decode_into(reader)
    }

    fn kind(&self) -> CodecKind {
        T::KIND
    }
}

/// Implement [`BinaryRecord`] for a type that implements [`Writable`] and [`Default`].
#[macro_export]
macro_rules! writable_record {
    ($ty:ty) => {
        impl $crate::codec::BinaryRecord for $ty {
            const KIND: $crate::codec::CodecKind = $crate::codec::CodecKind::SelfDescribing;

            fn encode<W: ::std::io::Write + ?Sized>(
                &self,
                writer: &mut W,
            ) -> $crate::error::Result<()> {
                let mut writer = writer;
                $crate::codec::Writable::write_to(self, &mut writer)
            }

            fn decode<R: ::std::io::Read + ?Sized>(
                reader: &mut R,
            ) -> $crate::error::Result<Self> {
                let mut value = <$ty as ::std::default::Default>::default();
                let mut reader = reader;
                $crate::codec::Writable::read_from(&mut value, &mut reader)?;
                Ok(value)
            }

            fn decode_into<R: ::std::io::Read + ?Sized>(
                &mut self,
                reader: &mut R,
            ) -> $crate::error::Result<()> {
                let mut reader = reader;
                $crate::codec::Writable::read_from(self, &mut reader)
            }
        }
    };
}

/// Implement [`BinaryRecord`] for a fieldless `Copy` enum through its integer
/// representation. Decoding an unknown discriminant is a format error.
///
/// ```
/// use shuffle_io::enum_record;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// #[repr(u8)]
/// enum Stage {
///     Map = 1,
///     Reduce = 2,
/// }
///
/// enum_record!(Stage as u8 { Map, Reduce });
/// ```
#[macro_export]
macro_rules! enum_record {
    ($ty:ident as $repr:ty { $($variant:ident),+ $(,)? }) => {
        impl $crate::codec::BinaryRecord for $ty {
            const KIND: $crate::codec::CodecKind = $crate::codec::CodecKind::BuiltIn;

            fn encode<W: ::std::io::Write + ?Sized>(
                &self,
                writer: &mut W,
            ) -> $crate::error::Result<()> {
                <$repr as $crate::codec::BinaryRecord>::encode(&(*self as $repr), writer)
            }

            fn decode<R: ::std::io::Read + ?Sized>(
                reader: &mut R,
            ) -> $crate::error::Result<Self> {
                let raw = <$repr as $crate::codec::BinaryRecord>::decode(reader)?;
                $(
                    if raw == $ty::$variant as $repr {
                        return Ok($ty::$variant);
                    }
                )+
                Err($crate::error::ShuffleError::format(format!(
                    "{} is not a valid {} discriminant",
                    raw,
                    stringify!($ty)
                )))
            }
        }
    };
}
