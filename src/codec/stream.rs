//! Binary record streams.
//!
//! Records are written back-to-back with their resolved codec. In length-prefixed mode
//! every record is preceded by its 7-bit encoded byte length, which is what lets a
//! [`RawRecordReader`] move records around without decoding them. Shuffle files are
//! always written length-prefixed.
//!
//! A reader trusts that it is reading the type the stream was written with: the format
//! carries no type tag, and decoding a stream as a different type is undefined at the
//! record level (it may fail with a format error or silently produce garbage).

use std::io::{self, BufRead, Read, Write};
use std::sync::Arc;

use crate::codec::builtin::read_len_bytes;
use crate::codec::varint::{encoded_len, read_varint_or_eof, write_varint};
use crate::codec::{BinaryRecord, CodecRegistry, ValueCodec};
use crate::error::{Result, ShuffleError};
use crate::{RawReader, RecordReader, RecordWriter};

/// Writes records of one type to a byte sink
pub struct BinaryRecordWriter<T, W: Write> {
    writer: W,
    codec: Arc<dyn ValueCodec<T>>,
    length_prefix: bool,
    scratch: Vec<u8>,
    records_written: u64,
    bytes_written: u64,
}

impl<T: BinaryRecord, W: Write> BinaryRecordWriter<T, W> {
    /// Writer using the codec the global registry resolves for `T`.
    pub fn new(writer: W) -> Self {
        Self::with_codec(writer, CodecRegistry::global().resolve::<T>())
    }
}

impl<T, W: Write> BinaryRecordWriter<T, W> {
    pub fn with_codec(writer: W, codec: Arc<dyn ValueCodec<T>>) -> Self {
        Self {
            writer,
            codec,
            length_prefix: false,
            scratch: Vec::new(),
            records_written: 0,
            bytes_written: 0,
        }
    }

    /// Precede every record with its encoded length.
    #[must_use]
    pub fn with_length_prefix(mut self, enabled: bool) -> Self {
        self.length_prefix = enabled;
        self
    }

    pub fn is_length_prefixed(&self) -> bool {
        self.length_prefix
    }

    /// Write a record that is already encoded with `T`'s codec.
    pub fn write_raw(&mut self, encoded: &[u8]) -> Result<()> {
        if self.length_prefix {
            let len = u32::try_from(encoded.len()).map_err(|_| {
                ShuffleError::invalid_argument("record", "encoded record exceeds 4 GiB")
            })?;
            self.bytes_written += write_varint(&mut self.writer, len)? as u64;
        }
        self.writer.write_all(encoded)?;
        self.bytes_written += encoded.len() as u64;
        self.records_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and hand back the underlying sink.
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<T, W: Write> RecordWriter<T> for BinaryRecordWriter<T, W> {
    fn write(&mut self, record: &T) -> Result<()> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        self.codec.write(record, &mut scratch)?;
        let result = self.write_raw(&scratch);
        self.scratch = scratch;
        result
    }

    fn records_written(&self) -> u64 {
        self.records_written
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// Counts the bytes a codec pulls while decoding one record.
pub(crate) struct CountedRead<'a, R: ?Sized> {
    pub(crate) inner: &'a mut R,
    pub(crate) count: u64,
}

impl<R: Read + ?Sized> Read for CountedRead<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Read one length-prefixed record into `buf`; `false` on a clean end of stream.
pub(crate) fn read_framed<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> Result<Option<u64>> {
    let Some(len) = read_varint_or_eof(reader)? else {
        return Ok(None);
    };
    read_len_bytes(reader, len as usize, buf, "a length-prefixed record")?;
    Ok(Some((encoded_len(len) + len as usize) as u64))
}

/// Decode exactly one record from `bytes`; leftover bytes mean the frame is corrupt.
pub(crate) fn decode_exact<T>(
    codec: &dyn ValueCodec<T>,
    bytes: &[u8],
    target: Option<&mut T>,
) -> Result<Option<T>> {
    let mut slice = bytes;
    let decoded = match target {
        Some(record) => {
            codec.read_into(record, &mut slice)?;
            None
        }
        None => Some(codec.read(&mut slice)?),
    };
    if !slice.is_empty() {
        return Err(ShuffleError::format(format!(
            "record frame of {} bytes has {} trailing bytes",
            bytes.len(),
            slice.len()
        )));
    }
    Ok(decoded)
}

/// Reads records of one type from a byte source
pub struct BinaryRecordReader<T, R: BufRead> {
    reader: R,
    codec: Arc<dyn ValueCodec<T>>,
    length_prefix: bool,
    scratch: Vec<u8>,
    finished: bool,
    records_read: u64,
    bytes_read: u64,
}

impl<T: BinaryRecord, R: BufRead> BinaryRecordReader<T, R> {
    /// Reader using the codec the global registry resolves for `T`.
    pub fn new(reader: R) -> Self {
        Self::with_codec(reader, CodecRegistry::global().resolve::<T>())
    }
}

impl<T, R: BufRead> BinaryRecordReader<T, R> {
    pub fn with_codec(reader: R, codec: Arc<dyn ValueCodec<T>>) -> Self {
        Self {
            reader,
            codec,
            length_prefix: false,
            scratch: Vec::new(),
            finished: false,
            records_read: 0,
            bytes_read: 0,
        }
    }

    /// Expect every record to be preceded by its encoded length.
    #[must_use]
    pub fn with_length_prefix(mut self, enabled: bool) -> Self {
        self.length_prefix = enabled;
        self
    }

    fn next_record(&mut self, target: Option<&mut T>) -> Result<Option<Option<T>>> {
        if self.finished {
            return Ok(None);
        }
        if self.length_prefix {
            match read_framed(&mut self.reader, &mut self.scratch)? {
                Some(n) => self.bytes_read += n,
                None => {
                    self.finished = true;
                    return Ok(None);
                }
            }
            let decoded = decode_exact(self.codec.as_ref(), &self.scratch, target)?;
            self.records_read += 1;
            return Ok(Some(decoded));
        }

        if self.reader.fill_buf()?.is_empty() {
            self.finished = true;
            return Ok(None);
        }
        let mut counted = CountedRead {
            inner: &mut self.reader,
            count: 0,
        };
        let decoded = match target {
            Some(record) => {
                self.codec.read_into(record, &mut counted)?;
                None
            }
            None => Some(self.codec.read(&mut counted)?),
        };
        self.bytes_read += counted.count;
        self.records_read += 1;
        Ok(Some(decoded))
    }
}

impl<T: Send, R: BufRead + Send> RecordReader<T> for BinaryRecordReader<T, R> {
    fn read(&mut self) -> Result<Option<T>> {
        Ok(self.next_record(None)?.flatten())
    }

    fn read_into(&mut self, record: &mut T) -> Result<bool> {
        Ok(self.next_record(Some(record))?.is_some())
    }

    fn has_records(&self) -> bool {
        !self.finished
    }

    fn records_read(&self) -> u64 {
        self.records_read
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

/// Reads length-prefixed records without decoding them
pub struct RawRecordReader<R: Read> {
    reader: R,
    buffer: Vec<u8>,
    finished: bool,
    records_read: u64,
    bytes_read: u64,
}

impl<R: Read> RawRecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            finished: false,
            records_read: 0,
            bytes_read: 0,
        }
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }
}

impl<R: Read + Send> RawReader for RawRecordReader<R> {
    fn read_raw(&mut self) -> Result<Option<&[u8]>> {
        if self.finished {
            return Ok(None);
        }
        match read_framed(&mut self.reader, &mut self.buffer)? {
            Some(n) => {
                self.bytes_read += n;
                self.records_read += 1;
                Ok(Some(&self.buffer))
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    fn has_records(&self) -> bool {
        !self.finished
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}
