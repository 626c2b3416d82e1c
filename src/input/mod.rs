//! Upstream data sources of a merge reader.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::channel::Receiver;

use crate::codec::stream::BinaryRecordWriter;
use crate::codec::{BinaryRecord, CodecRegistry, ValueCodec};
use crate::diskio::compression::{CompressedWriter, CompressionCodec, PassThroughCodec};
use crate::diskio::fs::FileSystemClient;
use crate::error::Result;
use crate::{RawReader, RecordReader, RecordWriter};

pub mod record_input;

pub use record_input::RecordInput;

/// Where the records of one upstream output live.
pub enum InputSource<T> {
    /// Length-prefixed record stream in a file, possibly compressed
    File {
        path: PathBuf,
        fs: Arc<dyn FileSystemClient>,
        compression: Arc<dyn CompressionCodec>,
    },
    /// Length-prefixed record stream held in memory
    Buffer(Bytes),
    /// Records that were never serialized
    Records(Vec<T>),
    /// Records produced by a pipelined upstream stage; ends when the sender hangs up
    Channel(Receiver<T>),
}

impl<T> InputSource<T> {
    /// Uncompressed shuffle file.
    pub fn file(path: impl AsRef<Path>, fs: Arc<dyn FileSystemClient>) -> Self {
        Self::File {
            path: path.as_ref().to_path_buf(),
            fs,
            compression: Arc::new(PassThroughCodec),
        }
    }

    pub fn is_memory_based(&self) -> bool {
        !matches!(self, Self::File { .. })
    }

    /// Whether reading could start without waiting on a producer.
    pub fn is_ready(&self) -> bool {
        match self {
            Self::Channel(receiver) => !receiver.is_empty(),
            _ => true,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::File { path, .. } => path.display().to_string(),
            Self::Buffer(bytes) => format!("memory buffer ({} bytes)", bytes.len()),
            Self::Records(records) => format!("record list ({} records)", records.len()),
            Self::Channel(_) => "pipeline channel".to_string(),
        }
    }
}

/// Write `records` as a shuffle file that [`InputSource::File`] can read back.
/// Returns the number of uncompressed bytes written.
pub fn write_shuffle_file<'a, T: BinaryRecord>(
    fs: &dyn FileSystemClient,
    path: &Path,
    compression: &dyn CompressionCodec,
    records: impl IntoIterator<Item = &'a T>,
) -> Result<u64> {
    let sink = CompressedWriter::new(fs.create_for_write(path)?, compression);
    let mut writer = BinaryRecordWriter::<T, _>::new(sink).with_length_prefix(true);
    for record in records {
        writer.write(record)?;
    }
    let written = writer.bytes_written();
    writer.finish()?;
    Ok(written)
}

/// Serve a list of records that were never serialized.
pub struct VecRecordReader<T> {
    records: std::vec::IntoIter<T>,
    records_read: u64,
}

impl<T> VecRecordReader<T> {
    pub fn new(records: Vec<T>) -> Self {
        Self {
            records: records.into_iter(),
            records_read: 0,
        }
    }
}

impl<T: Send> RecordReader<T> for VecRecordReader<T> {
    fn read(&mut self) -> Result<Option<T>> {
        let next = self.records.next();
        if next.is_some() {
            self.records_read += 1;
        }
        Ok(next)
    }

    fn has_records(&self) -> bool {
        !self.records.as_slice().is_empty()
    }

    fn records_read(&self) -> u64 {
        self.records_read
    }

    fn bytes_read(&self) -> u64 {
        0
    }
}

/// Serve records pushed by a pipelined producer.
///
/// `has_records` reports only what is already queued; `read` blocks until the next
/// record arrives or every sender is gone.
pub struct ChannelRecordReader<T> {
    receiver: Receiver<T>,
    records_read: u64,
}

impl<T> ChannelRecordReader<T> {
    pub fn new(receiver: Receiver<T>) -> Self {
        Self {
            receiver,
            records_read: 0,
        }
    }
}

impl<T: Send> RecordReader<T> for ChannelRecordReader<T> {
    fn read(&mut self) -> Result<Option<T>> {
        match self.receiver.recv() {
            Ok(record) => {
                self.records_read += 1;
                Ok(Some(record))
            }
            Err(_) => Ok(None),
        }
    }

    fn has_records(&self) -> bool {
        !self.receiver.is_empty()
    }

    fn records_read(&self) -> u64 {
        self.records_read
    }

    fn bytes_read(&self) -> u64 {
        0
    }
}

/// Raw view of a typed source, encoding each record as it is read.
pub struct EncodingRawReader<T> {
    inner: Box<dyn RecordReader<T>>,
    codec: Arc<dyn ValueCodec<T>>,
    buffer: Vec<u8>,
    bytes_read: u64,
}

impl<T: BinaryRecord> EncodingRawReader<T> {
    pub fn new(inner: Box<dyn RecordReader<T>>) -> Self {
        Self {
            inner,
            codec: CodecRegistry::global().resolve::<T>(),
            buffer: Vec::new(),
            bytes_read: 0,
        }
    }
}

impl<T> RawReader for EncodingRawReader<T> {
    fn read_raw(&mut self) -> Result<Option<&[u8]>> {
        let Some(record) = self.inner.read()? else {
            return Ok(None);
        };
        self.buffer.clear();
        self.codec.write(&record, &mut self.buffer)?;
        self.bytes_read += self.buffer.len() as u64;
        Ok(Some(&self.buffer))
    }

    fn has_records(&self) -> bool {
        self.inner.has_records()
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}
