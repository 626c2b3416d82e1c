//! Compression stream decorators.
//!
//! Codec implementations live outside this crate. A codec only has to wrap a raw
//! stream; the wrappers returned here keep compressed and uncompressed byte counts
//! so progress can be reported in either unit.

use std::io::{self, Read, Write};

use crate::diskio::io_stats::{CountingReader, CountingWriter, IoStatsTracker};

pub trait CompressionCodec: Send + Sync {
    fn name(&self) -> &str;

    fn wrap_reader(&self, inner: Box<dyn Read + Send>) -> Box<dyn Read + Send>;

    fn wrap_writer(&self, inner: Box<dyn Write + Send>) -> Box<dyn Write + Send>;
}

/// Codec that stores bytes unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughCodec;

impl CompressionCodec for PassThroughCodec {
    fn name(&self) -> &str {
        "none"
    }

    fn wrap_reader(&self, inner: Box<dyn Read + Send>) -> Box<dyn Read + Send> {
        inner
    }

    fn wrap_writer(&self, inner: Box<dyn Write + Send>) -> Box<dyn Write + Send> {
        inner
    }
}

/// Decompressing reader with byte counters on both sides of the codec
pub struct CompressedReader {
    inner: CountingReader<Box<dyn Read + Send>>,
    compressed: IoStatsTracker,
}

impl CompressedReader {
    pub fn new(raw: Box<dyn Read + Send>, codec: &dyn CompressionCodec) -> Self {
        let compressed = IoStatsTracker::new();
        let counted: Box<dyn Read + Send> =
            Box::new(CountingReader::new(raw, compressed.clone()));
        Self {
            inner: CountingReader::new(codec.wrap_reader(counted), IoStatsTracker::new()),
            compressed,
        }
    }

    pub fn compressed_bytes_read(&self) -> u64 {
        self.compressed.stats().read_bytes
    }

    pub fn uncompressed_bytes_read(&self) -> u64 {
        self.inner.tracker().stats().read_bytes
    }

    /// Counter handle for the compressed side; stays valid after the reader is dropped.
    pub fn compressed_tracker(&self) -> IoStatsTracker {
        self.compressed.clone()
    }
}

impl Read for CompressedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Compressing writer with byte counters on both sides of the codec
pub struct CompressedWriter {
    inner: CountingWriter<Box<dyn Write + Send>>,
    compressed: IoStatsTracker,
}

impl CompressedWriter {
    pub fn new(raw: Box<dyn Write + Send>, codec: &dyn CompressionCodec) -> Self {
        let compressed = IoStatsTracker::new();
        let counted: Box<dyn Write + Send> =
            Box::new(CountingWriter::new(raw, compressed.clone()));
        Self {
            inner: CountingWriter::new(codec.wrap_writer(counted), IoStatsTracker::new()),
            compressed,
        }
    }

    pub fn compressed_bytes_written(&self) -> u64 {
        self.compressed.stats().write_bytes
    }

    pub fn uncompressed_bytes_written(&self) -> u64 {
        self.inner.tracker().stats().write_bytes
    }
}

impl Write for CompressedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
