use std::io::{BufReader, Cursor};

use log::debug;

use crate::codec::BinaryRecord;
use crate::codec::stream::{BinaryRecordReader, RawRecordReader};
use crate::diskio::compression::CompressedReader;
use crate::diskio::io_stats::IoStatsTracker;
use crate::error::{Result, ShuffleError};
use crate::input::{ChannelRecordReader, EncodingRawReader, InputSource, VecRecordReader};
use crate::{RawReader, RecordReader};

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

enum State<T> {
    Unrealized(InputSource<T>),
    Typed(Box<dyn RecordReader<T>>),
    Raw(Box<dyn RawReader>),
    Failed(String),
    Disposed,
}

impl<T> State<T> {
    fn name(&self) -> &'static str {
        match self {
            State::Unrealized(_) => "unrealized",
            State::Typed(_) => "typed reader",
            State::Raw(_) => "raw reader",
            State::Failed(_) => "failed",
            State::Disposed => "disposed",
        }
    }
}

/// One upstream output attached to a merge reader.
///
/// The reader over the source is created on first use, either typed or raw; once one
/// kind exists the other can no longer be requested.
pub struct RecordInput<T> {
    name: String,
    memory_based: bool,
    buffer_size: usize,
    state: State<T>,
    compressed: Option<IoStatsTracker>,
    retained_bytes_read: u64,
    retained_records_read: u64,
}

impl<T: BinaryRecord> RecordInput<T> {
    pub fn new(source: InputSource<T>) -> Self {
        let name = source.describe();
        Self::with_name(name, source)
    }

    pub fn with_name(name: impl Into<String>, source: InputSource<T>) -> Self {
        Self {
            name: name.into(),
            memory_based: source.is_memory_based(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            state: State::Unrealized(source),
            compressed: None,
            retained_bytes_read: 0,
            retained_records_read: 0,
        }
    }

    /// The typed reader, created on first call.
    pub fn reader(&mut self) -> Result<&mut dyn RecordReader<T>> {
        if let State::Unrealized(_) = self.state {
            self.state = match std::mem::replace(&mut self.state, State::Disposed) {
                State::Unrealized(source) => match self.open_typed(source) {
                    Ok(reader) => {
                        debug!("Opened typed reader over {}", self.name);
                        State::Typed(reader)
                    }
                    Err(err) => {
                        self.state = State::Failed(err.to_string());
                        return Err(err);
                    }
                },
                other => other,
            };
        }
        match &mut self.state {
            State::Typed(reader) => Ok(reader.as_mut()),
            State::Raw(_) => Err(ShuffleError::invalid_state(format!(
                "input {} already has a raw reader",
                self.name
            ))),
            State::Disposed => Err(ShuffleError::Disposed("record input")),
            State::Failed(msg) => Err(ShuffleError::invalid_state(format!(
                "input {} failed to open: {msg}",
                self.name
            ))),
            State::Unrealized(_) => Err(ShuffleError::invalid_state("input was not opened")),
        }
    }

    /// The raw reader, created on first call.
    pub fn raw_reader(&mut self) -> Result<&mut dyn RawReader> {
        if let State::Unrealized(_) = self.state {
            self.state = match std::mem::replace(&mut self.state, State::Disposed) {
                State::Unrealized(source) => match self.open_raw(source) {
                    Ok(reader) => {
                        debug!("Opened raw reader over {}", self.name);
                        State::Raw(reader)
                    }
                    Err(err) => {
                        self.state = State::Failed(err.to_string());
                        return Err(err);
                    }
                },
                other => other,
            };
        }
        match &mut self.state {
            State::Raw(reader) => Ok(reader.as_mut()),
            State::Typed(_) => Err(ShuffleError::invalid_state(format!(
                "input {} already has a typed reader",
                self.name
            ))),
            State::Disposed => Err(ShuffleError::Disposed("record input")),
            State::Failed(msg) => Err(ShuffleError::invalid_state(format!(
                "input {} failed to open: {msg}",
                self.name
            ))),
            State::Unrealized(_) => Err(ShuffleError::invalid_state("input was not opened")),
        }
    }

    fn open_typed(&mut self, source: InputSource<T>) -> Result<Box<dyn RecordReader<T>>> {
        Ok(match source {
            InputSource::File {
                path,
                fs,
                compression,
            } => {
                let stream = CompressedReader::new(fs.open_for_read(&path)?, compression.as_ref());
                self.compressed = Some(stream.compressed_tracker());
                Box::new(
                    BinaryRecordReader::new(BufReader::with_capacity(self.buffer_size, stream))
                        .with_length_prefix(true),
                )
            }
            InputSource::Buffer(bytes) => {
                Box::new(BinaryRecordReader::new(Cursor::new(bytes)).with_length_prefix(true))
            }
            InputSource::Records(records) => Box::new(VecRecordReader::new(records)),
            InputSource::Channel(receiver) => Box::new(ChannelRecordReader::new(receiver)),
        })
    }

    fn open_raw(&mut self, source: InputSource<T>) -> Result<Box<dyn RawReader>> {
        Ok(match source {
            InputSource::File {
                path,
                fs,
                compression,
            } => {
                let stream = CompressedReader::new(fs.open_for_read(&path)?, compression.as_ref());
                self.compressed = Some(stream.compressed_tracker());
                Box::new(RawRecordReader::new(BufReader::with_capacity(
                    self.buffer_size,
                    stream,
                )))
            }
            InputSource::Buffer(bytes) => Box::new(RawRecordReader::new(Cursor::new(bytes))),
            InputSource::Records(records) => {
                Box::new(EncodingRawReader::new(Box::new(VecRecordReader::new(records))))
            }
            InputSource::Channel(receiver) => Box::new(EncodingRawReader::new(Box::new(
                ChannelRecordReader::new(receiver),
            ))),
        })
    }
}

impl<T> RecordInput<T> {
    /// Read buffer size for file-backed sources.
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn source_name(&self) -> &str {
        &self.name
    }

    /// Whether the source is held in memory (and so cheap to read first).
    pub fn is_memory_based(&self) -> bool {
        self.memory_based
    }

    /// Whether a record may be read. Before a reader exists this is `true` unless the
    /// source is a channel with nothing queued.
    pub fn has_records(&self) -> bool {
        match &self.state {
            State::Unrealized(source) => source.is_ready(),
            State::Typed(reader) => reader.has_records(),
            State::Raw(reader) => reader.has_records(),
            State::Failed(_) | State::Disposed => false,
        }
    }

    pub fn is_realized(&self) -> bool {
        matches!(self.state, State::Typed(_) | State::Raw(_))
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.state, State::Disposed)
    }

    /// Uncompressed bytes consumed so far, kept after disposal.
    pub fn bytes_read(&self) -> u64 {
        match &self.state {
            State::Typed(reader) => reader.bytes_read(),
            State::Raw(reader) => reader.bytes_read(),
            _ => self.retained_bytes_read,
        }
    }

    pub fn records_read(&self) -> u64 {
        match &self.state {
            State::Typed(reader) => reader.records_read(),
            _ => self.retained_records_read,
        }
    }

    /// Bytes pulled from the file system before decompression; zero for memory inputs.
    pub fn compressed_bytes_read(&self) -> u64 {
        self.compressed
            .as_ref()
            .map_or(0, |tracker| tracker.stats().read_bytes)
    }

    /// Release the reader. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.is_disposed() {
            return;
        }
        self.retained_bytes_read = self.bytes_read();
        self.retained_records_read = self.records_read();
        debug!(
            "Disposing input {} ({}, {} bytes read)",
            self.name,
            self.state.name(),
            self.retained_bytes_read
        );
        self.state = State::Disposed;
    }
}
