//! Record files: a typed header followed by prefixed records with periodic markers.
//!
//! ```text
//! header  := "SRF" version:u8 type_name:string marker:[u8; 16]
//! body    := (record | sync)*
//! record  := 0i32 (LE) encoded-record
//! sync    := -1i32 (LE) marker
//! ```
//!
//! A sync block is written whenever at least `marker_interval` bytes have gone out since
//! the previous one. Because the 20 bytes of a sync block are effectively unique in the
//! file, a reader dropped at an arbitrary offset can scan forward to the next one and
//! continue from a record boundary. Byte ranges are assigned records this way: a range
//! `[start, end)` owns every record that follows a sync block beginning inside it (the
//! header counts as a sync block at offset 0).

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use log::debug;

use crate::codec::builtin::read_array;
use crate::codec::stream::CountedRead;
use crate::codec::{BinaryRecord, CodecRegistry, ValueCodec};
use crate::config::RecordFileConfig;
use crate::error::{Result, ShuffleError};
use crate::rand::random_marker;
use crate::{RecordReader, RecordWriter};

pub const MAGIC: &[u8; 3] = b"SRF";
pub const VERSION: u8 = 1;
pub const MARKER_LEN: usize = 16;

const RECORD_PREFIX: i32 = 0;
const MARKER_PREFIX: i32 = -1;
const SYNC_LEN: usize = 4 + MARKER_LEN;
const SCAN_CHUNK: usize = 4096;

fn type_name_of<T>() -> &'static str {
    std::any::type_name::<T>()
}

fn sync_pattern(marker: &[u8; MARKER_LEN]) -> [u8; SYNC_LEN] {
    let mut sync = [0u8; SYNC_LEN];
    sync[..4].copy_from_slice(&MARKER_PREFIX.to_le_bytes());
    sync[4..].copy_from_slice(marker);
    sync
}

/// Writes a record file
pub struct RecordFileWriter<T, W: Write> {
    writer: W,
    codec: Arc<dyn ValueCodec<T>>,
    marker: [u8; MARKER_LEN],
    marker_interval: usize,
    since_marker: usize,
    scratch: Vec<u8>,
    records_written: u64,
    bytes_written: u64,
}

impl<T: BinaryRecord, W: Write> RecordFileWriter<T, W> {
    /// Write the header with a freshly chosen marker.
    pub fn new(writer: W, config: RecordFileConfig) -> Result<Self> {
        Self::with_marker(writer, config, random_marker())
    }

    pub fn with_marker(
        mut writer: W,
        config: RecordFileConfig,
        marker: [u8; MARKER_LEN],
    ) -> Result<Self> {
        if marker == [0xff; MARKER_LEN] {
            return Err(ShuffleError::invalid_argument(
                "marker",
                "a marker of all 0xff bytes cannot be told apart from its prefix",
            ));
        }
        let mut header = Vec::with_capacity(64);
        header.extend_from_slice(MAGIC);
        header.push(VERSION);
        type_name_of::<T>().to_string().encode(&mut header)?;
        header.extend_from_slice(&marker);
        writer.write_all(&header)?;
        debug!(
            "Record file for {} uses marker {}",
            type_name_of::<T>(),
            hex::encode(marker)
        );

        Ok(Self {
            writer,
            codec: CodecRegistry::global().resolve::<T>(),
            marker,
            marker_interval: config.marker_interval.max(1),
            since_marker: 0,
            scratch: Vec::new(),
            records_written: 0,
            bytes_written: header.len() as u64,
        })
    }
}

impl<T, W: Write> RecordFileWriter<T, W> {
    pub fn marker(&self) -> &[u8; MARKER_LEN] {
        &self.marker
    }

    fn write_sync(&mut self) -> Result<()> {
        self.writer.write_all(&sync_pattern(&self.marker))?;
        self.bytes_written += SYNC_LEN as u64;
        self.since_marker = 0;
        Ok(())
    }

    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<T, W: Write> RecordWriter<T> for RecordFileWriter<T, W> {
    fn write(&mut self, record: &T) -> Result<()> {
        if self.since_marker >= self.marker_interval {
            self.write_sync()?;
        }
        self.scratch.clear();
        self.codec.write(record, &mut self.scratch)?;

        self.writer.write_all(&RECORD_PREFIX.to_le_bytes())?;
        self.writer.write_all(&self.scratch)?;
        let written = 4 + self.scratch.len();
        self.since_marker += written;
        self.bytes_written += written as u64;
        self.records_written += 1;
        Ok(())
    }

    fn records_written(&self) -> u64 {
        self.records_written
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// Reads a record file, or the records owned by one byte range of it.
///
/// The type name in the header must match `T`; beyond that, records are trusted to
/// decode as `T`.
pub struct RecordFileReader<T, R: Read + Seek> {
    reader: R,
    codec: Arc<dyn ValueCodec<T>>,
    marker: [u8; MARKER_LEN],
    header_len: u64,
    position: u64,
    end: u64,
    finished: bool,
    records_read: u64,
    bytes_read: u64,
}

impl<T: BinaryRecord, R: Read + Seek> RecordFileReader<T, R> {
    /// Read every record in the file.
    pub fn open(reader: R) -> Result<Self> {
        Self::open_range(reader, 0, u64::MAX)
    }

    /// Read the records owned by the byte range `[start, end)`.
    pub fn open_range(mut reader: R, start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(ShuffleError::invalid_argument(
                "start",
                format!("range start {start} is past its end {end}"),
            ));
        }
        reader.seek(SeekFrom::Start(0))?;
        let (marker, header_len) = read_header::<T, R>(&mut reader)?;

        let mut file = Self {
            reader,
            codec: CodecRegistry::global().resolve::<T>(),
            marker,
            header_len,
            position: header_len,
            end,
            finished: start >= end,
            records_read: 0,
            bytes_read: 0,
        };
        if start > 0 && !file.finished {
            match file.scan_to_sync(start.max(header_len))? {
                Some(sync_at) if sync_at < end => file.position = sync_at + SYNC_LEN as u64,
                _ => file.finished = true,
            }
        }
        Ok(file)
    }
}

fn read_header<T, R: Read>(reader: &mut R) -> Result<([u8; MARKER_LEN], u64)> {
    let mut counted = CountedRead {
        inner: reader,
        count: 0,
    };
    let magic: [u8; 3] = read_array(&mut counted, "the record file magic")?;
    if &magic != MAGIC {
        return Err(ShuffleError::format(format!(
            "not a record file (magic {})",
            hex::encode(magic)
        )));
    }
    let [version]: [u8; 1] = read_array(&mut counted, "the record file version")?;
    if version != VERSION {
        return Err(ShuffleError::format(format!(
            "unsupported record file version {version}"
        )));
    }
    let type_name = String::decode(&mut counted)?;
    if type_name != type_name_of::<T>() {
        return Err(ShuffleError::invalid_argument(
            "type",
            format!(
                "file holds {type_name} records, reader expects {}",
                type_name_of::<T>()
            ),
        ));
    }
    let marker: [u8; MARKER_LEN] = read_array(&mut counted, "the record marker")?;
    Ok((marker, counted.count))
}

impl<T, R: Read + Seek> RecordFileReader<T, R> {
    pub fn marker(&self) -> &[u8; MARKER_LEN] {
        &self.marker
    }

    pub fn header_len(&self) -> u64 {
        self.header_len
    }

    /// Byte offset of the next unread prefix.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Offset of the first sync block at or after `from`, leaving the stream just past it.
    fn scan_to_sync(&mut self, from: u64) -> Result<Option<u64>> {
        let sync = sync_pattern(&self.marker);
        self.reader.seek(SeekFrom::Start(from))?;

        let mut window = Vec::with_capacity(SCAN_CHUNK + SYNC_LEN);
        let mut window_start = from;
        let mut chunk = [0u8; SCAN_CHUNK];
        loop {
            let n = match self.reader.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Ok(None);
            }
            window.extend_from_slice(&chunk[..n]);
            if let Some(i) = window.windows(SYNC_LEN).position(|w| w == sync) {
                let sync_at = window_start + i as u64;
                self.reader
                    .seek(SeekFrom::Start(sync_at + SYNC_LEN as u64))?;
                debug!("Resynchronized at offset {sync_at} (scan started at {from})");
                return Ok(Some(sync_at));
            }
            let keep = window.len().min(SYNC_LEN - 1);
            let consumed = window.len() - keep;
            window.drain(..consumed);
            window_start += consumed as u64;
        }
    }

    fn read_prefix(&mut self) -> Result<Option<i32>> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(ShuffleError::format(format!(
                        "stream ended inside the prefix at offset {}",
                        self.position
                    )));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(i32::from_le_bytes(buf)))
    }

    fn next_record(&mut self, target: Option<&mut T>) -> Result<Option<Option<T>>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            let prefix_at = self.position;
            let Some(prefix) = self.read_prefix()? else {
                self.finished = true;
                return Ok(None);
            };
            match prefix {
                RECORD_PREFIX => {
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
                    let consumed = 4 + counted.count;
                    self.position += consumed;
                    self.bytes_read += consumed;
                    self.records_read += 1;
                    return Ok(Some(decoded));
                }
                MARKER_PREFIX => {
                    if prefix_at >= self.end {
                        self.finished = true;
                        return Ok(None);
                    }
                    let marker: [u8; MARKER_LEN] =
                        read_array(&mut self.reader, "a record marker")?;
                    if marker != self.marker {
                        return Err(ShuffleError::format(format!(
                            "marker mismatch at offset {prefix_at}: expected {}, found {}",
                            hex::encode(self.marker),
                            hex::encode(marker)
                        )));
                    }
                    self.position += SYNC_LEN as u64;
                    self.bytes_read += SYNC_LEN as u64;
                }
                other => {
                    return Err(ShuffleError::format(format!(
                        "invalid record prefix {other} at offset {prefix_at}"
                    )));
                }
            }
        }
    }
}

impl<T: Send, R: Read + Seek + Send> RecordReader<T> for RecordFileReader<T, R> {
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
