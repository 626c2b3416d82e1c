// Shuffle layer of a distributed batch-processing engine
//
// Records are encoded by per-type codecs (`codec`), compared in their serialized form
// (`compare`), sorted through an index over a shared buffer (`sort`), handed to the
// consumer of a partition through multi-input merge readers (`input`, `merge`) and
// routed to partitions by sampled split points (`partition`).

use crate::error::Result;

/// Pull-based source of typed records.
pub trait RecordReader<T>: Send {
    /// Read the next record into a fresh value; `None` once the source is exhausted.
    fn read(&mut self) -> Result<Option<T>>;

    /// Read the next record into `record`, reusing its allocations where the codec
    /// supports it. Returns `false` once the source is exhausted.
    fn read_into(&mut self, record: &mut T) -> Result<bool> {
        match self.read()? {
            Some(next) => {
                *record = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Whether a record can be read without waiting on a producer.
    ///
    /// File and buffer backed readers report `true` until they are exhausted.
    fn has_records(&self) -> bool;

    fn records_read(&self) -> u64;

    fn bytes_read(&self) -> u64;
}

/// Pull-based source of serialized records.
pub trait RawReader: Send {
    /// The next record's encoded bytes; valid until the next call.
    fn read_raw(&mut self) -> Result<Option<&[u8]>>;

    fn has_records(&self) -> bool;

    fn bytes_read(&self) -> u64;
}

/// Push-based sink of typed records.
pub trait RecordWriter<T> {
    fn write(&mut self, record: &T) -> Result<()>;

    fn records_written(&self) -> u64;

    fn bytes_written(&self) -> u64;
}

impl<T, R: RecordReader<T> + ?Sized> RecordReader<T> for Box<R> {
    fn read(&mut self) -> Result<Option<T>> {
        (**self).read()
    }

    fn read_into(&mut self, record: &mut T) -> Result<bool> {
        (**self).read_into(record)
    }

    fn has_records(&self) -> bool {
        (**self).has_records()
    }

    fn records_read(&self) -> u64 {
        (**self).records_read()
    }

    fn bytes_read(&self) -> u64 {
        (**self).bytes_read()
    }
}

impl<R: RawReader + ?Sized> RawReader for Box<R> {
    fn read_raw(&mut self) -> Result<Option<&[u8]>> {
        (**self).read_raw()
    }

    fn has_records(&self) -> bool {
        (**self).has_records()
    }

    fn bytes_read(&self) -> u64 {
        (**self).bytes_read()
    }
}

/// Non-owning view of one serialized record inside a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecordView<'a> {
    buffer: &'a [u8],
    offset: usize,
    length: usize,
}

impl<'a> RawRecordView<'a> {
    pub fn new(buffer: &'a [u8], offset: usize, length: usize) -> Result<Self> {
        match offset.checked_add(length) {
            Some(end) if end <= buffer.len() => Ok(Self {
                buffer,
                offset,
                length,
            }),
            _ => Err(ShuffleError::invalid_argument(
                "offset",
                format!(
                    "range {offset}+{length} exceeds buffer of {} bytes",
                    buffer.len()
                ),
            )),
        }
    }

    /// View covering the whole slice.
    pub fn whole(bytes: &'a [u8]) -> Self {
        Self {
            buffer: bytes,
            offset: 0,
            length: bytes.len(),
        }
    }

    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn bytes(&self) -> &'a [u8] {
        &self.buffer[self.offset..self.offset + self.length]
    }
}

// Implementations
pub mod codec;
pub mod compare;
pub mod config;
pub mod diskio;
pub mod error;
pub mod gensort;
pub mod input;
pub mod merge;
pub mod partition;
pub mod rand;
pub mod sort;

// Export the main types
pub use codec::record_file::{RecordFileReader, RecordFileWriter};
pub use codec::stream::{BinaryRecordReader, BinaryRecordWriter, RawRecordReader};
pub use codec::{BinaryRecord, CodecKind, CodecRegistry, ValueCodec, Writable};
pub use compare::{RawComparator, SortableRecord, default_comparator};
pub use config::{MergeReaderConfig, PartitionerConfig, RecordFileConfig, TaskContext};
pub use diskio::fs::{FileSystemClient, LocalFileSystem};
pub use diskio::io_stats::{IoStats, IoStatsTracker};
pub use error::{Result as ShuffleResult, ShuffleError};
pub use gensort::GenSortRecord;
pub use input::{InputSource, RecordInput};
pub use merge::{
    InnerJoinReader, MergeEvent, MultiInputRecordReader, RoundRobinReader, SequentialReader,
    SortedMergeReader,
};
pub use partition::range::RangePartitioner;
pub use partition::split_points::{SplitPointTable, build_split_points};
pub use partition::trie::PartitionTrie;
pub use partition::{HashPartitioner, PartitionKey, Partitioner};
pub use sort::indexed_sort::IndexEntry;
pub use sort::sort_buffer::RecordSortBuffer;
