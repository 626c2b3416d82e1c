use std::io::Write;
use std::sync::Arc;

use log::debug;

use crate::RecordWriter;
use crate::codec::stream::BinaryRecordWriter;
use crate::codec::{BinaryRecord, CodecRegistry, ValueCodec};
use crate::compare::{RawComparator, SortableRecord, default_comparator};
use crate::error::{Result, ShuffleError};
use crate::sort::indexed_sort::{self, IndexEntry};

/// Accumulates encoded records in one byte buffer and sorts them through an index.
pub struct RecordSortBuffer<T> {
    data: Vec<u8>,
    index: Vec<IndexEntry>,
    memory_limit: usize,
    codec: Arc<dyn ValueCodec<T>>,
    comparator: Arc<dyn RawComparator<T>>,
    scratch: Vec<u8>,
    sorted: bool,
}

impl<T: SortableRecord> RecordSortBuffer<T> {
    pub fn new(memory_limit: usize) -> Self {
        Self::with_comparator(memory_limit, default_comparator::<T>())
    }
}

impl<T: BinaryRecord> RecordSortBuffer<T> {
    pub fn with_comparator(memory_limit: usize, comparator: Arc<dyn RawComparator<T>>) -> Self {
        Self {
            data: Vec::new(),
            index: Vec::new(),
            memory_limit,
            codec: CodecRegistry::global().resolve::<T>(),
            comparator,
            scratch: Vec::new(),
            sorted: true,
        }
    }
}

impl<T> RecordSortBuffer<T> {
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Bytes held by records and their index entries.
    pub fn memory_used(&self) -> usize {
        self.data.len() + self.index.len() * size_of::<IndexEntry>()
    }

    pub fn has_space(&self, encoded_len: usize) -> bool {
        self.memory_used() + encoded_len + size_of::<IndexEntry>() <= self.memory_limit
    }

    pub fn append(&mut self, record: &T) -> Result<bool> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        let result = self
            .codec
            .write(record, &mut scratch)
            .and_then(|()| self.append_raw(&scratch));
        self.scratch = scratch;
        result
    }

    /// Append an already encoded record. Returns `false` when the buffer is full.
    ///
    /// An empty buffer always accepts one record, however large, so callers that spill
    /// and retry make progress.
    pub fn append_raw(&mut self, encoded: &[u8]) -> Result<bool> {
        let start = self.data.len();
        if !self.fits(start, encoded.len()) {
            return self.reject(encoded.len());
        }
        self.data.extend_from_slice(encoded);
        self.push_entry(start, encoded.len());
        Ok(true)
    }

    fn fits(&self, start: usize, length: usize) -> bool {
        let addressable = start + length <= u32::MAX as usize;
        addressable && (self.is_empty() || self.has_space(length))
    }

    fn reject(&self, length: usize) -> Result<bool> {
        if self.is_empty() {
            return Err(ShuffleError::invalid_argument(
                "record",
                format!("encoded record of {length} bytes cannot be indexed"),
            ));
        }
        Ok(false)
    }

    fn push_entry(&mut self, start: usize, length: usize) {
        self.index.push(IndexEntry::new(start as u32, length as u32));
        self.sorted = self.index.len() < 2;
    }

    pub fn sort(&mut self) -> Result<()> {
        if !self.sorted {
            indexed_sort::sort(&mut self.index, &self.data, self.comparator.as_ref())?;
            self.sorted = true;
        }
        Ok(())
    }

    /// Encoded records in sorted order.
    pub fn sorted_iter(&mut self) -> Result<impl Iterator<Item = &[u8]> + '_> {
        self.sort()?;
        let data = &self.data;
        Ok(self
            .index
            .iter()
            .map(move |e| &data[e.offset as usize..e.end()]))
    }

    /// Decode every record in sorted order and empty the buffer.
    pub fn drain_sorted(&mut self) -> Result<Vec<T>> {
        self.sort()?;
        let mut records = Vec::with_capacity(self.index.len());
        for entry in &self.index {
            let mut bytes = &self.data[entry.offset as usize..entry.end()];
            records.push(self.codec.read(&mut bytes)?);
        }
        self.reset();
        Ok(records)
    }

    /// Write the sorted records as a length-prefixed stream and empty the buffer.
    /// Returns the number of records written.
    pub fn spill<W: Write>(&mut self, writer: W) -> Result<u64> {
        self.sort()?;
        let mut out =
            BinaryRecordWriter::with_codec(writer, self.codec.clone()).with_length_prefix(true);
        for entry in &self.index {
            out.write_raw(&self.data[entry.offset as usize..entry.end()])?;
        }
        let written = out.records_written();
        debug!("Spilled {} records ({} bytes)", written, out.bytes_written());
        out.finish()?;
        self.reset();
        Ok(written)
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.index.clear();
        self.sorted = true;
    }
}
