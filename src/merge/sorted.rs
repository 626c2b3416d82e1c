use std::sync::Arc;

use log::debug;

use crate::codec::stream::decode_exact;
use crate::codec::{BinaryRecord, CodecRegistry, ValueCodec};
use crate::compare::{RawComparator, SortableRecord, default_comparator};
use crate::error::{Result, ShuffleError};
use crate::merge::{MultiInputRecordReader, SharedInput};
use crate::sort::RawMergeIterator;
use crate::{RawReader, RecordReader};

/// Raw view of a shared input for the merge heap.
struct InputRawSource<T> {
    input: SharedInput<T>,
    buffer: Vec<u8>,
}

impl<T: BinaryRecord> RawReader for InputRawSource<T> {
    fn read_raw(&mut self) -> Result<Option<&[u8]>> {
        let mut input = self.input.lock();
        let result = input.raw_reader().and_then(|reader| {
            Ok(match reader.read_raw()? {
                Some(bytes) => {
                    self.buffer.clear();
                    self.buffer.extend_from_slice(bytes);
                    true
                }
                None => false,
            })
        });
        match result {
            Ok(true) => Ok(Some(&self.buffer)),
            Ok(false) => Ok(None),
            Err(err) => Err(ShuffleError::upstream(input.source_name(), err)),
        }
    }

    fn has_records(&self) -> bool {
        self.input.lock().has_records()
    }

    fn bytes_read(&self) -> u64 {
        self.input.lock().bytes_read()
    }
}

/// Merges the sorted inputs of the current partition into one sorted stream.
///
/// The merge starts once every input of the partition has arrived; records are
/// compared in serialized form and decoded only when handed out.
pub struct SortedMergeReader<T: BinaryRecord> {
    merge: Arc<MultiInputRecordReader<T>>,
    comparator: Arc<dyn RawComparator<T>>,
    codec: Arc<dyn ValueCodec<T>>,
    generation: u64,
    merger: Option<RawMergeIterator<T, InputRawSource<T>>>,
    records_read: u64,
}

impl<T: SortableRecord> SortedMergeReader<T> {
    pub fn new(merge: Arc<MultiInputRecordReader<T>>) -> Self {
        Self::with_comparator(merge, default_comparator::<T>())
    }
}

impl<T: BinaryRecord> SortedMergeReader<T> {
    pub fn with_comparator(
        merge: Arc<MultiInputRecordReader<T>>,
        comparator: Arc<dyn RawComparator<T>>,
    ) -> Self {
        let generation = merge.generation();
        Self {
            merge,
            comparator,
            codec: CodecRegistry::global().resolve::<T>(),
            generation,
            merger: None,
            records_read: 0,
        }
    }

    pub fn next_partition(&mut self, accept: impl FnMut(u32) -> bool) -> Result<bool> {
        self.merger = None;
        let moved = self.merge.next_partition(accept)?;
        self.generation = self.merge.generation();
        Ok(moved)
    }

    fn merger(&mut self) -> Result<Option<&mut RawMergeIterator<T, InputRawSource<T>>>> {
        if self.merge.generation() != self.generation {
            self.merger = None;
            self.generation = self.merge.generation();
        }
        if self.merger.is_none() {
            let Some(partition) = self.merge.current_partition() else {
                return Ok(None);
            };
            let total = self.merge.total_input_count();
            if !self.merge.wait_for_inputs(total, None) {
                return Err(ShuffleError::Disposed("merge reader"));
            }
            let sources = (0..total)
                .map(|index| {
                    self.merge.input(index).map(|input| InputRawSource {
                        input,
                        buffer: Vec::new(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            debug!("Merging {total} sorted inputs of partition {partition}");
            self.merger = Some(RawMergeIterator::new(sources, self.comparator.clone()));
        }
        Ok(self.merger.as_mut())
    }
}

impl<T: BinaryRecord> RecordReader<T> for SortedMergeReader<T> {
    fn read(&mut self) -> Result<Option<T>> {
        let codec = self.codec.clone();
        let Some(merger) = self.merger()? else {
            return Ok(None);
        };
        let Some(bytes) = merger.next_raw()? else {
            return Ok(None);
        };
        let record = decode_exact(codec.as_ref(), bytes, None)?
            .ok_or_else(|| ShuffleError::format("merged record did not decode"))?;
        self.records_read += 1;
        Ok(Some(record))
    }

    fn read_into(&mut self, record: &mut T) -> Result<bool> {
        let codec = self.codec.clone();
        let Some(merger) = self.merger()? else {
            return Ok(false);
        };
        let Some(bytes) = merger.next_raw()? else {
            return Ok(false);
        };
        decode_exact(codec.as_ref(), bytes, Some(record))?;
        self.records_read += 1;
        Ok(true)
    }

    fn has_records(&self) -> bool {
        self.generation == self.merge.generation() && self.merge.has_records_from(0)
    }

    fn records_read(&self) -> u64 {
        self.records_read
    }

    fn bytes_read(&self) -> u64 {
        self.merge.bytes_read()
    }
}
