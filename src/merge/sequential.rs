use std::sync::Arc;

use crate::RecordReader;
use crate::codec::BinaryRecord;
use crate::error::{Result, ShuffleError};
use crate::merge::{MultiInputRecordReader, SharedInput, read_input, read_input_into};

/// Concatenates the inputs of the current partition in index order.
///
/// Each input is read to the end before the next one is opened. The reader blocks
/// when it has caught up with the inputs attached so far and ends once all
/// `total_input_count` inputs are exhausted.
pub struct SequentialReader<T> {
    merge: Arc<MultiInputRecordReader<T>>,
    generation: u64,
    index: usize,
    current: Option<SharedInput<T>>,
    records_read: u64,
}

impl<T: BinaryRecord> SequentialReader<T> {
    pub fn new(merge: Arc<MultiInputRecordReader<T>>) -> Self {
        let generation = merge.generation();
        Self {
            merge,
            generation,
            index: 0,
            current: None,
            records_read: 0,
        }
    }

    pub fn merge_reader(&self) -> &Arc<MultiInputRecordReader<T>> {
        &self.merge
    }

    /// Move to the next partition; see [`MultiInputRecordReader::next_partition`].
    pub fn next_partition(&mut self, accept: impl FnMut(u32) -> bool) -> Result<bool> {
        let moved = self.merge.next_partition(accept)?;
        self.reset();
        Ok(moved)
    }

    fn reset(&mut self) {
        self.generation = self.merge.generation();
        self.index = 0;
        self.current = None;
    }

    /// The input to read from next, waiting for it to arrive if needed.
    /// `None` once the partition is finished.
    fn current_input(&mut self) -> Result<Option<SharedInput<T>>> {
        if self.merge.generation() != self.generation {
            self.reset();
        }
        if let Some(input) = &self.current {
            return Ok(Some(input.clone()));
        }
        if self.merge.current_partition().is_none()
            || self.index >= self.merge.total_input_count()
        {
            return Ok(None);
        }
        if !self.merge.wait_for_inputs(self.index + 1, None) {
            return Err(ShuffleError::Disposed("merge reader"));
        }
        let input = self.merge.input(self.index)?;
        self.current = Some(input.clone());
        Ok(Some(input))
    }

    fn finish_input(&mut self) {
        if let Some(input) = self.current.take() {
            input.lock().dispose();
        }
        self.index += 1;
    }
}

impl<T: BinaryRecord> RecordReader<T> for SequentialReader<T> {
    fn read(&mut self) -> Result<Option<T>> {
        while let Some(input) = self.current_input()? {
            if let Some(record) = read_input(&input)? {
                self.records_read += 1;
                return Ok(Some(record));
            }
            self.finish_input();
        }
        Ok(None)
    }

    fn read_into(&mut self, record: &mut T) -> Result<bool> {
        if !self.merge.config().allow_record_reuse {
            return match self.read()? {
                Some(next) => {
                    *record = next;
                    Ok(true)
                }
                None => Ok(false),
            };
        }
        while let Some(input) = self.current_input()? {
            if read_input_into(&input, record)? {
                self.records_read += 1;
                return Ok(true);
            }
            self.finish_input();
        }
        Ok(false)
    }

    fn has_records(&self) -> bool {
        self.generation == self.merge.generation() && self.merge.has_records_from(self.index)
    }

    fn records_read(&self) -> u64 {
        self.records_read
    }

    fn bytes_read(&self) -> u64 {
        self.merge.bytes_read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergeReaderConfig;
    use crate::input::{InputSource, RecordInput};
    use std::thread;
    use std::time::Duration;

    fn records(values: &[u32]) -> RecordInput<u32> {
        RecordInput::new(InputSource::Records(values.to_vec()))
    }

    fn drain(reader: &mut SequentialReader<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Some(v) = reader.read().unwrap() {
            out.push(v);
        }
        out
    }

    #[test]
    fn test_concatenates_in_input_order() {
        let merge = MultiInputRecordReader::new(MergeReaderConfig::new(3), &[0]).unwrap();
        merge.add_input(vec![records(&[1, 2])]).unwrap();
        merge.add_input(vec![records(&[])]).unwrap();
        merge.add_input(vec![records(&[3])]).unwrap();
        let mut reader = SequentialReader::new(merge);
        assert_eq!(drain(&mut reader), vec![1, 2, 3]);
        assert_eq!(reader.records_read(), 3);
        assert!(!reader.has_records());
    }

    #[test]
    fn test_blocks_until_late_inputs_arrive() {
        let merge = MultiInputRecordReader::new(MergeReaderConfig::new(3), &[0]).unwrap();
        merge.add_input(vec![records(&[10])]).unwrap();
        let producer = {
            let merge = merge.clone();
            thread::spawn(move || {
                for v in [20, 30] {
                    thread::sleep(Duration::from_millis(20));
                    merge.add_input(vec![records(&[v])]).unwrap();
                }
            })
        };
        let mut reader = SequentialReader::new(merge);
        assert_eq!(drain(&mut reader), vec![10, 20, 30]);
        producer.join().unwrap();
    }

    #[test]
    fn test_walks_partitions() {
        let merge =
            MultiInputRecordReader::new(MergeReaderConfig::new(1).allow_record_reuse(true), &[4, 5])
                .unwrap();
        merge.add_input(vec![records(&[1]), records(&[2])]).unwrap();
        let mut reader = SequentialReader::new(merge.clone());
        let mut value = 0;
        assert!(reader.read_into(&mut value).unwrap());
        assert_eq!(value, 1);
        assert!(!reader.read_into(&mut value).unwrap());
        assert!(reader.next_partition(|_| true).unwrap());
        assert_eq!(merge.current_partition(), Some(5));
        assert_eq!(drain(&mut reader), vec![2]);
        assert!(!reader.next_partition(|_| true).unwrap());
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn test_disposed_merge_reader_fails_read() {
        let merge = MultiInputRecordReader::<u32>::new(MergeReaderConfig::new(2), &[0]).unwrap();
        let mut reader = SequentialReader::new(merge.clone());
        merge.dispose();
        assert!(matches!(reader.read().unwrap_err(), ShuffleError::Disposed(_)));
    }
}
