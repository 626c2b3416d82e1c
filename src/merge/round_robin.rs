use std::sync::Arc;
use std::time::Duration;

use log::trace;

use crate::RecordReader;
use crate::codec::BinaryRecord;
use crate::error::{Result, ShuffleError};
use crate::merge::{MultiInputRecordReader, read_input};

/// How long to wait for another input before reading blindly from a slow one.
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Takes one record from each input of the current partition in turn.
///
/// Inputs that report nothing ready are passed over. When no input is ready and the
/// partition is still waiting for inputs, the reader waits briefly for a new one and
/// then falls back to a blocking read from the next unfinished input, so a slow
/// producer cannot starve the rest.
pub struct RoundRobinReader<T> {
    merge: Arc<MultiInputRecordReader<T>>,
    generation: u64,
    exhausted: Vec<bool>,
    cursor: usize,
    records_read: u64,
}

impl<T: BinaryRecord> RoundRobinReader<T> {
    pub fn new(merge: Arc<MultiInputRecordReader<T>>) -> Self {
        let generation = merge.generation();
        Self {
            merge,
            generation,
            exhausted: Vec::new(),
            cursor: 0,
            records_read: 0,
        }
    }

    pub fn next_partition(&mut self, accept: impl FnMut(u32) -> bool) -> Result<bool> {
        let moved = self.merge.next_partition(accept)?;
        self.reset();
        Ok(moved)
    }

    fn reset(&mut self) {
        self.generation = self.merge.generation();
        self.exhausted.clear();
        self.cursor = 0;
    }

    /// One pass over the unfinished inputs starting at the cursor. With `ready_only`
    /// set, inputs without records ready are skipped instead of read.
    fn pass(&mut self, ready_only: bool) -> Result<Option<T>> {
        let count = self.exhausted.len();
        for step in 0..count {
            let index = (self.cursor + step) % count;
            if self.exhausted[index] {
                continue;
            }
            let input = self.merge.input(index)?;
            if ready_only && !input.lock().has_records() {
                continue;
            }
            match read_input(&input)? {
                Some(record) => {
                    self.cursor = (index + 1) % count;
                    return Ok(Some(record));
                }
                None => {
                    trace!("Input {index} exhausted");
                    self.exhausted[index] = true;
                    input.lock().dispose();
                }
            }
        }
        Ok(None)
    }
}

impl<T: BinaryRecord> RecordReader<T> for RoundRobinReader<T> {
    fn read(&mut self) -> Result<Option<T>> {
        if self.merge.generation() != self.generation {
            self.reset();
        }
        if self.merge.current_partition().is_none() {
            return Ok(None);
        }
        let total = self.merge.total_input_count();
        loop {
            let count = self.merge.current_input_count();
            self.exhausted.resize(count, false);

            if let Some(record) = self.pass(true)? {
                self.records_read += 1;
                return Ok(Some(record));
            }

            if self.exhausted.iter().all(|&done| done) {
                if count >= total {
                    return Ok(None);
                }
                if !self.merge.wait_for_inputs(count + 1, None) {
                    return Err(ShuffleError::Disposed("merge reader"));
                }
                continue;
            }

            if count < total && self.merge.wait_for_inputs(count + 1, Some(INPUT_POLL_INTERVAL)) {
                continue;
            }
            if self.merge.is_disposed() {
                return Err(ShuffleError::Disposed("merge reader"));
            }

            if let Some(record) = self.pass(false)? {
                self.records_read += 1;
                return Ok(Some(record));
            }
        }
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
