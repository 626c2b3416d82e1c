//! Partition-aware merging of asynchronously arriving inputs.
//!
//! A [`MultiInputRecordReader`] collects the [`RecordInput`]s that upstream producers
//! hand over as they finish, grouped by partition, and lets exactly one consumer
//! thread walk the partitions in order. The strategies in this module
//! ([`SequentialReader`], [`RoundRobinReader`], [`InnerJoinReader`] and
//! [`SortedMergeReader`]) turn the inputs of the current partition into one record
//! stream.
//!
//! Producers may call [`MultiInputRecordReader::add_input`] from any thread at any
//! time. All partition state sits behind one mutex; a condition variable wakes a
//! consumer blocked in [`MultiInputRecordReader::wait_for_inputs`].

use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, unbounded};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::config::MergeReaderConfig;
use crate::error::{Result, ShuffleError};
use crate::input::RecordInput;

pub mod join;
pub mod round_robin;
pub mod sequential;
pub mod sorted;

pub use join::{FnJoiner, InnerJoinReader, Joiner};
pub use round_robin::RoundRobinReader;
pub use sequential::SequentialReader;
pub use sorted::SortedMergeReader;

/// Shared handle to an input; the consumer locks it for each read.
pub type SharedInput<T> = Arc<Mutex<RecordInput<T>>>;

/// Notification pushed to subscribers of a merge reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeEvent {
    /// A producer attached an input; `input_count` is the partition's new total
    InputAdded { partition: u32, input_count: usize },
    /// The consumer moved on to `partition`
    PartitionChanged { partition: u32 },
}

struct InputSlot<T> {
    input: SharedInput<T>,
    memory_based: bool,
    /// Position in the order producers attached inputs to the partition
    arrival: usize,
}

struct Partition<T> {
    number: u32,
    inputs: Vec<InputSlot<T>>,
    /// `inputs[..handed_out]` have been given to the consumer and keep their index
    handed_out: usize,
    retained_bytes_read: u64,
    retained_records_read: u64,
    disposed: bool,
}

impl<T> Partition<T> {
    fn new(number: u32) -> Self {
        Self {
            number,
            inputs: Vec::new(),
            handed_out: 0,
            retained_bytes_read: 0,
            retained_records_read: 0,
            disposed: false,
        }
    }

    fn insert(&mut self, input: RecordInput<T>) {
        let memory_based = input.is_memory_based();
        let slot = InputSlot {
            input: Arc::new(Mutex::new(input)),
            memory_based,
            arrival: self.inputs.len(),
        };
        let at = if memory_based {
            self.inputs[self.handed_out..]
                .iter()
                .position(|s| !s.memory_based)
                .map_or(self.inputs.len(), |p| self.handed_out + p)
        } else {
            self.inputs.len()
        };
        self.inputs.insert(at, slot);
    }

    fn bytes_read(&self) -> u64 {
        if self.disposed {
            return self.retained_bytes_read;
        }
        self.inputs.iter().map(|s| s.input.lock().bytes_read()).sum()
    }

    fn records_read(&self) -> u64 {
        if self.disposed {
            return self.retained_records_read;
        }
        self.inputs.iter().map(|s| s.input.lock().records_read()).sum()
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.retained_bytes_read = self.bytes_read();
        self.retained_records_read = self.records_read();
        for slot in &self.inputs {
            slot.input.lock().dispose();
        }
        self.disposed = true;
        debug!(
            "Disposed partition {} ({} inputs, {} bytes read)",
            self.number,
            self.inputs.len(),
            self.retained_bytes_read
        );
    }
}

struct MergeState<T> {
    partitions: Vec<Partition<T>>,
    /// Partitions receiving inputs from `add_input`
    active: Range<usize>,
    /// Partition the consumer is reading; `partitions.len()` once all are done
    current: usize,
    /// Bumped on every partition change so strategies can drop stale cursors
    generation: u64,
    partitions_fixed: bool,
    disposed: bool,
}

impl<T> MergeState<T> {
    fn current(&self) -> Option<&Partition<T>> {
        self.partitions.get(self.current)
    }

    fn current_input_count(&self) -> usize {
        self.current().map_or(0, |p| p.inputs.len())
    }
}

/// Collects per-partition inputs from many producers for one consumer.
pub struct MultiInputRecordReader<T> {
    config: MergeReaderConfig,
    state: Mutex<MergeState<T>>,
    inputs_changed: Condvar,
    subscribers: Mutex<Vec<Sender<MergeEvent>>>,
}

impl<T> MultiInputRecordReader<T> {
    /// Create a reader whose first partition group is `partitions`, in the order
    /// producers will supply inputs for them.
    pub fn new(config: MergeReaderConfig, partitions: &[u32]) -> Result<Arc<Self>> {
        if config.total_input_count == 0 {
            return Err(ShuffleError::invalid_argument(
                "total_input_count",
                "a partition needs at least one input",
            ));
        }
        validate_new_partitions(&[], partitions)?;
        info!(
            "Merge reader over partitions {:?}, {} inputs each",
            partitions, config.total_input_count
        );
        Ok(Arc::new(Self {
            config,
            state: Mutex::new(MergeState {
                partitions: partitions.iter().map(|&n| Partition::new(n)).collect(),
                active: 0..partitions.len(),
                current: 0,
                generation: 0,
                partitions_fixed: false,
                disposed: false,
            }),
            inputs_changed: Condvar::new(),
            subscribers: Mutex::new(Vec::new()),
        }))
    }

    pub fn config(&self) -> &MergeReaderConfig {
        &self.config
    }

    pub fn total_input_count(&self) -> usize {
        self.config.total_input_count
    }

    /// Attach one input to each partition of the active group, in group order.
    ///
    /// Memory-based inputs are placed ahead of disk inputs the consumer has not been
    /// given yet; inputs already handed out never move.
    pub fn add_input(&self, inputs: Vec<RecordInput<T>>) -> Result<()> {
        let mut events = Vec::with_capacity(inputs.len());
        {
            let mut state = self.state.lock();
            if state.disposed {
                return Err(ShuffleError::Disposed("merge reader"));
            }
            let active = state.active.clone();
            if inputs.len() != active.len() {
                return Err(ShuffleError::invalid_argument(
                    "inputs",
                    format!(
                        "got {} inputs for {} active partitions",
                        inputs.len(),
                        active.len()
                    ),
                ));
            }
            let total = self.config.total_input_count;
            if let Some(full) = state.partitions[active.clone()]
                .iter()
                .find(|p| p.inputs.len() >= total)
            {
                return Err(ShuffleError::invalid_argument(
                    "inputs",
                    format!(
                        "partition {} already has all {} inputs",
                        full.number, total
                    ),
                ));
            }

            for (partition, input) in state.partitions[active].iter_mut().zip(inputs) {
                let input = input.buffer_size(self.config.buffer_size);
                debug!(
                    "Partition {} input {} of {}: {}",
                    partition.number,
                    partition.inputs.len() + 1,
                    total,
                    input.source_name()
                );
                partition.insert(input);
                if partition.disposed {
                    // Skipped partitions still count inputs but never read them.
                    for slot in &partition.inputs {
                        slot.input.lock().dispose();
                    }
                }
                events.push(MergeEvent::InputAdded {
                    partition: partition.number,
                    input_count: partition.inputs.len(),
                });
            }
        }
        self.inputs_changed.notify_all();
        self.publish(&events);
        Ok(())
    }

    /// Block until the current partition has at least `min_count` inputs.
    ///
    /// Returns `false` if `timeout` elapses first, if the reader is disposed, or if
    /// `min_count` exceeds the number of inputs a partition can ever have.
    pub fn wait_for_inputs(&self, min_count: usize, timeout: Option<Duration>) -> bool {
        if min_count > self.config.total_input_count {
            warn!(
                "Waiting for {} inputs, but partitions only get {}",
                min_count, self.config.total_input_count
            );
            return false;
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if state.disposed {
                return false;
            }
            if state.current_input_count() >= min_count {
                return true;
            }
            match deadline {
                None => self.inputs_changed.wait(&mut state),
                Some(deadline) => {
                    if self
                        .inputs_changed
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        return !state.disposed && state.current_input_count() >= min_count;
                    }
                }
            }
        }
    }

    /// Open a new group of partitions for subsequent `add_input` calls.
    ///
    /// Only allowed once every partition of the current group has all its inputs.
    pub fn assign_additional_partitions(&self, partitions: &[u32]) -> Result<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(ShuffleError::Disposed("merge reader"));
        }
        if state.partitions_fixed {
            return Err(ShuffleError::invalid_state(
                "this merge reader works on a fixed set of partitions",
            ));
        }
        let total = self.config.total_input_count;
        if let Some(open) = state.partitions[state.active.clone()]
            .iter()
            .find(|p| p.inputs.len() < total)
        {
            return Err(ShuffleError::invalid_state(format!(
                "partition {} has {} of {} inputs",
                open.number,
                open.inputs.len(),
                total
            )));
        }
        let existing: Vec<u32> = state.partitions.iter().map(|p| p.number).collect();
        validate_new_partitions(&existing, partitions)?;

        let start = state.partitions.len();
        state
            .partitions
            .extend(partitions.iter().map(|&n| Partition::new(n)));
        state.active = start..state.partitions.len();
        info!("Assigned additional partitions {:?}", partitions);
        drop(state);
        self.inputs_changed.notify_all();
        Ok(())
    }

    /// Move the consumer to the next partition, disposing the one just finished.
    ///
    /// `accept` is asked about each candidate partition in turn; returning `false`
    /// skips it. Returns whether a new current partition was reached.
    pub fn next_partition(&self, mut accept: impl FnMut(u32) -> bool) -> Result<bool> {
        let changed;
        {
            let mut state = self.state.lock();
            if state.disposed {
                return Err(ShuffleError::Disposed("merge reader"));
            }
            let finished = state.current;
            if let Some(partition) = state.partitions.get_mut(finished) {
                partition.dispose();
            }
            let mut next = finished + 1;
            while let Some(partition) = state.partitions.get_mut(next) {
                if accept(partition.number) {
                    break;
                }
                info!("Skipping partition {}", partition.number);
                partition.dispose();
                next += 1;
            }
            state.current = next.min(state.partitions.len());
            state.generation += 1;
            changed = state.current().map(|p| p.number);
        }
        self.inputs_changed.notify_all();
        match changed {
            Some(partition) => {
                info!("Now reading partition {partition}");
                self.publish(&[MergeEvent::PartitionChanged { partition }]);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Input `index` of the current partition.
    ///
    /// From this call on, the input keeps `index` even when memory-based inputs arrive.
    pub fn input(&self, index: usize) -> Result<SharedInput<T>> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(ShuffleError::Disposed("merge reader"));
        }
        let current = state.current;
        let partition = state.partitions.get_mut(current).ok_or_else(|| {
            ShuffleError::invalid_state("all partitions have been read")
        })?;
        let slot = partition.inputs.get(index).ok_or_else(|| {
            ShuffleError::invalid_argument(
                "index",
                format!(
                    "partition {} has {} inputs",
                    partition.number,
                    partition.inputs.len()
                ),
            )
        })?;
        let input = slot.input.clone();
        partition.handed_out = partition.handed_out.max(index + 1);
        Ok(input)
    }

    /// The `arrival`-th input attached to the current partition, regardless of where
    /// memory-first ordering placed it. Hands the input out like [`input`](Self::input).
    pub fn input_by_arrival(&self, arrival: usize) -> Result<SharedInput<T>> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(ShuffleError::Disposed("merge reader"));
        }
        let current = state.current;
        let partition = state.partitions.get_mut(current).ok_or_else(|| {
            ShuffleError::invalid_state("all partitions have been read")
        })?;
        let index = partition
            .inputs
            .iter()
            .position(|slot| slot.arrival == arrival)
            .ok_or_else(|| {
                ShuffleError::invalid_argument(
                    "arrival",
                    format!(
                        "partition {} has {} inputs",
                        partition.number,
                        partition.inputs.len()
                    ),
                )
            })?;
        partition.handed_out = partition.handed_out.max(index + 1);
        Ok(partition.inputs[index].input.clone())
    }

    pub fn current_partition(&self) -> Option<u32> {
        self.state.lock().current().map(|p| p.number)
    }

    pub fn current_input_count(&self) -> usize {
        self.state.lock().current_input_count()
    }

    /// Whether the current partition has received every input it will get.
    pub fn is_current_partition_complete(&self) -> bool {
        self.current_input_count() >= self.config.total_input_count
    }

    /// Changes whenever the current partition changes.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Numbers of all partitions assigned so far, in reading order.
    pub fn partition_numbers(&self) -> Vec<u32> {
        self.state.lock().partitions.iter().map(|p| p.number).collect()
    }

    pub fn partition_count(&self) -> usize {
        self.state.lock().partitions.len()
    }

    /// Bytes read from all inputs, including partitions already disposed.
    pub fn bytes_read(&self) -> u64 {
        self.state.lock().partitions.iter().map(|p| p.bytes_read()).sum()
    }

    pub fn records_read(&self) -> u64 {
        self.state.lock().partitions.iter().map(|p| p.records_read()).sum()
    }

    /// Receive a [`MergeEvent`] for every input added and every partition change.
    pub fn subscribe(&self) -> Receiver<MergeEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, events: &[MergeEvent]) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| events.iter().all(|e| tx.send(*e).is_ok()));
    }

    /// Refuse further partition groups; returns how many partitions exist now.
    pub(crate) fn fix_partitions(&self) -> usize {
        let mut state = self.state.lock();
        state.partitions_fixed = true;
        state.partitions.len()
    }

    /// Whether any input of the current partition from `index` on may have records.
    pub(crate) fn has_records_from(&self, index: usize) -> bool {
        let state = self.state.lock();
        state.current().is_some_and(|p| {
            p.inputs
                .iter()
                .skip(index)
                .any(|slot| slot.input.lock().has_records())
        })
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Dispose every partition and input. Later calls fail with `Disposed`.
    ///
    /// A consumer blocked in `wait_for_inputs` is woken and gets `false`.
    pub fn dispose(&self) {
        {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            for partition in &mut state.partitions {
                partition.dispose();
            }
            state.disposed = true;
        }
        info!("Merge reader disposed");
        self.inputs_changed.notify_all();
        self.subscribers.lock().clear();
    }
}

fn validate_new_partitions(existing: &[u32], new: &[u32]) -> Result<()> {
    if new.is_empty() {
        return Err(ShuffleError::invalid_argument(
            "partitions",
            "at least one partition is required",
        ));
    }
    for (i, number) in new.iter().enumerate() {
        if existing.contains(number) || new[..i].contains(number) {
            return Err(ShuffleError::invalid_argument(
                "partitions",
                format!("partition {number} is assigned twice"),
            ));
        }
    }
    Ok(())
}

/// Read one record from a shared input, naming the input in any failure.
pub(crate) fn read_input<T>(input: &Mutex<RecordInput<T>>) -> Result<Option<T>>
where
    T: crate::codec::BinaryRecord,
{
    let mut input = input.lock();
    let result = input.reader().and_then(|reader| reader.read());
    result.map_err(|err| ShuffleError::upstream(input.source_name(), err))
}

/// Like [`read_input`], overwriting `record` in place.
pub(crate) fn read_input_into<T>(input: &Mutex<RecordInput<T>>, record: &mut T) -> Result<bool>
where
    T: crate::codec::BinaryRecord,
{
    let mut input = input.lock();
    let result = input.reader().and_then(|reader| reader.read_into(record));
    result.map_err(|err| ShuffleError::upstream(input.source_name(), err))
}
