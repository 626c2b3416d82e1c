use std::cmp::Ordering;
use std::sync::Arc;

use crate::RawReader;
use crate::compare::RawComparator;
use crate::error::Result;

/// K-way merge of sorted raw record streams.
///
/// Keeps the head record of every source in a min-heap of source indices. Equal
/// records come out in source order, so merging sorted runs that were cut from one
/// input in order is stable.
///
/// The heap is hand-rolled rather than a `BinaryHeap` because `compare_raw` can fail,
/// and an `Ord` impl has no way to report the error.
pub struct RawMergeIterator<T, S: RawReader> {
    sources: Vec<S>,
    heads: Vec<Vec<u8>>,
    heap: Vec<usize>,
    comparator: Arc<dyn RawComparator<T>>,
    current: Vec<u8>,
    primed: bool,
    records_merged: u64,
}

impl<T, S: RawReader> RawMergeIterator<T, S> {
    pub fn new(sources: Vec<S>, comparator: Arc<dyn RawComparator<T>>) -> Self {
        let heads = vec![Vec::new(); sources.len()];
        Self {
            sources,
            heads,
            heap: Vec::new(),
            comparator,
            current: Vec::new(),
            primed: false,
            records_merged: 0,
        }
    }

    pub fn records_merged(&self) -> u64 {
        self.records_merged
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn bytes_read(&self) -> u64 {
        self.sources.iter().map(|s| s.bytes_read()).sum()
    }

    /// Load the next record of `source` into its head slot; `false` once it is drained.
    fn advance(&mut self, source: usize) -> Result<bool> {
        match self.sources[source].read_raw()? {
            Some(bytes) => {
                let head = &mut self.heads[source];
                head.clear();
                head.extend_from_slice(bytes);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn prime(&mut self) -> Result<()> {
        for source in 0..self.sources.len() {
            if self.advance(source)? {
                self.heap.push(source);
                self.sift_up(self.heap.len() - 1)?;
            }
        }
        self.primed = true;
        Ok(())
    }

    fn less(&self, a: usize, b: usize) -> Result<bool> {
        let (sa, sb) = (self.heap[a], self.heap[b]);
        Ok(
            match self.comparator.compare_raw(&self.heads[sa], &self.heads[sb])? {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => sa < sb,
            },
        )
    }

    fn sift_up(&mut self, mut pos: usize) -> Result<()> {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.less(pos, parent)? {
                break;
            }
            self.heap.swap(pos, parent);
            pos = parent;
        }
        Ok(())
    }

    fn sift_down(&mut self, mut pos: usize) -> Result<()> {
        loop {
            let left = 2 * pos + 1;
            if left >= self.heap.len() {
                return Ok(());
            }
            let right = left + 1;
            let mut smallest = left;
            if right < self.heap.len() && self.less(right, left)? {
                smallest = right;
            }
            if !self.less(smallest, pos)? {
                return Ok(());
            }
            self.heap.swap(pos, smallest);
            pos = smallest;
        }
    }

    /// The next record in merged order; valid until the next call.
    pub fn next_raw(&mut self) -> Result<Option<&[u8]>> {
        if !self.primed {
            self.prime()?;
        }
        let Some(&source) = self.heap.first() else {
            return Ok(None);
        };
        std::mem::swap(&mut self.current, &mut self.heads[source]);
        if self.advance(source)? {
            self.sift_down(0)?;
        } else {
            let last = self.heap.len() - 1;
            self.heap.swap(0, last);
            self.heap.pop();
            self.sift_down(0)?;
        }
        self.records_merged += 1;
        Ok(Some(&self.current))
    }

    pub fn into_sources(self) -> Vec<S> {
        self.sources
    }
}
