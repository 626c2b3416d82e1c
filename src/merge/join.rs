//! Sort-merge inner equi-join of two sorted inputs.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;

use crate::RecordReader;
use crate::codec::BinaryRecord;
use crate::error::{Result, ShuffleError};
use crate::merge::{MultiInputRecordReader, SharedInput, read_input};

/// Key comparison and output construction for [`InnerJoinReader`].
pub trait Joiner<T>: Send {
    type Output;

    /// Compare the join keys of an outer and an inner record.
    fn compare_keys(&self, outer: &T, inner: &T) -> Ordering;

    fn join(&self, outer: &T, inner: &T) -> Self::Output;
}

/// [`Joiner`] built from two closures.
pub struct FnJoiner<C, F, O> {
    compare: C,
    join: F,
    _output: PhantomData<fn() -> O>,
}

impl<C, F, O> FnJoiner<C, F, O> {
    pub fn new(compare: C, join: F) -> Self {
        Self {
            compare,
            join,
            _output: PhantomData,
        }
    }
}

impl<T, O, C, F> Joiner<T> for FnJoiner<C, F, O>
where
    C: Fn(&T, &T) -> Ordering + Send,
    F: Fn(&T, &T) -> O + Send,
{
    type Output = O;

    fn compare_keys(&self, outer: &T, inner: &T) -> Ordering {
        (self.compare)(outer, inner)
    }

    fn join(&self, outer: &T, inner: &T) -> O {
        (self.join)(outer, inner)
    }
}

/// Joins the first attached input (outer) with the second (inner) of a
/// single-partition merge reader.
///
/// Both inputs must be sorted by the join key. Inner records sharing a key are
/// buffered so that duplicate outer keys see the whole group; each match yields one
/// output record.
pub struct InnerJoinReader<T, J> {
    merge: Arc<MultiInputRecordReader<T>>,
    joiner: J,
    outer: Option<SharedInput<T>>,
    inner: Option<SharedInput<T>>,
    /// Outer record currently being joined against `group`
    current: Option<T>,
    /// Inner records with the key of `current`
    group: Vec<T>,
    group_pos: usize,
    /// First inner record past `group`
    lookahead: Option<T>,
    inner_done: bool,
    records_read: u64,
}

impl<T: BinaryRecord, J: Joiner<T>> InnerJoinReader<T, J> {
    /// Fails unless `merge` covers exactly one partition with two inputs. From here on
    /// the merge reader refuses additional partitions.
    pub fn new(merge: Arc<MultiInputRecordReader<T>>, joiner: J) -> Result<Self> {
        if merge.total_input_count() != 2 {
            return Err(ShuffleError::invalid_argument(
                "total_input_count",
                format!(
                    "a join reads exactly 2 inputs, not {}",
                    merge.total_input_count()
                ),
            ));
        }
        let partitions = merge.fix_partitions();
        if partitions != 1 {
            return Err(ShuffleError::invalid_argument(
                "partitions",
                format!("a join reads exactly 1 partition, not {partitions}"),
            ));
        }
        Ok(Self {
            merge,
            joiner,
            outer: None,
            inner: None,
            current: None,
            group: Vec::new(),
            group_pos: 0,
            lookahead: None,
            inner_done: false,
            records_read: 0,
        })
    }

    fn open_inputs(&mut self) -> Result<(SharedInput<T>, SharedInput<T>)> {
        if let (Some(outer), Some(inner)) = (&self.outer, &self.inner) {
            return Ok((outer.clone(), inner.clone()));
        }
        if !self.merge.wait_for_inputs(2, None) {
            return Err(ShuffleError::Disposed("merge reader"));
        }
        // Sides follow arrival order; memory inputs may sit ahead of file inputs.
        let outer = self.merge.input_by_arrival(0)?;
        let inner = self.merge.input_by_arrival(1)?;
        debug!(
            "Joining {} with {}",
            outer.lock().source_name(),
            inner.lock().source_name()
        );
        self.outer = Some(outer.clone());
        self.inner = Some(inner.clone());
        Ok((outer, inner))
    }

    fn next_inner(&mut self, inner: &SharedInput<T>) -> Result<Option<T>> {
        if let Some(record) = self.lookahead.take() {
            return Ok(Some(record));
        }
        if self.inner_done {
            return Ok(None);
        }
        let next = read_input(inner)?;
        self.inner_done = next.is_none();
        Ok(next)
    }

    /// Collect the inner records whose key equals `outer`'s, dropping smaller ones.
    fn load_group(&mut self, outer: &T, inner: &SharedInput<T>) -> Result<()> {
        self.group.clear();
        while let Some(candidate) = self.next_inner(inner)? {
            match self.joiner.compare_keys(outer, &candidate) {
                Ordering::Greater => continue,
                Ordering::Equal => self.group.push(candidate),
                Ordering::Less => {
                    self.lookahead = Some(candidate);
                    break;
                }
            }
        }
        Ok(())
    }
}

impl<T: BinaryRecord, J: Joiner<T>> RecordReader<J::Output> for InnerJoinReader<T, J>
where
    J::Output: Send,
{
    fn read(&mut self) -> Result<Option<J::Output>> {
        let (outer_input, inner_input) = self.open_inputs()?;
        loop {
            if let Some(outer) = &self.current {
                if let Some(inner) = self.group.get(self.group_pos) {
                    self.group_pos += 1;
                    self.records_read += 1;
                    return Ok(Some(self.joiner.join(outer, inner)));
                }
            }

            let Some(outer) = read_input(&outer_input)? else {
                self.current = None;
                return Ok(None);
            };
            let same_key = self
                .group
                .first()
                .is_some_and(|first| self.joiner.compare_keys(&outer, first) == Ordering::Equal);
            if !same_key {
                if self.inner_done && self.lookahead.is_none() {
                    // No inner records left to match.
                    self.current = None;
                    self.group.clear();
                    return Ok(None);
                }
                self.load_group(&outer, &inner_input)?;
            }
            self.current = Some(outer);
            self.group_pos = 0;
        }
    }

    fn has_records(&self) -> bool {
        self.group_pos < self.group.len()
            || self
                .outer
                .as_ref()
                .is_none_or(|outer| outer.lock().has_records())
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
    use crate::compare::Pair;
    use crate::config::MergeReaderConfig;
    use crate::input::{InputSource, RecordInput};

    type Row = Pair<u32, String>;

    fn rows(values: &[(u32, &str)]) -> RecordInput<Row> {
        RecordInput::new(InputSource::Records(
            values
                .iter()
                .map(|&(k, v)| Pair::new(k, v.to_string()))
                .collect(),
        ))
    }

    fn by_key() -> FnJoiner<
        impl Fn(&Row, &Row) -> Ordering + Send,
        impl Fn(&Row, &Row) -> (u32, String, String) + Send,
        (u32, String, String),
    > {
        FnJoiner::new(
            |a: &Row, b: &Row| a.key.cmp(&b.key),
            |a: &Row, b: &Row| (a.key, a.value.clone(), b.value.clone()),
        )
    }

    fn join(outer: &[(u32, &str)], inner: &[(u32, &str)]) -> Vec<(u32, String, String)> {
        let merge = MultiInputRecordReader::new(MergeReaderConfig::new(2), &[0]).unwrap();
        merge.add_input(vec![rows(outer)]).unwrap();
        merge.add_input(vec![rows(inner)]).unwrap();
        let mut reader = InnerJoinReader::new(merge, by_key()).unwrap();
        let mut out = Vec::new();
        while let Some(row) = reader.read().unwrap() {
            out.push(row);
        }
        out
    }

    fn row(k: u32, a: &str, b: &str) -> (u32, String, String) {
        (k, a.to_string(), b.to_string())
    }

    #[test]
    fn test_join_with_duplicate_outer_keys() {
        let out = join(
            &[(1, "a"), (1, "b"), (2, "x")],
            &[(1, "p"), (2, "q"), (3, "r")],
        );
        assert_eq!(out, vec![row(1, "a", "p"), row(1, "b", "p"), row(2, "x", "q")]);
    }

    #[test]
    fn test_join_cross_product_and_gaps() {
        let out = join(
            &[(0, "z"), (2, "a"), (2, "b"), (5, "c"), (7, "d")],
            &[(1, "w"), (2, "p"), (2, "q"), (6, "s"), (7, "t")],
        );
        assert_eq!(
            out,
            vec![
                row(2, "a", "p"),
                row(2, "a", "q"),
                row(2, "b", "p"),
                row(2, "b", "q"),
                row(7, "d", "t"),
            ]
        );
    }

    #[test]
    fn test_join_with_empty_side() {
        assert!(join(&[], &[(1, "p")]).is_empty());
        assert!(join(&[(1, "a")], &[]).is_empty());
    }

    #[test]
    fn test_join_rejects_bad_shapes() {
        let merge = MultiInputRecordReader::<Row>::new(MergeReaderConfig::new(3), &[0]).unwrap();
        assert!(InnerJoinReader::new(merge, by_key()).is_err());

        let merge = MultiInputRecordReader::<Row>::new(MergeReaderConfig::new(2), &[0, 1]).unwrap();
        assert!(InnerJoinReader::new(merge, by_key()).is_err());

        let merge = MultiInputRecordReader::<Row>::new(MergeReaderConfig::new(2), &[0]).unwrap();
        merge.add_input(vec![rows(&[])]).unwrap();
        merge.add_input(vec![rows(&[])]).unwrap();
        let _reader = InnerJoinReader::new(merge.clone(), by_key()).unwrap();
        assert!(matches!(
            merge.assign_additional_partitions(&[1]).unwrap_err(),
            ShuffleError::InvalidState(_)
        ));
    }
}
