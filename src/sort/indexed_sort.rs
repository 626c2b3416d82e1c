//! Quicksort of an index over one shared byte buffer.
//!
//! Only the `(offset, length)` entries move; the encoded records stay where they were
//! written. Equal keys are grouped by a three-way partition and never revisited, and
//! the larger side of every partition is handled by the loop instead of recursion, so
//! the stack stays logarithmic in the index length.

use std::cmp::Ordering;

use crate::RawRecordView;
use crate::compare::RawComparator;
use crate::error::{Result, ShuffleError};

/// Slices shorter than this are insertion sorted.
pub const INSERTION_SORT_THRESHOLD: usize = 13;

/// Location of one encoded record inside a shared buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset: u32,
    pub length: u32,
}

impl IndexEntry {
    pub fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> usize {
        self.offset as usize + self.length as usize
    }

    /// The record's bytes, if the entry lies inside `buffer`.
    pub fn bytes<'a>(&self, buffer: &'a [u8]) -> Option<&'a [u8]> {
        buffer.get(self.offset as usize..self.end())
    }

    pub fn view<'a>(&self, buffer: &'a [u8]) -> Result<RawRecordView<'a>> {
        RawRecordView::new(buffer, self.offset as usize, self.length as usize)
    }

    // Callers have checked the entry against the buffer.
    fn slice<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        &buffer[self.offset as usize..self.end()]
    }
}

/// Sort the whole index.
pub fn sort<T, C>(index: &mut [IndexEntry], buffer: &[u8], comparator: &C) -> Result<()>
where
    C: RawComparator<T> + ?Sized,
{
    let count = index.len();
    sort_range::<T, C>(index, 0, count, buffer, comparator)
}

/// Sort `index[offset..offset + count]`, leaving the rest of the index untouched.
///
/// A range outside the index, or an entry in the range that points past the end of
/// `buffer`, is rejected before anything moves.
pub fn sort_range<T, C>(
    index: &mut [IndexEntry],
    offset: usize,
    count: usize,
    buffer: &[u8],
    comparator: &C,
) -> Result<()>
where
    C: RawComparator<T> + ?Sized,
{
    let end = offset
        .checked_add(count)
        .filter(|&end| end <= index.len())
        .ok_or_else(|| {
            ShuffleError::invalid_argument(
                "count",
                format!(
                    "range {offset}+{count} exceeds index of {} entries",
                    index.len()
                ),
            )
        })?;
    let range = &mut index[offset..end];
    if let Some(bad) = range.iter().position(|e| e.end() > buffer.len()) {
        return Err(ShuffleError::invalid_argument(
            "index",
            format!(
                "entry {} ({}+{}) points past the buffer end {}",
                offset + bad,
                range[bad].offset,
                range[bad].length,
                buffer.len()
            ),
        ));
    }
    quicksort::<T, C>(range, buffer, comparator)
}

/// Whether `index` is in ascending order.
pub fn is_sorted<T, C>(index: &[IndexEntry], buffer: &[u8], comparator: &C) -> Result<bool>
where
    C: RawComparator<T> + ?Sized,
{
    for pair in index.windows(2) {
        let (a, b) = match (pair[0].bytes(buffer), pair[1].bytes(buffer)) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(ShuffleError::invalid_argument(
                    "index",
                    "entry points past the buffer end",
                ));
            }
        };
        if comparator.compare_raw(a, b)? == Ordering::Greater {
            return Ok(false);
        }
    }
    Ok(true)
}

fn compare<T, C>(a: IndexEntry, b: IndexEntry, buffer: &[u8], comparator: &C) -> Result<Ordering>
where
    C: RawComparator<T> + ?Sized,
{
    comparator.compare_raw(a.slice(buffer), b.slice(buffer))
}

fn quicksort<T, C>(mut v: &mut [IndexEntry], buffer: &[u8], comparator: &C) -> Result<()>
where
    C: RawComparator<T> + ?Sized,
{
    loop {
        let len = v.len();
        if len < INSERTION_SORT_THRESHOLD {
            return insertion_sort::<T, C>(v, buffer, comparator);
        }

        // Median of three, leaving the median in the middle.
        let mid = len / 2;
        let last = len - 1;
        if compare::<T, C>(v[mid], v[0], buffer, comparator)? == Ordering::Less {
            v.swap(0, mid);
        }
        if compare::<T, C>(v[last], v[0], buffer, comparator)? == Ordering::Less {
            v.swap(0, last);
        }
        if compare::<T, C>(v[last], v[mid], buffer, comparator)? == Ordering::Less {
            v.swap(mid, last);
        }
        let pivot = v[mid];

        // v[..lt] < pivot, v[lt..i] == pivot, v[gt..] > pivot
        let (mut lt, mut i, mut gt) = (0, 0, len);
        while i < gt {
            match compare::<T, C>(v[i], pivot, buffer, comparator)? {
                Ordering::Less => {
                    v.swap(lt, i);
                    lt += 1;
                    i += 1;
                }
                Ordering::Greater => {
                    gt -= 1;
                    v.swap(i, gt);
                }
                Ordering::Equal => i += 1,
            }
        }

        let (left, rest) = std::mem::take(&mut v).split_at_mut(lt);
        let right = &mut rest[gt - lt..];
        if left.len() < right.len() {
            quicksort::<T, C>(left, buffer, comparator)?;
            v = right;
        } else {
            quicksort::<T, C>(right, buffer, comparator)?;
            v = left;
        }
    }
}

fn insertion_sort<T, C>(v: &mut [IndexEntry], buffer: &[u8], comparator: &C) -> Result<()>
where
    C: RawComparator<T> + ?Sized,
{
    for i in 1..v.len() {
        let mut j = i;
        while j > 0 && compare::<T, C>(v[j], v[j - 1], buffer, comparator)? == Ordering::Less {
            v.swap(j, j - 1);
            j -= 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BinaryRecord;
    use crate::compare::{FixedBytesComparator, InvertedComparator, default_comparator};
    use crate::gensort::GenSortRecord;
    use rand::Rng;

    fn encode_all<T: BinaryRecord>(records: &[T]) -> (Vec<u8>, Vec<IndexEntry>) {
        let mut buffer = Vec::new();
        let mut index = Vec::new();
        for record in records {
            let start = buffer.len();
            record.encode(&mut buffer).unwrap();
            index.push(IndexEntry::new(start as u32, (buffer.len() - start) as u32));
        }
        (buffer, index)
    }

    fn decode_all<T: BinaryRecord>(buffer: &[u8], index: &[IndexEntry]) -> Vec<T> {
        index
            .iter()
            .map(|e| T::decode(&mut e.bytes(buffer).unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn test_sort_matches_value_sort() {
        let mut rng = rand::rng();
        for len in [0usize, 1, 2, 12, 13, 14, 100, 5000] {
            let records: Vec<i64> = (0..len).map(|_| rng.random_range(-1000..1000)).collect();
            let (buffer, mut index) = encode_all(&records);
            let cmp = default_comparator::<i64>();
            sort(&mut index, &buffer, cmp.as_ref()).unwrap();

            let mut expected = records.clone();
            expected.sort();
            assert_eq!(decode_all::<i64>(&buffer, &index), expected, "len = {len}");
            assert!(is_sorted(&index, &buffer, cmp.as_ref()).unwrap());
        }
    }

    #[test]
    fn test_sort_variable_length_strings() {
        let mut rng = rand::rng();
        let records: Vec<String> = (0..2000)
            .map(|_| {
                let len = rng.random_range(0..8);
                (0..len).map(|_| rng.random_range(b'a'..=b'e') as char).collect()
            })
            .collect();
        let (buffer, mut index) = encode_all(&records);
        sort(&mut index, &buffer, default_comparator::<String>().as_ref()).unwrap();

        let mut expected = records;
        expected.sort();
        assert_eq!(decode_all::<String>(&buffer, &index), expected);
    }

    #[test]
    fn test_heavily_duplicated_keys() {
        let records: Vec<u8> = (0..10_000).map(|i| (i % 3) as u8).collect();
        let (buffer, mut index) = encode_all(&records);
        sort(&mut index, &buffer, default_comparator::<u8>().as_ref()).unwrap();
        let sorted = decode_all::<u8>(&buffer, &index);
        assert_eq!(sorted.iter().filter(|&&b| b == 0).count(), 3334);
        assert!(sorted.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_descending_with_inverted_comparator() {
        let records: Vec<u32> = (0..500).collect();
        let (buffer, mut index) = encode_all(&records);
        let cmp = InvertedComparator::new(default_comparator::<u32>());
        sort::<u32, _>(&mut index, &buffer, &cmp).unwrap();
        assert_eq!(decode_all::<u32>(&buffer, &index), (0..500).rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_sort_range_leaves_rest_untouched() {
        let records = vec![9u32, 8, 7, 6, 5, 4, 3, 2, 1, 0];
        let (buffer, mut index) = encode_all(&records);
        sort_range(&mut index, 2, 5, &buffer, default_comparator::<u32>().as_ref()).unwrap();
        assert_eq!(
            decode_all::<u32>(&buffer, &index),
            vec![9, 8, 3, 4, 5, 6, 7, 2, 1, 0]
        );
    }

    #[test]
    fn test_out_of_range_arguments_are_rejected() {
        let (buffer, mut index) = encode_all(&[1u32, 2, 3]);
        let cmp = default_comparator::<u32>();
        assert!(sort_range(&mut index, 2, 2, &buffer, cmp.as_ref()).is_err());
        assert!(sort_range(&mut index, usize::MAX, 2, &buffer, cmp.as_ref()).is_err());

        index[1] = IndexEntry::new(10, 4);
        let before = index.clone();
        let err = sort(&mut index, &buffer, cmp.as_ref()).unwrap_err();
        assert!(matches!(err, ShuffleError::InvalidArgument { argument: "index", .. }));
        assert_eq!(index, before);
    }

    #[test]
    fn test_sort_gensort_keys() {
        let records = crate::gensort::generate_records(300, 7);
        let mut buffer = Vec::new();
        let mut index = Vec::new();
        for record in &records {
            index.push(IndexEntry::new(buffer.len() as u32, 100));
            record.encode(&mut buffer).unwrap();
        }
        let cmp = FixedBytesComparator::new(10);
        sort::<GenSortRecord, _>(&mut index, &buffer, &cmp).unwrap();
        let keys: Vec<&[u8]> = index.iter().map(|e| &e.bytes(&buffer).unwrap()[..10]).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    }
}
