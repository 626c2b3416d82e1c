use std::cmp::Ordering;
use std::io::{Read, Write};
use std::path::Path;

use log::{debug, info};

use crate::codec::BinaryRecord;
use crate::compare::FixedBytesComparator;
use crate::config::PartitionerConfig;
use crate::diskio::fs::FileSystemClient;
use crate::error::{Result, ShuffleError};
use crate::input::RecordInput;
use crate::partition::PartitionKey;
use crate::sort::{IndexEntry, sort};

/// The `partition_count - 1` keys separating adjacent output partitions.
///
/// Keys have a fixed width and are kept in ascending order; partition `i` receives
/// the keys `k` with `split[i - 1] <= k < split[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPointTable {
    key_size: usize,
    keys: Vec<u8>,
}

impl SplitPointTable {
    /// Table over the concatenated `keys`; must hold whole, ascending keys.
    pub fn new(key_size: usize, keys: Vec<u8>) -> Result<Self> {
        if key_size == 0 {
            return Err(ShuffleError::invalid_argument("key_size", "must be at least 1"));
        }
        if keys.len() % key_size != 0 {
            return Err(ShuffleError::format(format!(
                "{} bytes of split points is not a multiple of the key size {}",
                keys.len(),
                key_size
            )));
        }
        let table = Self { key_size, keys };
        if (1..table.len()).any(|i| table.key(i - 1) > table.key(i)) {
            return Err(ShuffleError::format("split points are not in ascending order"));
        }
        Ok(table)
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Number of split points.
    pub fn len(&self) -> usize {
        self.keys.len() / self.key_size
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn partition_count(&self) -> usize {
        self.len() + 1
    }

    pub fn key(&self, index: usize) -> &[u8] {
        &self.keys[index * self.key_size..(index + 1) * self.key_size]
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.keys.chunks_exact(self.key_size)
    }

    /// Compare split point `index` with the leading `key_size` bytes of `key`.
    pub(crate) fn compare(&self, index: usize, key: &[u8]) -> Ordering {
        self.key(index).cmp(&key[..key.len().min(self.key_size)])
    }

    /// Partition of `key` in `[begin, end)` by scanning for the first larger split.
    pub(crate) fn scan(&self, key: &[u8], begin: usize, end: usize) -> usize {
        (begin..end)
            .find(|&i| self.compare(i, key) == Ordering::Greater)
            .unwrap_or(end)
    }

    /// Partition of `key` by a scan over the whole table.
    pub fn linear_partition(&self, key: &[u8]) -> u32 {
        self.scan(key, 0, self.len()) as u32
    }

    /// Persist as a flat concatenation of keys.
    pub fn write_to(&self, fs: &dyn FileSystemClient, path: &Path) -> Result<()> {
        let mut writer = fs.create_for_write(path)?;
        writer.write_all(&self.keys)?;
        writer.flush()?;
        debug!("Wrote {} split points to {}", self.len(), path.display());
        Ok(())
    }

    /// Load a table written by [`write_to`](Self::write_to), checking that it holds
    /// exactly `partition_count - 1` keys.
    pub fn load(
        fs: &dyn FileSystemClient,
        path: &Path,
        key_size: usize,
        partition_count: usize,
    ) -> Result<Self> {
        let mut keys = Vec::new();
        fs.open_for_read(path)?.read_to_end(&mut keys)?;
        let expected = partition_count.saturating_sub(1) * key_size;
        if keys.len() != expected {
            return Err(ShuffleError::format(format!(
                "{}: expected {} split points of {} bytes for {} partitions, found {} bytes",
                path.display(),
                partition_count.saturating_sub(1),
                key_size,
                partition_count,
                keys.len()
            )));
        }
        Self::new(key_size, keys)
    }
}

/// Sample keys from `inputs` and choose split points for `partition_count` partitions.
///
/// Up to `max_sample_groups` evenly spaced inputs are sampled, each contributing an
/// equal share of `sample_size` leading records. The sampled keys are sorted and
/// split point `i` is the key at rank `round(i * samples / partition_count)`.
pub fn build_split_points<T>(
    inputs: &mut [RecordInput<T>],
    partition_count: usize,
    sample_size: usize,
    config: &PartitionerConfig,
) -> Result<SplitPointTable>
where
    T: BinaryRecord + PartitionKey,
{
    let key_size = config.key_size;
    if partition_count == 0 {
        return Err(ShuffleError::invalid_argument(
            "partition_count",
            "must be at least 1",
        ));
    }
    if key_size == 0 {
        return Err(ShuffleError::invalid_argument("key_size", "must be at least 1"));
    }
    if partition_count == 1 {
        return SplitPointTable::new(key_size, Vec::new());
    }
    if inputs.is_empty() || sample_size == 0 || config.max_sample_groups == 0 {
        return Err(ShuffleError::invalid_argument(
            "inputs",
            "no records available to sample",
        ));
    }

    let groups = config.max_sample_groups.min(inputs.len());
    let quota = sample_size.div_ceil(groups);
    let mut buffer = Vec::with_capacity(quota * groups * key_size);
    let mut index = Vec::with_capacity(quota * groups);
    for group in 0..groups {
        let input = &mut inputs[group * inputs.len() / groups];
        let name = input.source_name().to_string();
        let reader = input.reader()?;
        let mut taken = 0;
        while taken < quota {
            let Some(record) = reader
                .read()
                .map_err(|err| ShuffleError::upstream(name.as_str(), err))?
            else {
                break;
            };
            let key = record.key_bytes();
            if key.len() < key_size {
                return Err(ShuffleError::invalid_argument(
                    "key_size",
                    format!("{name} has a key of {} bytes, need {key_size}", key.len()),
                ));
            }
            index.push(IndexEntry::new(buffer.len() as u32, key_size as u32));
            buffer.extend_from_slice(&key[..key_size]);
            taken += 1;
        }
        debug!("Sampled {taken} keys from {name}");
    }
    if index.is_empty() {
        return Err(ShuffleError::invalid_argument(
            "inputs",
            "no records available to sample",
        ));
    }

    sort::<T, _>(&mut index, &buffer, &FixedBytesComparator::new(key_size))?;

    let samples = index.len();
    let mut keys = Vec::with_capacity((partition_count - 1) * key_size);
    for i in 1..partition_count {
        let rank = ((i * samples) as f64 / partition_count as f64).round() as usize;
        let entry = index[rank.min(samples - 1)];
        let key = entry
            .bytes(&buffer)
            .ok_or_else(|| ShuffleError::invalid_state("sample index is out of bounds"))?;
        keys.extend_from_slice(key);
    }
    info!(
        "Chose {} split points from {} keys sampled across {} inputs",
        partition_count - 1,
        samples,
        groups
    );
    SplitPointTable::new(key_size, keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diskio::fs::LocalFileSystem;
    use crate::gensort::generate_records;
    use crate::input::InputSource;
    use tempfile::TempDir;

    fn table(keys: &[&[u8; 2]]) -> SplitPointTable {
        SplitPointTable::new(2, keys.iter().flat_map(|k| k.iter().copied()).collect()).unwrap()
    }

    #[test]
    fn test_linear_partition() {
        let t = table(&[b"bb", b"dd", b"dd", b"ff"]);
        assert_eq!(t.partition_count(), 5);
        assert_eq!(t.linear_partition(b"aa"), 0);
        assert_eq!(t.linear_partition(b"bb"), 1);
        assert_eq!(t.linear_partition(b"cz"), 1);
        assert_eq!(t.linear_partition(b"dd"), 3);
        assert_eq!(t.linear_partition(b"zz"), 4);
        assert_eq!(t.linear_partition(b"ddxyz"), 3);
    }

    #[test]
    fn test_table_validation() {
        assert!(SplitPointTable::new(2, vec![1, 2, 3]).unwrap_err().is_format());
        assert!(SplitPointTable::new(1, vec![5, 3]).unwrap_err().is_format());
        assert!(SplitPointTable::new(0, vec![]).is_err());
    }

    #[test]
    fn test_write_and_load() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystem::with_root(dir.path());
        let t = table(&[b"ab", b"cd", b"ef"]);
        t.write_to(&fs, Path::new("splits")).unwrap();
        assert_eq!(SplitPointTable::load(&fs, Path::new("splits"), 2, 4).unwrap(), t);
        let err = SplitPointTable::load(&fs, Path::new("splits"), 2, 3).unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn test_build_split_points_from_gensort_inputs() {
        let records = generate_records(1000, 17);
        let mut inputs: Vec<RecordInput<_>> = records
            .chunks(100)
            .map(|chunk| RecordInput::new(InputSource::Records(chunk.to_vec())))
            .collect();
        let table =
            build_split_points(&mut inputs, 4, 1000, &PartitionerConfig::default()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.key_size(), 10);

        let mut counts = [0usize; 4];
        for record in &records {
            counts[table.linear_partition(record.key()) as usize] += 1;
        }
        assert!(counts.iter().all(|&c| (200..=300).contains(&c)), "{counts:?}");
    }

    #[test]
    fn test_build_samples_evenly_spaced_inputs() {
        let records = generate_records(600, 5);
        // 30 inputs, only every third one is sampled.
        let mut inputs: Vec<RecordInput<_>> = records
            .chunks(20)
            .map(|chunk| RecordInput::new(InputSource::Records(chunk.to_vec())))
            .collect();
        let config = PartitionerConfig::default();
        let table = build_split_points(&mut inputs, 3, 50, &config).unwrap();
        assert_eq!(table.len(), 2);
        let sampled: Vec<usize> = (0..30).filter(|&i| inputs[i].records_read() > 0).collect();
        assert_eq!(sampled, vec![0, 3, 6, 9, 12, 15, 18, 21, 24, 27]);
        assert!(inputs.iter().all(|i| i.records_read() <= 5));
    }

    #[test]
    fn test_single_partition_and_empty_inputs() {
        let mut none: Vec<RecordInput<crate::gensort::GenSortRecord>> = Vec::new();
        let config = PartitionerConfig::default();
        assert!(build_split_points(&mut none, 1, 10, &config).unwrap().is_empty());
        assert!(build_split_points(&mut none, 2, 10, &config).is_err());
        let mut empty = vec![RecordInput::new(InputSource::Records(Vec::<
            crate::gensort::GenSortRecord,
        >::new()))];
        assert!(build_split_points(&mut empty, 2, 10, &config).is_err());
    }
}
