use std::marker::PhantomData;
use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use crate::config::{PartitionerConfig, TaskContext};
use crate::diskio::fs::FileSystemClient;
use crate::error::{Result, ShuffleError};
use crate::partition::split_points::SplitPointTable;
use crate::partition::trie::PartitionTrie;
use crate::partition::{PartitionKey, Partitioner};

/// Routes records to partitions by comparing their keys with sampled split points.
///
/// The split point file is read from the task's local job directory on first use
/// and the trie built from it serves every later lookup.
pub struct RangePartitioner<T> {
    context: TaskContext,
    config: PartitionerConfig,
    fs: Arc<dyn FileSystemClient>,
    trie: Mutex<Option<Arc<PartitionTrie>>>,
    _marker: PhantomData<fn(&T)>,
}

impl<T> RangePartitioner<T> {
    pub fn new(
        context: TaskContext,
        config: PartitionerConfig,
        fs: Arc<dyn FileSystemClient>,
    ) -> Self {
        Self {
            context,
            config,
            fs,
            trie: Mutex::new(None),
            _marker: PhantomData,
        }
    }

    /// The trie, loading the split points first if this is the first call.
    pub fn trie(&self) -> Result<Arc<PartitionTrie>> {
        let mut slot = self.trie.lock();
        if let Some(trie) = slot.as_ref() {
            return Ok(trie.clone());
        }
        let path = self.context.local_path(&self.config.split_file_name);
        let table = SplitPointTable::load(
            self.fs.as_ref(),
            &path,
            self.config.key_size,
            self.context.partition_count,
        )?;
        info!(
            "Loaded {} split points from {}",
            table.len(),
            path.display()
        );
        let trie = Arc::new(PartitionTrie::new(table, &self.config));
        *slot = Some(trie.clone());
        Ok(trie)
    }

    pub fn partition_for_key(&self, key: &[u8]) -> Result<u32> {
        Ok(self.trie()?.partition_for_key(key))
    }
}

impl<T: PartitionKey> Partitioner<T> for RangePartitioner<T> {
    fn partition_for(&self, record: &T, partition_count: u32) -> Result<u32> {
        let trie = self.trie()?;
        if trie.partition_count() != partition_count as usize {
            return Err(ShuffleError::invalid_argument(
                "partition_count",
                format!(
                    "split points define {} partitions, not {}",
                    trie.partition_count(),
                    partition_count
                ),
            ));
        }
        Ok(trie.partition_for_key(record.key_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diskio::fs::LocalFileSystem;
    use crate::gensort::{GenSortRecord, generate_records};
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_loads_split_file_once() {
        let dir = TempDir::new().unwrap();
        let fs: Arc<dyn FileSystemClient> = Arc::new(LocalFileSystem::new());
        let context = TaskContext::new(dir.path(), 3);
        let table = SplitPointTable::new(10, b"HHHHHHHHHHPPPPPPPPPP".to_vec()).unwrap();
        table
            .write_to(fs.as_ref(), &context.local_path("splits"))
            .unwrap();

        let partitioner = RangePartitioner::<GenSortRecord>::new(
            context.clone(),
            PartitionerConfig::default(),
            fs.clone(),
        );
        let records = generate_records(200, 9);
        for record in &records {
            let p = partitioner.partition_for(record, 3).unwrap();
            assert_eq!(p, table.linear_partition(record.key()));
        }
        // Later lookups never touch the file again.
        fs.delete(&context.local_path("splits")).unwrap();
        assert!(partitioner.partition_for(&records[0], 3).is_ok());
        assert!(partitioner.partition_for(&records[0], 4).is_err());
    }

    #[test]
    fn test_missing_or_malformed_split_file() {
        let dir = TempDir::new().unwrap();
        let fs: Arc<dyn FileSystemClient> = Arc::new(LocalFileSystem::with_root(dir.path()));
        let context = TaskContext::new("job", 4);
        let partitioner = RangePartitioner::<GenSortRecord>::new(
            context,
            PartitionerConfig::default(),
            fs.clone(),
        );
        assert!(matches!(partitioner.trie().err().unwrap(), ShuffleError::Io(_)));

        let mut writer = fs.create_for_write(Path::new("job/splits")).unwrap();
        std::io::Write::write_all(&mut writer, b"too short").unwrap();
        drop(writer);
        assert!(partitioner.trie().err().unwrap().is_format());
    }
}
