//! Configuration for readers, writers and partitioners.
//!
//! Values arrive from the job scheduler (through [`TaskContext`]) or from the
//! command line; everything here is plain data with sensible defaults.

use std::path::{Path, PathBuf};

/// Task-level configuration supplied by the job scheduler.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Directory holding the task's local working files (split points, spills)
    pub local_job_directory: PathBuf,
    /// Number of output partitions of the task
    pub partition_count: usize,
}

impl TaskContext {
    pub fn new(local_job_directory: impl AsRef<Path>, partition_count: usize) -> Self {
        Self {
            local_job_directory: local_job_directory.as_ref().to_path_buf(),
            partition_count,
        }
    }

    /// Resolve a file name inside the local job directory.
    pub fn local_path(&self, file_name: &str) -> PathBuf {
        self.local_job_directory.join(file_name)
    }
}

/// Settings for a multi-input merge reader
#[derive(Debug, Clone, Copy)]
pub struct MergeReaderConfig {
    /// Number of inputs each partition expects before it is complete
    pub total_input_count: usize,
    /// Whether inputs may reuse one record instance between reads
    pub allow_record_reuse: bool,
    /// Read buffer size used for file-backed inputs
    pub buffer_size: usize,
}

impl Default for MergeReaderConfig {
    fn default() -> Self {
        Self {
            total_input_count: 1,
            allow_record_reuse: false,
            buffer_size: 64 * 1024,
        }
    }
}

impl MergeReaderConfig {
    pub fn new(total_input_count: usize) -> Self {
        Self {
            total_input_count,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn allow_record_reuse(mut self, allow: bool) -> Self {
        self.allow_record_reuse = allow;
        self
    }

    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}

/// Settings for sampling split points and routing keys through the partition trie
#[derive(Debug, Clone)]
pub struct PartitionerConfig {
    /// Width in bytes of a partitioning key
    pub key_size: usize,
    /// Upper bound on the number of inputs sampled
    pub max_sample_groups: usize,
    /// Maximum depth of the partition trie
    pub trie_depth: usize,
    /// Number of children of an inner trie node (128 for 7-bit ASCII keys)
    pub alphabet_size: usize,
    /// Name of the split point file inside the local job directory
    pub split_file_name: String,
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        Self {
            key_size: 10,
            max_sample_groups: 10,
            trie_depth: 2,
            alphabet_size: 128,
            split_file_name: "splits".to_string(),
        }
    }
}

impl PartitionerConfig {
    #[must_use]
    pub fn key_size(mut self, key_size: usize) -> Self {
        self.key_size = key_size;
        self
    }

    #[must_use]
    pub fn max_sample_groups(mut self, groups: usize) -> Self {
        self.max_sample_groups = groups;
        self
    }

    #[must_use]
    pub fn trie_depth(mut self, depth: usize) -> Self {
        self.trie_depth = depth;
        self
    }

    #[must_use]
    pub fn alphabet_size(mut self, size: usize) -> Self {
        self.alphabet_size = size.clamp(1, 256);
        self
    }

    #[must_use]
    pub fn split_file_name(mut self, name: impl Into<String>) -> Self {
        self.split_file_name = name.into();
        self
    }
}

/// Settings for record files
#[derive(Debug, Clone, Copy)]
pub struct RecordFileConfig {
    /// Approximate number of bytes written between two record markers
    pub marker_interval: usize,
}

impl Default for RecordFileConfig {
    fn default() -> Self {
        Self {
            marker_interval: 2000,
        }
    }
}
