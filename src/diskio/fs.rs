//! File system client used for shuffle files.
//!
//! The distributed file system is an external collaborator; the merge reader, the
//! record inputs and the split point loader only need these three capabilities.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

pub trait FileSystemClient: Send + Sync {
    fn open_for_read(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    /// Create (or truncate) a file for writing, creating parent directories as needed.
    fn create_for_write(&self, path: &Path) -> Result<Box<dyn Write + Send>>;

    fn delete(&self, path: &Path) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;
}

/// [`FileSystemClient`] over the local disk
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem {
    root: Option<PathBuf>,
    buffer_size: usize,
}

impl LocalFileSystem {
    pub fn new() -> Self {
        Self {
            root: None,
            buffer_size: 64 * 1024,
        }
    }

    /// Resolve relative paths against `root`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: Some(root.as_ref().to_path_buf()),
            buffer_size: 64 * 1024,
        }
    }

    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl FileSystemClient for LocalFileSystem {
    fn open_for_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = File::open(self.resolve(path))?;
        Ok(Box::new(BufReader::with_capacity(self.buffer_size.max(1), file)))
    }

    fn create_for_write(&self, path: &Path) -> Result<Box<dyn Write + Send>> {
        let path = self.resolve(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Box::new(BufWriter::with_capacity(self.buffer_size.max(1), file)))
    }

    fn delete(&self, path: &Path) -> Result<()> {
        fs::remove_file(self.resolve(path))?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_delete() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystem::with_root(dir.path());
        let path = Path::new("nested/part_0.dat");

        {
            let mut writer = fs.create_for_write(path).unwrap();
            writer.write_all(b"partition data").unwrap();
            writer.flush().unwrap();
        }
        assert!(fs.exists(path));

        let mut data = String::new();
        fs.open_for_read(path)
            .unwrap()
            .read_to_string(&mut data)
            .unwrap();
        assert_eq!(data, "partition data");

        fs.delete(path).unwrap();
        assert!(!fs.exists(path));
        assert!(fs.open_for_read(path).is_err());
    }
}
