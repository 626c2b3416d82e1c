#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Once};

use bytes::Bytes;
use shuffle_io::diskio::compression::PassThroughCodec;
use shuffle_io::input::write_shuffle_file;
use shuffle_io::{
    BinaryRecord, BinaryRecordWriter, FileSystemClient, InputSource, LocalFileSystem, RecordInput,
    RecordReader, RecordWriter,
};
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Route crate logging through the test harness once per test binary.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn test_dir() -> TempDir {
    init_logging();
    TempDir::new().expect("Failed to create test directory")
}

pub fn local_fs(root: &Path) -> Arc<dyn FileSystemClient> {
    Arc::new(LocalFileSystem::with_root(root))
}

/// In-memory length-prefixed stream of `records`.
pub fn buffer_input<T: BinaryRecord>(records: &[T]) -> RecordInput<T> {
    let mut writer = BinaryRecordWriter::<T, _>::new(Vec::new()).with_length_prefix(true);
    for record in records {
        writer.write(record).unwrap();
    }
    RecordInput::new(InputSource::Buffer(Bytes::from(writer.finish().unwrap())))
}

/// Shuffle file holding `records`, as an upstream task would leave it.
pub fn file_input<T: BinaryRecord>(
    fs: &Arc<dyn FileSystemClient>,
    name: &str,
    records: &[T],
) -> RecordInput<T> {
    write_shuffle_file(fs.as_ref(), Path::new(name), &PassThroughCodec, records).unwrap();
    RecordInput::new(InputSource::file(name, fs.clone()))
}

pub fn drain<T>(reader: &mut dyn RecordReader<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Some(record) = reader.read().unwrap() {
        out.push(record);
    }
    out
}
