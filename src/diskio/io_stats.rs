//! Shared I/O counters.
//!
//! A tracker is cheap to clone; all clones update the same counters, so one tracker
//! can be handed to every reader or writer of a phase and summarised at the end.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the counters of an [`IoStatsTracker`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoStats {
    pub read_ops: u64,
    pub read_bytes: u64,
    pub write_ops: u64,
    pub write_bytes: u64,
}

impl std::fmt::Display for IoStats {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "read: {} ops, {:.2} MB, write: {} ops, {:.2} MB",
            self.read_ops,
            self.read_bytes as f64 / (1024.0 * 1024.0),
            self.write_ops,
            self.write_bytes as f64 / (1024.0 * 1024.0)
        )
    }
}

#[derive(Default, Debug)]
struct Counters {
    read_ops: AtomicU64,
    read_bytes: AtomicU64,
    write_ops: AtomicU64,
    write_bytes: AtomicU64,
}

#[derive(Clone, Default, Debug)]
pub struct IoStatsTracker {
    counters: Arc<Counters>,
}

impl IoStatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read(&self, ops: u64, bytes: u64) {
        self.counters.read_ops.fetch_add(ops, Ordering::Relaxed);
        self.counters.read_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_write(&self, ops: u64, bytes: u64) {
        self.counters.write_ops.fetch_add(ops, Ordering::Relaxed);
        self.counters.write_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn stats(&self) -> IoStats {
        IoStats {
            read_ops: self.counters.read_ops.load(Ordering::Relaxed),
            read_bytes: self.counters.read_bytes.load(Ordering::Relaxed),
            write_ops: self.counters.write_ops.load(Ordering::Relaxed),
            write_bytes: self.counters.write_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Reader decorator that reports every read to a tracker
pub struct CountingReader<R> {
    inner: R,
    tracker: IoStatsTracker,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R, tracker: IoStatsTracker) -> Self {
        Self { inner, tracker }
    }

    pub fn tracker(&self) -> &IoStatsTracker {
        &self.tracker
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.tracker.add_read(1, n as u64);
        Ok(n)
    }
}

/// Writer decorator that reports every write to a tracker
pub struct CountingWriter<W> {
    inner: W,
    tracker: IoStatsTracker,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W, tracker: IoStatsTracker) -> Self {
        Self { inner, tracker }
    }

    pub fn tracker(&self) -> &IoStatsTracker {
        &self.tracker
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.tracker.add_write(1, n as u64);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let tracker = IoStatsTracker::new();
        let other = tracker.clone();
        tracker.add_read(1, 100);
        other.add_write(2, 50);

        let stats = tracker.stats();
        assert_eq!(stats.read_ops, 1);
        assert_eq!(stats.read_bytes, 100);
        assert_eq!(stats.write_ops, 2);
        assert_eq!(stats.write_bytes, 50);
    }

    #[test]
    fn test_counting_reader_and_writer() {
        let tracker = IoStatsTracker::new();
        let mut writer = CountingWriter::new(Vec::new(), tracker.clone());
        writer.write_all(b"hello world").unwrap();
        let data = writer.into_inner();

        let mut reader = CountingReader::new(&data[..], tracker.clone());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(out, b"hello world");
        assert_eq!(tracker.stats().write_bytes, 11);
        assert_eq!(tracker.stats().read_bytes, 11);
    }
}
