use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::RecordReader;
use crate::codec::Writable;
use crate::compare::{FixedBytesComparator, RawComparator, SortableRecord};
use crate::error::{Result, ShuffleError};
use crate::partition::PartitionKey;
use crate::writable_record;

// GenSort format constants
pub const KEY_SIZE: usize = 10;
pub const PAYLOAD_SIZE: usize = 90;
pub const RECORD_SIZE: usize = KEY_SIZE + PAYLOAD_SIZE;

/// One 100-byte record of the GraySort benchmark: a 10-byte key and a 90-byte payload.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenSortRecord {
    data: [u8; RECORD_SIZE],
}

impl GenSortRecord {
    pub fn new(data: [u8; RECORD_SIZE]) -> Self {
        Self { data }
    }

    pub fn key(&self) -> &[u8] {
        &self.data[..KEY_SIZE]
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[KEY_SIZE..]
    }

    pub fn as_bytes(&self) -> &[u8; RECORD_SIZE] {
        &self.data
    }
}

impl Default for GenSortRecord {
    fn default() -> Self {
        Self {
            data: [0; RECORD_SIZE],
        }
    }
}

impl std::fmt::Debug for GenSortRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenSortRecord")
            .field("key", &hex::encode(self.key()))
            .finish()
    }
}

impl Writable for GenSortRecord {
    fn write_to(&self, writer: &mut dyn Write) -> Result<()> {
        writer.write_all(&self.data)?;
        Ok(())
    }

    fn read_from(&mut self, reader: &mut dyn Read) -> Result<()> {
        reader
            .read_exact(&mut self.data)
            .map_err(|e| ShuffleError::from_read(e, "a gensort record"))
    }
}

writable_record!(GenSortRecord);

impl SortableRecord for GenSortRecord {
    fn raw_comparator() -> Option<Arc<dyn RawComparator<Self>>> {
        Some(Arc::new(FixedBytesComparator::new(KEY_SIZE)))
    }
}

impl PartitionKey for GenSortRecord {
    fn key_bytes(&self) -> &[u8] {
        self.key()
    }
}

/// Reads the records of a gensort file or stream.
pub struct GenSortReader<R: Read> {
    reader: R,
    records_read: u64,
    done: bool,
}

impl GenSortReader<BufReader<File>> {
    /// Open a gensort file; its size must be a whole number of records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        if size % RECORD_SIZE as u64 != 0 {
            return Err(ShuffleError::format(format!(
                "{}: size {} is not a multiple of the record size {}",
                path.display(),
                size,
                RECORD_SIZE
            )));
        }
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> GenSortReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            records_read: 0,
            done: false,
        }
    }

    /// Fill `buf` completely; `false` on a clean end of stream.
    fn fill(&mut self, buf: &mut [u8; RECORD_SIZE]) -> Result<bool> {
        let mut filled = 0;
        while filled < RECORD_SIZE {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        match filled {
            0 => {
                self.done = true;
                Ok(false)
            }
            RECORD_SIZE => Ok(true),
            partial => Err(ShuffleError::format(format!(
                "gensort stream ends with a partial record of {partial} bytes"
            ))),
        }
    }
}

impl<R: Read + Send> RecordReader<GenSortRecord> for GenSortReader<R> {
    fn read(&mut self) -> Result<Option<GenSortRecord>> {
        let mut record = GenSortRecord::default();
        Ok(self.read_into(&mut record)?.then_some(record))
    }

    fn read_into(&mut self, record: &mut GenSortRecord) -> Result<bool> {
        if self.done || !self.fill(&mut record.data)? {
            return Ok(false);
        }
        self.records_read += 1;
        Ok(true)
    }

    fn has_records(&self) -> bool {
        !self.done
    }

    fn records_read(&self) -> u64 {
        self.records_read
    }

    fn bytes_read(&self) -> u64 {
        self.records_read * RECORD_SIZE as u64
    }
}

/// Generate `count` records with printable ASCII keys, repeatable for a given seed.
///
/// Payloads follow the gensort ASCII layout: the record number in hex, then filler.
pub fn generate_records(count: usize, seed: u64) -> Vec<GenSortRecord> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..count)
        .map(|row| {
            let mut data = [b' '; RECORD_SIZE];
            for byte in &mut data[..KEY_SIZE] {
                *byte = rng.random_range(b' '..=b'~');
            }
            let row_id = format!("{row:032X}");
            data[12..44].copy_from_slice(row_id.as_bytes());
            let filler = b"0123456789ABCDEF"[row % 16];
            data[48..96].fill(filler);
            data[98] = b'\r';
            data[99] = b'\n';
            GenSortRecord::new(data)
        })
        .collect()
}

/// Write records back to back as a gensort file. Returns the number of records.
pub fn write_gensort_file<'a>(
    path: impl AsRef<Path>,
    records: impl IntoIterator<Item = &'a GenSortRecord>,
) -> Result<u64> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut count = 0;
    for record in records {
        writer.write_all(record.as_bytes())?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}
