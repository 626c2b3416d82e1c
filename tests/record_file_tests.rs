mod common;

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::thread;

use common::{drain, test_dir};
use shuffle_io::codec::record_file::MARKER_LEN;
use shuffle_io::gensort::generate_records;
use shuffle_io::{
    GenSortRecord, RecordFileConfig, RecordFileReader, RecordFileWriter, RecordReader,
    RecordWriter,
};

fn write_file(path: &Path, records: &[GenSortRecord], interval: usize) -> [u8; MARKER_LEN] {
    let config = RecordFileConfig {
        marker_interval: interval,
    };
    let mut writer =
        RecordFileWriter::<GenSortRecord, _>::new(BufWriter::new(File::create(path).unwrap()), config)
            .unwrap();
    for record in records {
        writer.write(record).unwrap();
    }
    assert_eq!(writer.records_written(), records.len() as u64);
    let marker = *writer.marker();
    writer.finish().unwrap();
    marker
}

#[test]
fn test_gensort_records_round_trip_through_file() {
    let dir = test_dir();
    let path = dir.path().join("records.srf");
    let records = generate_records(500, 7);
    write_file(&path, &records, 1000);

    let mut reader = RecordFileReader::<GenSortRecord, _>::open(File::open(&path).unwrap()).unwrap();
    assert_eq!(drain(&mut reader), records);
    assert_eq!(reader.records_read(), 500);
    assert!(!reader.has_records());
}

#[test]
fn test_parallel_range_readers_cover_file_once() {
    let dir = test_dir();
    let path = dir.path().join("ranges.srf");
    let records = generate_records(3000, 11);
    write_file(&path, &records, 2000);
    let len = std::fs::metadata(&path).unwrap().len();

    // Uneven split sizes so that boundaries land inside records and sync blocks.
    let splits = 7u64;
    let bounds: Vec<u64> = (0..=splits).map(|i| i * len / splits + i % 3).collect();
    let bounds: Vec<u64> = bounds
        .iter()
        .enumerate()
        .map(|(i, &b)| if i as u64 == splits { len } else { b.min(len) })
        .collect();

    let parts: Vec<Vec<GenSortRecord>> = thread::scope(|scope| {
        let handles: Vec<_> = bounds
            .windows(2)
            .map(|range| {
                let (start, end) = (range[0], range[1]);
                let path = &path;
                scope.spawn(move || {
                    let file = File::open(path).unwrap();
                    let mut reader =
                        RecordFileReader::<GenSortRecord, _>::open_range(file, start, end).unwrap();
                    drain(&mut reader)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let joined: Vec<GenSortRecord> = parts.into_iter().flatten().collect();
    assert_eq!(joined, records);
}

#[test]
fn test_reader_rejects_other_record_type() {
    let dir = test_dir();
    let path = dir.path().join("typed.srf");
    write_file(&path, &generate_records(10, 3), 2000);
    let result = RecordFileReader::<u64, _>::open(File::open(&path).unwrap());
    assert!(result.is_err());
}

#[test]
fn test_truncated_file_is_format_error() {
    let dir = test_dir();
    let path = dir.path().join("truncated.srf");
    write_file(&path, &generate_records(20, 5), 2000);
    let len = std::fs::metadata(&path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 37).unwrap();

    let mut reader = RecordFileReader::<GenSortRecord, _>::open(File::open(&path).unwrap()).unwrap();
    let err = loop {
        match reader.read() {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("truncation went unnoticed"),
            Err(err) => break err,
        }
    };
    assert!(err.is_format());
}
