mod common;

use std::cmp::Ordering;
use std::thread;
use std::time::Duration;

use common::{buffer_input, drain, file_input, local_fs, test_dir};
use shuffle_io::compare::Pair;
use shuffle_io::merge::FnJoiner;
use shuffle_io::{InnerJoinReader, MergeReaderConfig, MultiInputRecordReader, ShuffleError};

type Row = Pair<u32, String>;

fn rows(values: &[(u32, &str)]) -> Vec<Row> {
    values
        .iter()
        .map(|&(k, v)| Pair::new(k, v.to_string()))
        .collect()
}

fn key_order(outer: &Row, inner: &Row) -> Ordering {
    outer.key.cmp(&inner.key)
}

fn concat(outer: &Row, inner: &Row) -> (u32, String, String) {
    (outer.key, outer.value.clone(), inner.value.clone())
}

#[test]
fn test_join_of_late_file_inputs() {
    let dir = test_dir();
    let fs = local_fs(dir.path());
    let merge = MultiInputRecordReader::new(MergeReaderConfig::new(2), &[0]).unwrap();
    let mut reader =
        InnerJoinReader::new(merge.clone(), FnJoiner::new(key_order, concat)).unwrap();

    let producer = {
        let merge = merge.clone();
        thread::spawn(move || {
            let outer = rows(&[(1, "a"), (1, "b"), (2, "x")]);
            let inner = rows(&[(1, "p"), (2, "q"), (3, "r")]);
            merge
                .add_input(vec![file_input(&fs, "orders", &outer)])
                .unwrap();
            thread::sleep(Duration::from_millis(20));
            merge
                .add_input(vec![file_input(&fs, "customers", &inner)])
                .unwrap();
        })
    };

    let joined = drain(&mut reader);
    producer.join().unwrap();
    assert_eq!(
        joined,
        vec![
            (1, "a".to_string(), "p".to_string()),
            (1, "b".to_string(), "p".to_string()),
            (2, "x".to_string(), "q".to_string()),
        ]
    );
}

#[test]
fn test_file_outer_keeps_its_side_against_memory_inner() {
    let dir = test_dir();
    let fs = local_fs(dir.path());
    let merge = MultiInputRecordReader::new(MergeReaderConfig::new(2), &[0]).unwrap();
    merge
        .add_input(vec![file_input(&fs, "orders", &rows(&[(1, "a"), (1, "b"), (2, "x")]))])
        .unwrap();
    merge
        .add_input(vec![buffer_input(&rows(&[(1, "p"), (2, "q"), (3, "r")]))])
        .unwrap();

    let mut reader = InnerJoinReader::new(merge, FnJoiner::new(key_order, concat)).unwrap();
    assert_eq!(
        drain(&mut reader),
        vec![
            (1, "a".to_string(), "p".to_string()),
            (1, "b".to_string(), "p".to_string()),
            (2, "x".to_string(), "q".to_string()),
        ]
    );
}

#[test]
fn test_join_matches_nested_loop() {
    let mut outer: Vec<Row> = (0..300)
        .map(|i| Pair::new((i * 7) % 50, format!("o{i}")))
        .collect();
    let mut inner: Vec<Row> = (0..200)
        .map(|i| Pair::new((i * 3) % 70, format!("i{i}")))
        .collect();
    outer.sort_by_key(|r| r.key);
    inner.sort_by_key(|r| r.key);

    let mut expected = Vec::new();
    for o in &outer {
        for i in inner.iter().filter(|i| i.key == o.key) {
            expected.push(concat(o, i));
        }
    }

    let merge = MultiInputRecordReader::new(MergeReaderConfig::new(2), &[0]).unwrap();
    merge.add_input(vec![buffer_input(&outer)]).unwrap();
    merge.add_input(vec![buffer_input(&inner)]).unwrap();
    let mut reader = InnerJoinReader::new(merge, FnJoiner::new(key_order, concat)).unwrap();
    assert_eq!(drain(&mut reader), expected);
}

#[test]
fn test_join_reader_requires_one_partition_of_two_inputs() {
    let merge = MultiInputRecordReader::<Row>::new(MergeReaderConfig::new(2), &[0, 1]).unwrap();
    let err = InnerJoinReader::new(merge, FnJoiner::new(key_order, concat))
        .err()
        .unwrap();
    assert!(matches!(err, ShuffleError::InvalidArgument { argument: "partitions", .. }));

    let merge = MultiInputRecordReader::<Row>::new(MergeReaderConfig::new(1), &[0]).unwrap();
    assert!(InnerJoinReader::new(merge, FnJoiner::new(key_order, concat)).is_err());
}
