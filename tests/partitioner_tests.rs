mod common;

use std::sync::Arc;

use common::{local_fs, test_dir};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use shuffle_io::gensort::{KEY_SIZE, generate_records};
use shuffle_io::partition::Partitioner;
use shuffle_io::{
    GenSortRecord, HashPartitioner, InputSource, PartitionTrie, PartitionerConfig,
    RangePartitioner, RecordInput, TaskContext, build_split_points,
};

const PARTITIONS: usize = 4;

fn inputs_of(records: &[GenSortRecord], count: usize) -> Vec<RecordInput<GenSortRecord>> {
    records
        .chunks(records.len().div_ceil(count))
        .map(|chunk| RecordInput::new(InputSource::Records(chunk.to_vec())))
        .collect()
}

#[test]
fn test_range_partitioner_balances_random_keys() {
    let dir = test_dir();
    let fs = local_fs(dir.path());
    let config = PartitionerConfig::default();
    let context = TaskContext::new("job", PARTITIONS);

    let records = generate_records(1000, 42);
    let mut inputs = inputs_of(&records, 4);
    let table = build_split_points(&mut inputs, PARTITIONS, 1000, &config).unwrap();
    table
        .write_to(fs.as_ref(), &context.local_path(&config.split_file_name))
        .unwrap();

    let partitioner = RangePartitioner::<GenSortRecord>::new(context, config, fs);
    let mut counts = [0usize; PARTITIONS];
    for record in &records {
        let p = partitioner
            .partition_for(record, PARTITIONS as u32)
            .unwrap();
        counts[p as usize] += 1;
    }
    for (p, &count) in counts.iter().enumerate() {
        assert!((200..=300).contains(&count), "partition {p} got {count} records");
    }
}

#[test]
fn test_trie_agrees_with_linear_scan() {
    let config = PartitionerConfig::default();
    let records = generate_records(5000, 9);
    let mut inputs = inputs_of(&records, 12);
    let table = build_split_points(&mut inputs, 16, 800, &config).unwrap();
    let trie = PartitionTrie::new(table.clone(), &config);

    // Sampled and unsampled keys, then keys with bytes outside the 7-bit alphabet.
    for record in &records {
        assert_eq!(
            trie.partition_for_key(record.key()),
            table.linear_partition(record.key())
        );
    }
    let mut rng = SmallRng::seed_from_u64(3);
    for _ in 0..5000 {
        let key: [u8; KEY_SIZE] = rng.random();
        assert_eq!(trie.partition_for_key(&key), table.linear_partition(&key));
    }
    for i in 0..table.len() {
        let split = table.key(i).to_vec();
        assert_eq!(trie.partition_for_key(&split), i as u32 + 1);
    }
}

#[test]
fn test_partitioners_are_shareable_across_threads() {
    let dir = test_dir();
    let fs = local_fs(dir.path());
    let config = PartitionerConfig::default();
    let context = TaskContext::new("shared", PARTITIONS);
    let records = generate_records(2000, 77);
    let table = build_split_points(&mut inputs_of(&records, 2), PARTITIONS, 500, &config).unwrap();
    table
        .write_to(fs.as_ref(), &context.local_path(&config.split_file_name))
        .unwrap();

    let range: Arc<dyn Partitioner<GenSortRecord>> =
        Arc::new(RangePartitioner::new(context, config, fs));
    let hash: Arc<dyn Partitioner<GenSortRecord>> = Arc::new(HashPartitioner::new());
    let expected: Vec<(u32, u32)> = records
        .iter()
        .map(|r| {
            (
                range.partition_for(r, PARTITIONS as u32).unwrap(),
                hash.partition_for(r, PARTITIONS as u32).unwrap(),
            )
        })
        .collect();

    std::thread::scope(|scope| {
        for chunk in 0..4 {
            let (range, hash, records, expected) = (&range, &hash, &records, &expected);
            scope.spawn(move || {
                for i in (chunk..records.len()).step_by(4) {
                    let got = (
                        range.partition_for(&records[i], PARTITIONS as u32).unwrap(),
                        hash.partition_for(&records[i], PARTITIONS as u32).unwrap(),
                    );
                    assert_eq!(got, expected[i]);
                }
            });
        }
    });
}
