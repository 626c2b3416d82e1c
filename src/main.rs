use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand};
use crossbeam::channel::bounded;
use log::info;
use shuffle_io::gensort::{self, GenSortReader};
use shuffle_io::partition::Partitioner;
use shuffle_io::{
    FileSystemClient, GenSortRecord, InputSource, LocalFileSystem, MergeReaderConfig,
    MultiInputRecordReader, PartitionerConfig, RangePartitioner, RecordInput, RecordReader,
    RecordSortBuffer, SortedMergeReader, TaskContext, build_split_points,
};

#[derive(Parser)]
#[command(name = "shuffle-io", about = "Range-partitioned GraySort over the shuffle layer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate gensort input files
    Gen {
        /// Directory for the generated files
        #[arg(short, long)]
        dir: PathBuf,

        /// Number of files
        #[arg(short, long, default_value = "4")]
        files: usize,

        /// Records per file
        #[arg(short = 'n', long, default_value = "100000")]
        records: usize,

        #[arg(long, default_value = "1")]
        seed: u64,
    },
    /// Sample input files and write split points into the job directory
    Sample {
        #[arg(short, long)]
        job_dir: PathBuf,

        #[arg(short, long, default_value = "4")]
        partitions: usize,

        /// Total number of keys to sample
        #[arg(long, default_value = "10000")]
        sample_size: usize,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Route every input file into sorted per-partition shuffle files
    Partition {
        #[arg(short, long)]
        job_dir: PathBuf,

        #[arg(short, long, default_value = "4")]
        partitions: usize,

        /// Sort buffer size per partition
        #[arg(short, long, default_value = "64")]
        memory_mb: usize,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Merge the shuffle files of every partition into sorted output files
    Sort {
        #[arg(short, long)]
        job_dir: PathBuf,

        #[arg(short, long, default_value = "4")]
        partitions: usize,

        /// Directory for the sorted partition files
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Check that files are sorted, each after the one before
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Gen {
            dir,
            files,
            records,
            seed,
        } => generate(&dir, files, records, seed),
        Command::Sample {
            job_dir,
            partitions,
            sample_size,
            inputs,
        } => sample(&job_dir, partitions, sample_size, &inputs),
        Command::Partition {
            job_dir,
            partitions,
            memory_mb,
            inputs,
        } => partition(&job_dir, partitions, memory_mb, &inputs),
        Command::Sort {
            job_dir,
            partitions,
            output,
        } => sort(&job_dir, partitions, &output),
        Command::Validate { files } => validate(&files),
    }
}

fn generate(dir: &Path, files: usize, records: usize, seed: u64) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(dir)?;
    for file in 0..files {
        let path = dir.join(format!("input_{file:03}.dat"));
        let data = gensort::generate_records(records, seed.wrapping_add(file as u64));
        gensort::write_gensort_file(&path, &data)?;
        info!("Wrote {} records to {}", records, path.display());
    }
    Ok(())
}

/// Stream a gensort file into a record input; reading stops when the input is dropped.
fn channel_input<'scope>(
    scope: &'scope thread::Scope<'scope, '_>,
    path: &Path,
) -> Result<RecordInput<GenSortRecord>, Box<dyn Error>> {
    let mut reader = GenSortReader::open(path)?;
    let (tx, rx) = bounded(1024);
    scope.spawn(move || {
        while let Ok(Some(record)) = reader.read() {
            if tx.send(record).is_err() {
                break;
            }
        }
    });
    Ok(RecordInput::with_name(
        path.display().to_string(),
        InputSource::Channel(rx),
    ))
}

fn sample(
    job_dir: &Path,
    partitions: usize,
    sample_size: usize,
    inputs: &[PathBuf],
) -> Result<(), Box<dyn Error>> {
    let config = PartitionerConfig::default();
    let context = TaskContext::new(job_dir, partitions);
    let table = thread::scope(|scope| -> Result<_, Box<dyn Error>> {
        let mut sources = inputs
            .iter()
            .map(|path| channel_input(scope, path))
            .collect::<Result<Vec<_>, _>>()?;
        let table = build_split_points(&mut sources, partitions, sample_size, &config)?;
        drop(sources);
        Ok(table)
    })?;
    let fs = LocalFileSystem::new();
    table.write_to(&fs, &context.local_path(&config.split_file_name))?;
    for (i, key) in table.keys().enumerate() {
        info!("Split point {}: {}", i, hex::encode(key));
    }
    Ok(())
}

fn map_output_path(job_dir: &Path, map: usize, partition: usize) -> PathBuf {
    job_dir.join(format!("map_{map:03}")).join(format!("part_{partition:03}"))
}

fn partition(
    job_dir: &Path,
    partitions: usize,
    memory_mb: usize,
    inputs: &[PathBuf],
) -> Result<(), Box<dyn Error>> {
    let fs: Arc<dyn FileSystemClient> = Arc::new(LocalFileSystem::new());
    let context = TaskContext::new(job_dir, partitions);
    let partitioner =
        RangePartitioner::<GenSortRecord>::new(context, PartitionerConfig::default(), fs.clone());

    for (map, path) in inputs.iter().enumerate() {
        let start = Instant::now();
        let mut buffers: Vec<RecordSortBuffer<GenSortRecord>> = (0..partitions)
            .map(|_| RecordSortBuffer::new(memory_mb * 1024 * 1024))
            .collect();
        let mut reader = GenSortReader::open(path)?;
        let mut record = GenSortRecord::default();
        while reader.read_into(&mut record)? {
            let p = partitioner.partition_for(&record, partitions as u32)? as usize;
            if !buffers[p].append(&record)? {
                return Err(format!(
                    "partition {p} of {} does not fit in {memory_mb} MB",
                    path.display()
                )
                .into());
            }
        }
        for (p, buffer) in buffers.iter_mut().enumerate() {
            let out = fs.create_for_write(&map_output_path(job_dir, map, p))?;
            buffer.spill(out)?;
        }
        info!(
            "Partitioned {} records of {} in {:.2}s",
            reader.records_read(),
            path.display(),
            start.elapsed().as_secs_f64()
        );
    }
    Ok(())
}

fn sort(job_dir: &Path, partitions: usize, output: &Path) -> Result<(), Box<dyn Error>> {
    let mut maps: Vec<PathBuf> = fs::read_dir(job_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with("map_"))
        })
        .collect();
    maps.sort();
    if maps.is_empty() {
        return Err(format!("no map outputs in {}", job_dir.display()).into());
    }
    fs::create_dir_all(output)?;

    let fs: Arc<dyn FileSystemClient> = Arc::new(LocalFileSystem::new());
    let numbers: Vec<u32> = (0..partitions as u32).collect();
    let merge = MultiInputRecordReader::new(MergeReaderConfig::new(maps.len()), &numbers)?;
    let start = Instant::now();

    thread::scope(|scope| -> Result<(), Box<dyn Error>> {
        // Map outputs arrive from independent producers, as they would from remote tasks.
        let producers: Vec<_> = maps
            .iter()
            .map(|map| {
                let merge = merge.clone();
                let fs = fs.clone();
                scope.spawn(move || {
                    let inputs = (0..partitions)
                        .map(|p| {
                            RecordInput::new(InputSource::file(
                                map.join(format!("part_{p:03}")),
                                fs.clone(),
                            ))
                        })
                        .collect();
                    let added = merge.add_input(inputs);
                    if added.is_err() {
                        // Unblock the consumer instead of leaving it waiting forever.
                        merge.dispose();
                    }
                    added
                })
            })
            .collect();

        let mut reader = SortedMergeReader::new(merge.clone());
        let mut partition = 0;
        loop {
            let path = output.join(format!("part_{partition:03}.dat"));
            let mut records = Vec::new();
            while let Some(record) = reader.read()? {
                records.push(record);
            }
            gensort::write_gensort_file(&path, &records)?;
            info!("Partition {partition}: {} records", records.len());
            partition += 1;
            if !reader.next_partition(|_| true)? {
                break;
            }
        }
        for producer in producers {
            producer
                .join()
                .map_err(|_| "map output producer panicked")??;
        }
        Ok(())
    })?;

    info!(
        "Merged {} map outputs into {} partitions ({} bytes) in {:.2}s",
        maps.len(),
        partitions,
        merge.bytes_read(),
        start.elapsed().as_secs_f64()
    );
    merge.dispose();
    Ok(())
}

fn validate(files: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let mut previous: Option<GenSortRecord> = None;
    let mut total = 0u64;
    for path in files {
        let mut reader = GenSortReader::open(path)?;
        while let Some(record) = reader.read()? {
            if let Some(prev) = &previous {
                if prev.key() > record.key() {
                    return Err(format!(
                        "{}: key {} follows {} after {} records",
                        path.display(),
                        hex::encode(record.key()),
                        hex::encode(prev.key()),
                        total
                    )
                    .into());
                }
            }
            previous = Some(record);
            total += 1;
        }
    }
    info!("{total} records in {} files are sorted", files.len());
    Ok(())
}
