//! Benchmarks for range planning, record scanning and full chunked runs

use chunkwise::{plan, ChunkedMap, EngineConfig, RecordLayout, RecordScanner, ScanError};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn write_reads(dir: &Path, count: usize) -> PathBuf {
    let path = dir.join("bench.fastq");
    let mut file = std::io::BufWriter::new(std::fs::File::create(&path).unwrap());
    for i in 0..count {
        writeln!(file, "@bench:{i}:lane1\n{}\n+\n{}", "ACGT".repeat(25), "I".repeat(100)).unwrap();
    }
    file.flush().unwrap();
    path
}

fn count_reads(records: RecordScanner, _outputs: &[PathBuf]) -> Result<u64, ScanError> {
    let mut n = 0;
    for record in records {
        record?;
        n += 1;
    }
    Ok(n)
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    for chunks in [10usize, 1000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(chunks), &chunks, |b, &chunks| {
            b.iter(|| plan(black_box(50_000_000_000), chunks));
        });
    }
    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let input = write_reads(dir.path(), 20_000);
    let length = std::fs::metadata(&input).unwrap().len();
    let layout = RecordLayout::fastq("@bench");

    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Bytes(length));
    group.bench_function("sequential", |b| {
        b.iter(|| {
            let scanner = RecordScanner::open(&input, &layout, 0, length).unwrap();
            black_box(scanner.count())
        });
    });
    group.bench_function("boundary_alignment", |b| {
        b.iter(|| {
            let scanner = RecordScanner::open(&input, &layout, black_box(length / 3), length).unwrap();
            black_box(scanner.aligned_start())
        });
    });
    group.finish();
}

fn bench_chunked_map(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = TempDir::new().unwrap();
    let input = write_reads(dir.path(), 50_000);
    let length = std::fs::metadata(&input).unwrap().len();

    let mut group = c.benchmark_group("chunked_map");
    group.sample_size(10);
    group.throughput(Throughput::Bytes(length));
    for chunks in [1usize, 8, 64] {
        let mut config = EngineConfig::default();
        config.chunks = chunks;
        config.pool.niceness = None;
        let engine = ChunkedMap::new(config);
        group.bench_with_input(BenchmarkId::from_parameter(chunks), &chunks, |b, _| {
            b.to_async(&rt)
                .iter(|| async { engine.map_sum(&input, &[], count_reads).await.unwrap() });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_plan, bench_scan, bench_chunked_map);
criterion_main!(benches);
