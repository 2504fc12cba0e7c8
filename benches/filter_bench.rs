#[macro_use]
extern crate criterion;
use criterion::{Criterion, Throughput};
use flowcell_postrun::combine::filter_pass_reads;
use std::io::{sink, Cursor};

/// 10k reads, every fourth one failing the filter.
fn synthetic_fastq() -> Vec<u8> {
    let mut text = String::new();
    for i in 0..10_000 {
        let flag = if i % 4 == 0 { 'Y' } else { 'N' };
        text.push_str(&format!(
            "@HWI-ST1234:8:C0M7RACXX:1101:{}:2000 1:{}:0:ACTTGA\n\
             ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTAC\n+\n\
             IIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIII\n",
            i, flag
        ));
    }
    text.into_bytes()
}

fn run_benchmark(c: &mut Criterion) {
    let data = synthetic_fastq();
    let mut group = c.benchmark_group("bench-pass-filter");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("filter-pass-reads", |b| {
        b.iter(|| filter_pass_reads(Cursor::new(&data), sink()).unwrap())
    });
    group.finish();
}

criterion_group!(benches, run_benchmark);

criterion_main!(benches);
