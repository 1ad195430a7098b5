use criterion::{criterion_group, criterion_main};


use ingest::register_benchmarks as register_ingest_benchmarks;

criterion_group!(benches, register_ingest_benchmarks);

criterion_main!(benches);
