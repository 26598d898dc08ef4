#![allow(unused)]
extern crate strcloak;

#[path = "../tests/common/mod.rs"]
mod common;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use strcloak::{
    codec::{self, LiteralKey},
    classfile::{ClassFile, JavaString},
    instrument::{transform, ClassInput, ClassOrigin, InstrumentConfig, Instrumenter, MemorySink, RewriteContext},
};

/// A class with `count` methods, each returning a distinct 32 character literal.
fn class_with_literals(name: &str, count: usize) -> Vec<u8> {
    let literals: Vec<(String, String)> = (0..count)
        .map(|i| (format!("m{i}"), format!("literal number {i:>5} of the set")))
        .collect();
    let methods: Vec<(&str, &str)> = literals
        .iter()
        .map(|(method, literal)| (method.as_str(), literal.as_str()))
        .collect();
    common::literal_class(name, &methods)
}

/// Benchmark the literal cipher alone.
fn bench_codec(c: &mut Criterion) {
    let key = LiteralKey::derive(b"bench", "com/example/Bench", "s0");
    let mut group = c.benchmark_group("codec");
    for length in [16_usize, 256, 4096] {
        let plain = JavaString::from("x".repeat(length));
        group.throughput(Throughput::Elements(length as u64));
        group.bench_with_input(BenchmarkId::new("encode", length), &plain, |b, plain| {
            b.iter(|| {
                let encoded = codec::encode(black_box(plain), &key).unwrap();
                black_box(encoded)
            });
        });
    }
    group.finish();
}

/// Benchmark parsing and writing back a class without changes.
fn bench_round_trip(c: &mut Criterion) {
    let data = class_with_literals("com/example/Bench", 200);

    let mut group = c.benchmark_group("classfile");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("parse_write", |b| {
        b.iter(|| {
            let class = ClassFile::parse(black_box(&data)).unwrap();
            black_box(class.to_bytes())
        });
    });
    group.finish();
}

/// Benchmark rewriting a single class of growing size.
fn bench_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform");
    for count in [1_usize, 50, 500] {
        let data = class_with_literals("com/example/Bench", count);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &data, |b, data| {
            b.iter(|| {
                // a fresh context per iteration, the namer warns about repeated classes
                let ctx = RewriteContext::new(b"bench");
                let rewritten = transform(black_box(data), &ctx).unwrap();
                black_box(rewritten.len())
            });
        });
    }
    group.finish();
}

/// Benchmark a parallel batch of many small classes.
fn bench_batch(c: &mut Criterion) {
    let inputs: Vec<ClassInput> = (0..256)
        .map(|i| {
            let name = format!("com/example/batch/C{i}");
            let bytes = class_with_literals(&name, 8);
            ClassInput::new(name, ClassOrigin::Module, bytes)
        })
        .collect();
    let total: usize = inputs.iter().map(|input| input.bytes.len()).sum();

    let mut group = c.benchmark_group("batch");
    group.throughput(Throughput::Bytes(total as u64));
    group.sample_size(20);
    group.bench_function("run_batch_256", |b| {
        b.iter(|| {
            let instrumenter = Instrumenter::new(InstrumentConfig::default()).unwrap();
            let sink = MemorySink::new();
            let report = instrumenter.run_batch(black_box(&inputs), &sink).unwrap();
            black_box(report)
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_codec,
    bench_round_trip,
    bench_transform,
    bench_batch
);
criterion_main!(benches);
