//! Symbol codec benchmarks

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wave_core::{modulation, LineCoding};

fn symbol_benchmark(c: &mut Criterion) {
    let codes: Vec<u8> = (0..4096u32).map(|n| (n % 4) as u8).collect();
    let symbols = modulation::encode(&codes).unwrap();

    c.bench_function("encode_4096_codes", |b| {
        b.iter(|| black_box(modulation::encode(&codes).unwrap()))
    });

    c.bench_function("decode_4096_symbols", |b| {
        b.iter(|| black_box(modulation::decode(&symbols).unwrap()))
    });
}

fn line_benchmark(c: &mut Criterion) {
    let payload = vec![0x5au8; 128];
    let wire = LineCoding::Qpsk.encoder().encode(&payload);

    c.bench_function("qpsk_decode_1024_byte_chunk", |b| {
        b.iter(|| {
            let mut decoder = LineCoding::Qpsk.decoder();
            let mut out = BytesMut::with_capacity(128);
            black_box(decoder.feed(&wire, &mut out).unwrap())
        })
    });
}

criterion_group!(benches, symbol_benchmark, line_benchmark);
criterion_main!(benches);
