// ai
//! 🏎️ decoder_bench: how fast can one core turn an hour of GH Archive into records?
//!
//! Synthetic but shaped like the real thing: string ids, numeric repo ids, a chunky payload.

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

fn synthetic_hour(lines: usize) -> Vec<u8> {
    let mut blob = Vec::with_capacity(lines * 400);
    for id in 0..lines {
        blob.extend_from_slice(
            format!(
                r#"{{"id":"{id}","type":"PushEvent","actor":{{"id":1,"login":"octocat"}},"repo":{{"id":{},"name":"octo/cat"}},"payload":{{"ref":"refs/heads/master","commits":[{{"sha":"abc","message":"fix the thing","author":{{"name":"Mona"}}}}]}},"created_at":"2019-06-01T03:00:00Z"}}"#,
                id % 1000
            )
            .as_bytes(),
        );
        blob.push(b'\n');
    }
    blob
}

fn bench_decode(c: &mut Criterion) {
    let blob = synthetic_hour(10_000);
    let mut group = c.benchmark_group("decoder");
    group.throughput(Throughput::Bytes(blob.len() as u64));
    group.bench_function("decode_10k_push_events", |b| {
        b.iter(|| {
            let ok = ghx::decoder::decode(black_box(&blob))
                .filter(|r| r.is_ok())
                .count();
            black_box(ok)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
