//! Codec benchmarks for spacebro-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use spacebro_protocol::{codec, Encoding, Frame, Payload};

fn sample_frame() -> Frame {
    let payload = Payload::from(json!({
        "greeting": "hi",
        "values": [1, 2, 3, 4, 5, 6, 7, 8],
    }))
    .with_envelope(Some("bench-client"), None);
    Frame::new("hello", payload)
}

fn bench_encode(c: &mut Criterion) {
    let frame = sample_frame();

    let mut group = c.benchmark_group("encode");
    group.bench_function("json", |b| {
        b.iter(|| codec::encode(black_box(&frame), Encoding::Json))
    });
    group.bench_function("msgpack", |b| {
        b.iter(|| codec::encode(black_box(&frame), Encoding::MessagePack))
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let frame = sample_frame();

    let mut group = c.benchmark_group("decode");
    for encoding in [Encoding::Json, Encoding::MessagePack] {
        let encoded = codec::encode(&frame, encoding).unwrap();
        let len = match &encoded {
            codec::WireMessage::Text(text) => text.len(),
            codec::WireMessage::Binary(data) => data.len(),
        };
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_function(format!("{encoding:?}"), |b| {
            b.iter(|| codec::decode(black_box(&encoded)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
