use bytes::Bytes;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use notify_stream::core::{FrameDecoder, WsFrame};

fn payloads(n: usize) -> Vec<Bytes> {
    (0..n)
        .map(|i| {
            Bytes::from(format!(
                r#"{{"id":{i},"appid":{app},"message":"backup finished in {i}s","title":"nightly","priority":{prio},"date":"2024-05-01T12:30:00+02:00","extras":{{"client::display":{{"contentType":"text/markdown"}}}}}}"#,
                app = i % 7,
                prio = i % 10,
            ))
        })
        .collect()
}

fn bench_decode(c: &mut Criterion) {
    let whole: Vec<WsFrame> = payloads(1000).into_iter().map(WsFrame::Text).collect();

    let fragmented: Vec<WsFrame> = payloads(1000)
        .into_iter()
        .flat_map(|payload| {
            let mid = payload.len() / 2;
            [
                WsFrame::Continuation(payload.slice(..mid)),
                WsFrame::Text(payload.slice(mid..)),
            ]
        })
        .collect();

    c.bench_function("decode_1000_whole_frames", |b| {
        let mut decoder = FrameDecoder::new(1 << 20);
        b.iter(|| {
            for frame in &whole {
                black_box(decoder.push(black_box(frame)));
            }
        })
    });

    c.bench_function("decode_1000_fragmented_messages", |b| {
        let mut decoder = FrameDecoder::new(1 << 20);
        b.iter(|| {
            for frame in &fragmented {
                black_box(decoder.push(black_box(frame)));
            }
        })
    });

    let malformed = WsFrame::text(r#"{"id":1,"title":"#);
    c.bench_function("reject_1000_malformed_frames", |b| {
        let mut decoder = FrameDecoder::new(1 << 20);
        b.iter(|| {
            for _ in 0..1000 {
                black_box(decoder.push(black_box(&malformed)));
            }
        })
    });
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
