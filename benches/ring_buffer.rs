use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ptt_audio_engine::audio::RingBuffer;
use ptt_audio_engine::protocol::{decode_frames, encode_frames, FrameBundle};

// One 20 ms block at 16 kHz
const BLOCK_FRAMES: usize = 320;
const CHANNEL_COUNTS: [u16; 2] = [1, 2];

fn bench_ring_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");

    for channels in CHANNEL_COUNTS {
        let block = vec![0.25f32; BLOCK_FRAMES * channels as usize];
        let mut out = vec![0.0f32; block.len()];
        group.throughput(Throughput::Elements(BLOCK_FRAMES as u64));

        group.bench_with_input(BenchmarkId::new("push_pull", channels), &channels, |b, &channels| {
            let mut ring = RingBuffer::<f32>::with_duration(16_000, channels, 500);
            b.iter(|| {
                ring.push(black_box(&block));
                black_box(ring.pull(&mut out));
            })
        });

        // Offset writes so every block straddles the wrap point
        group.bench_with_input(BenchmarkId::new("wrapping", channels), &channels, |b, &channels| {
            let mut ring = RingBuffer::<f32>::new(BLOCK_FRAMES * 3 / 2, channels);
            ring.push(&block[..BLOCK_FRAMES / 2 * channels as usize]);
            b.iter(|| {
                ring.push(black_box(&block));
                black_box(ring.pull(&mut out));
            })
        });
    }

    group.finish();
}

fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");

    // A full talk packet of typical voice frames
    let frames: Vec<Vec<u8>> = (0..25).map(|i| vec![i as u8; 60 + i % 7]).collect();
    let payload = encode_frames(&frames).unwrap();
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("encode_packet", |b| {
        b.iter(|| black_box(encode_frames(black_box(&frames)).unwrap()))
    });
    group.bench_function("decode_packet", |b| {
        b.iter(|| black_box(decode_frames(black_box(&payload)).unwrap()))
    });
    group.bench_function("bundle_packet", |b| {
        b.iter(|| {
            let mut bundle = FrameBundle::with_capacity(frames.len(), payload.len());
            bundle.put_arrays(decode_frames(&payload).unwrap());
            black_box(bundle)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_ring_buffer, bench_framing);
criterion_main!(benches);
