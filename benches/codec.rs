//! Benchmarks for riffcodec encode/decode operations.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use riffcodec::{
    decode_rgba, encode_lossless, encode_rgba, AnimationDecoder, AnimationEncoder, Encoder,
    Unstoppable,
};
use std::hint::black_box;

/// Generate a gradient RGBA image for benchmarking.
fn generate_gradient_rgba(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let r = ((x * 255) / width.max(1)) as u8;
            let g = ((y * 255) / height.max(1)) as u8;
            let b = (((x + y) * 127) / (width + height).max(1)) as u8;
            data.extend_from_slice(&[r, g, b, 255]);
        }
    }
    data
}

/// Gradient with a square moved `shift` pixels to the right.
fn generate_moving_square(width: u32, height: u32, shift: u32) -> Vec<u8> {
    let mut data = generate_gradient_rgba(width, height);
    for y in 16..48 {
        for x in shift..shift + 32 {
            let i = ((y * width + x) * 4) as usize;
            data[i..i + 4].copy_from_slice(&[255, 255, 255, 255]);
        }
    }
    data
}

fn bench_encode_lossy(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_lossy");

    for &(width, height) in &[(64, 64), (256, 256), (512, 512)] {
        let rgba = generate_gradient_rgba(width, height);
        group.throughput(Throughput::Elements((width * height) as u64));

        group.bench_with_input(
            BenchmarkId::new("q85", format!("{}x{}", width, height)),
            &rgba,
            |b, rgba| {
                b.iter(|| encode_rgba(black_box(rgba), width, height, 85.0, &Unstoppable).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_encode_lossless(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_lossless");

    for &(width, height) in &[(64, 64), (256, 256), (512, 512)] {
        let rgba = generate_gradient_rgba(width, height);
        group.throughput(Throughput::Elements((width * height) as u64));

        group.bench_with_input(
            BenchmarkId::new("lossless", format!("{}x{}", width, height)),
            &rgba,
            |b, rgba| {
                b.iter(|| encode_lossless(black_box(rgba), width, height, &Unstoppable).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for &(width, height) in &[(64, 64), (256, 256), (512, 512)] {
        let rgba = generate_gradient_rgba(width, height);
        let lossy = encode_rgba(&rgba, width, height, 85.0, &Unstoppable).unwrap();
        let lossless = encode_lossless(&rgba, width, height, &Unstoppable).unwrap();
        group.throughput(Throughput::Elements((width * height) as u64));

        group.bench_with_input(
            BenchmarkId::new("lossy", format!("{}x{}", width, height)),
            &lossy,
            |b, data| {
                b.iter(|| decode_rgba(black_box(data)).unwrap());
            },
        );

        group.bench_with_input(
            BenchmarkId::new("lossless", format!("{}x{}", width, height)),
            &lossless,
            |b, data| {
                b.iter(|| decode_rgba(black_box(data)).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_size_target(c: &mut Criterion) {
    let mut group = c.benchmark_group("size_target");

    let (width, height) = (256, 256);
    let rgba = generate_gradient_rgba(width, height);
    group.throughput(Throughput::Elements((width * height) as u64));

    for max in [2_000usize, 8_000, 32_000] {
        group.bench_with_input(BenchmarkId::new("lossy_q90", max), &rgba, |b, rgba| {
            b.iter(|| {
                Encoder::new(black_box(rgba), width, height)
                    .quality(90.0)
                    .max_output_bytes(Some(max))
                    .encode(&Unstoppable)
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_animation(c: &mut Criterion) {
    let mut group = c.benchmark_group("animation");

    let (width, height) = (128, 128);
    let frames: Vec<Vec<u8>> = (0..3).map(|i| generate_moving_square(width, height, i * 16)).collect();

    group.bench_function("encode_3_frames", |b| {
        b.iter(|| {
            let mut encoder = AnimationEncoder::new(width, height).unwrap();
            encoder.set_quality(85.0);
            for (i, frame) in frames.iter().enumerate() {
                encoder.add_frame_rgba(black_box(frame), i as u32 * 100).unwrap();
            }
            encoder.finish(300, &Unstoppable).unwrap()
        });
    });

    let mut encoder = AnimationEncoder::new(width, height).unwrap();
    encoder.set_lossless(true);
    for (i, frame) in frames.iter().enumerate() {
        encoder.add_frame_rgba(frame, i as u32 * 100).unwrap();
    }
    let encoded = encoder.finish(300, &Unstoppable).unwrap();

    group.bench_function("decode_3_frames", |b| {
        b.iter(|| {
            AnimationDecoder::new(black_box(&encoded))
                .unwrap()
                .decode_all()
                .unwrap()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_lossy,
    bench_encode_lossless,
    bench_decode,
    bench_size_target,
    bench_animation,
);
criterion_main!(benches);
