//! Throughput of the per-frame conversion chain
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use remote_audio::audio::convert::{remix, FormatConverter};
use remote_audio::audio::resample::RateConverter;
use remote_audio::params::{Channels, ResampleQuality};

/// Stereo test tone, one 20 ms frame at 48 kHz
fn generate_test_audio(samples_per_channel: usize) -> Vec<f32> {
    (0..samples_per_channel)
        .flat_map(|i| {
            let t = i as f32 / 48000.0;
            [
                (t * 440.0 * std::f32::consts::TAU).sin() * 0.5,
                (t * 880.0 * std::f32::consts::TAU).sin() * 0.5,
            ]
        })
        .collect()
}

fn bench_format_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("Format Conversion");
    let frame = generate_test_audio(960);
    group.throughput(Throughput::Elements(frame.len() as u64));

    for bits in [8u32, 16, 24] {
        let Some(converter) = FormatConverter::new(bits) else {
            continue;
        };
        let mut ints = Vec::with_capacity(frame.len());
        let mut floats = Vec::with_capacity(frame.len());

        group.bench_with_input(BenchmarkId::new("quantize", bits), &frame, |b, frame| {
            b.iter(|| {
                ints.clear();
                converter.quantize(black_box(frame), &mut ints);
            })
        });

        converter.quantize(&frame, &mut ints);
        group.bench_with_input(BenchmarkId::new("dequantize", bits), &ints, |b, ints| {
            b.iter(|| {
                floats.clear();
                converter.dequantize(black_box(ints), &mut floats);
            })
        });
    }

    group.bench_function("remix_stereo_to_mono", |b| {
        b.iter(|| remix(black_box(&frame), Channels::Stereo, Channels::Mono))
    });

    group.finish();
}

fn bench_resampling(c: &mut Criterion) {
    let mut group = c.benchmark_group("Resampling");
    let frame = generate_test_audio(960);
    group.throughput(Throughput::Elements(960));

    for level in 0..=4 {
        let Some(quality) = ResampleQuality::new(level) else {
            continue;
        };
        let Ok(mut converter) =
            RateConverter::new(48000.0, 16000.0, Channels::Stereo, quality, 960)
        else {
            continue;
        };

        group.bench_function(BenchmarkId::new("48k_to_16k", level), |b| {
            b.iter(|| converter.process(black_box(&frame)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_format_conversion, bench_resampling);
criterion_main!(benches);
