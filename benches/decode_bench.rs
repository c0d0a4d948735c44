// Decode benchmark - measure teacher-forced and free-running decode time
//
// Run with: cargo bench --bench decode_bench

use caption_rnn::decoder::{CellType, DecodeMode};
use caption_rnn::generation::{CaptionConfig, CaptionModel};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{Array2, Array3};

fn bench_config(cell_type: CellType) -> CaptionConfig {
    CaptionConfig {
        vocabulary_size: 2000,
        embedding_size: 64,
        number_of_cnn_features: 256,
        hidden_size: 128,
        feature_map_size: 128,
        cell_type,
        honor_cell_type: true,
        seed: 7,
        ..Default::default()
    }
}

fn cnn_features(batch: usize, channels: usize) -> Array3<f32> {
    Array3::from_shape_fn((batch, channels, 1), |(b, c, _)| ((b * 31 + c) % 17) as f32 / 17.0)
}

/// Teacher-forced decode over a fixed-length caption, per batch size
fn bench_teacher_forced(c: &mut Criterion) {
    let mut group = c.benchmark_group("teacher_forced");
    let model = CaptionModel::new(bench_config(CellType::Lstm)).expect("bench model");

    for batch in [1usize, 8, 32] {
        let features = cnn_features(batch, 256);
        let tokens = Array2::from_shape_fn((batch, 20), |(b, t)| (b * 13 + t * 7) % 2000);

        group.bench_with_input(BenchmarkId::new("lstm", batch), &batch, |b, _| {
            b.iter(|| {
                let out = model
                    .forward(
                        black_box(features.view()),
                        black_box(tokens.view()),
                        DecodeMode::TeacherForced,
                        None,
                    )
                    .expect("decode");
                black_box(out);
            });
        });
    }

    group.finish();
}

/// Greedy generation for each cell variant
fn bench_free_running(c: &mut Criterion) {
    let mut group = c.benchmark_group("free_running");
    let features = cnn_features(4, 256);
    let seeds = [1usize, 1, 1, 1];

    for (cell_type, name) in [
        (CellType::Simple, "simple"),
        (CellType::Gru, "gru"),
        (CellType::Lstm, "lstm"),
    ] {
        let model = CaptionModel::new(bench_config(cell_type)).expect("bench model");

        group.bench_function(name, |b| {
            b.iter(|| {
                let captions = model
                    .generate(black_box(features.view()), black_box(&seeds))
                    .expect("generate");
                black_box(captions);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_teacher_forced, bench_free_running);
criterion_main!(benches);
