use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use ndarray::Array2;
use seqfeed::LabelEncoding;
use seqfeed::pipeline::{ConvShaper, LoadedPackage, Shaper, SliceShaper, TdnnShaper, WholeShaper};
use std::hint::black_box;

const BASE_DIM: usize = 40;
const CONTEXT: usize = 11;
const STREAMS: usize = 16;

/// Package with ragged stream lengths, like a real sorted corpus tail
fn make_package(dim: usize, max_frames: usize) -> LoadedPackage {
    let features = (0..STREAMS)
        .map(|s| {
            let frames = max_frames - (s * max_frames / (2 * STREAMS));
            Array2::from_shape_fn((frames, dim), |(t, d)| (t * dim + d) as f32 * 1e-3)
        })
        .collect::<Vec<_>>();
    let labels = features
        .iter()
        .map(|m| (0..m.nrows()).map(|t| (t % 500) as i32).collect())
        .collect();
    LoadedPackage {
        index: 0,
        features,
        labels,
        lattice: None,
    }
}

fn bench_policies(c: &mut Criterion) {
    let mut group = c.benchmark_group("shaping");
    let dim = BASE_DIM * CONTEXT;

    for &frames in &[200usize, 800] {
        let package = make_package(dim, frames);

        let shapers: Vec<(&str, Box<dyn Shaper>)> = vec![
            ("whole", Box::new(WholeShaper::new(dim, LabelEncoding::Dense))),
            ("slice", Box::new(SliceShaper::new(dim, 20, LabelEncoding::Dense))),
            (
                "cnn_slice",
                Box::new(ConvShaper::new(
                    Box::new(SliceShaper::new(dim, 20, LabelEncoding::Dense)),
                    CONTEXT,
                    BASE_DIM,
                )),
            ),
            (
                "tdnn",
                Box::new(TdnnShaper::new(
                    WholeShaper::new(dim, LabelEncoding::Dense),
                    10,
                    10,
                )),
            ),
            ("ctc_whole", Box::new(WholeShaper::new(dim, LabelEncoding::Sparse))),
        ];

        for (name, shaper) in &shapers {
            group.bench_with_input(BenchmarkId::new(*name, frames), &package, |b, package| {
                b.iter_batched(
                    || package.clone(),
                    |p| black_box(shaper.shape(p)),
                    BatchSize::LargeInput,
                );
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_policies);
criterion_main!(benches);
