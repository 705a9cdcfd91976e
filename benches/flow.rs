use burn_core::tensor::{Distribution, Tensor};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use diglm::{Bijector, InferenceBackend as B, NeuralSplineFlow, SplineInitializer};

fn bench_flow(c: &mut Criterion) {
    let mut group = c.benchmark_group("nsf");
    group.sample_size(20);

    let device = Default::default();
    let cases = [(64usize, 8usize, 16usize), (256, 8, 32), (64, 32, 32)];

    for &(n, d, nbins) in &cases {
        let spline = SplineInitializer {
            nbins,
            hidden_layers: vec![64, 64],
            ..Default::default()
        };
        let flow = NeuralSplineFlow::<B>::from_split_features(4, d, &spline, &device).unwrap();
        let x = Tensor::<B, 2>::random([n, d], Distribution::Normal(0.0, 1.0), &device);
        let y = flow.forward(x.clone()).unwrap();
        let id = format!("n{n}_d{d}_k{nbins}");

        group.bench_with_input(BenchmarkId::new("forward", &id), &(), |b, _| {
            b.iter(|| flow.forward_and_log_det(x.clone()).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("inverse", &id), &(), |b, _| {
            b.iter(|| flow.inverse_and_log_det(y.clone()).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_flow);
criterion_main!(benches);
