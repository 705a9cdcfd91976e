//! Train a small DIGLM on two noisy half-moons and report accuracy and bits/dim.
//!
//! Run: `cargo run --release --example diglm_toy_classification`
//! (set `RUST_LOG=diglm=debug` to see per-step losses).

use burn_core::tensor::backend::Backend;
use diglm::config::DiglmConfig;
use diglm::interop::{array1_to_column, array2_to_tensor};
use diglm::metrics::evaluate;
use diglm::train::train_diglm;
use diglm::{BurnBackend, JointSample};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

fn half_moons(n: usize, noise: f32, seed: u64) -> (Array2<f32>, Array1<f32>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut x = Array2::<f32>::zeros((n, 2));
    let mut y = Array1::<f32>::zeros(n);
    for i in 0..n {
        let t: f32 = rng.random_range(0.0..core::f32::consts::PI);
        let upper = i % 2 == 0;
        let (a, b) = if upper {
            (t.cos(), t.sin())
        } else {
            (1.0 - t.cos(), 0.5 - t.sin())
        };
        let ea: f32 = StandardNormal.sample(&mut rng);
        let eb: f32 = StandardNormal.sample(&mut rng);
        x[[i, 0]] = 1.5 * (a + noise * ea) - 0.75;
        x[[i, 1]] = 1.5 * (b + noise * eb) - 0.4;
        y[i] = if upper { 1.0 } else { 0.0 };
    }
    (x, y)
}

fn main() -> diglm::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = DiglmConfig::from_json_str(
        r#"{
            "num_features": 2,
            "flow": {
                "masks": [1, -1, 1, -1],
                "spline": { "nbins": 16, "border": 4.0, "hidden_layers": [64, 64] }
            },
            "glm": "bernoulli",
            "train": { "lr": 5e-3, "steps": 400, "batch_size": 128, "seed": 7 }
        }"#,
    )?;

    let device = <BurnBackend as Backend>::Device::default();
    let (x, y) = half_moons(1024, 0.1, 1);
    let model = cfg.init::<BurnBackend>(&device)?;

    let (model, report) = train_diglm(model, &x.view(), &y.view(), &cfg.train, &device)?;
    if let Some((first, last)) = report.head_tail_means(20) {
        println!("loss: first20={first:.4} last20={last:.4}");
    }

    let (x_test, y_test) = half_moons(512, 0.1, 2);
    let test = JointSample::new(
        array2_to_tensor::<BurnBackend>(&device, &x_test.view()),
        array1_to_column::<BurnBackend>(&device, &y_test.view()),
    )?;
    let eval = evaluate(&model, &test)?;
    println!(
        "test: accuracy={:.3} bits/dim={:.3} label ll={:.4}",
        eval.accuracy, eval.bits_per_dim, eval.label_log_likelihood
    );
    Ok(())
}
