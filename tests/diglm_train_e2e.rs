use burn_core::tensor::backend::Backend;
use diglm::config::DiglmConfig;
use diglm::metrics::binary_accuracy;
use diglm::train::{train_diglm, DiglmTrainConfig};
use diglm::{BurnBackend, NeuralSplineFlowConfig, SplineInitializer};
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

/// Two blobs in R^2. The positive class sits at (-1.5, -1.5), so the initial
/// `beta = [1, 1]` predicts the wrong class and training must turn it around.
fn two_blobs(n: usize, seed: u64) -> (Array2<f32>, Array1<f32>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut x = Array2::<f32>::zeros((n, 2));
    let mut y = Array1::<f32>::zeros(n);
    for i in 0..n {
        let positive = i % 2 == 0;
        let c = if positive { -1.5 } else { 1.5 };
        for k in 0..2 {
            let e: f32 = StandardNormal.sample(&mut rng);
            x[[i, k]] = c + 0.4 * e;
        }
        y[i] = if positive { 1.0 } else { 0.0 };
    }
    (x, y)
}

#[test]
fn training_decreases_the_weighted_objective() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let device = <BurnBackend as Backend>::Device::default();
    let cfg = DiglmConfig::new(
        2,
        NeuralSplineFlowConfig::with_splits(2).with_spline(SplineInitializer {
            nbins: 8,
            hidden_layers: vec![16],
            ..Default::default()
        }),
    )
    .with_init_seed(0);
    let model = cfg.init::<BurnBackend>(&device).unwrap();
    let (x, y) = two_blobs(128, 5);

    let train_cfg = DiglmTrainConfig {
        lr: 3e-2,
        steps: 150,
        batch_size: 64,
        seed: 17,
        ..Default::default()
    };
    let (model, report) = train_diglm(model, &x.view(), &y.view(), &train_cfg, &device).unwrap();

    assert_eq!(report.losses.len(), 150);
    assert!(report.losses.iter().all(|l| l.is_finite()));
    let (head, tail) = report.head_tail_means(10).unwrap();
    assert!(tail < head, "loss should decrease: first10={head} last10={tail}");

    let features = diglm::interop::array2_to_tensor::<BurnBackend>(&device, &x.view());
    let mean = model.predict(features).unwrap().mean;
    let mean = diglm::interop::host_vec(mean).unwrap();
    let acc = binary_accuracy(&mean, y.as_slice().unwrap(), 0.5).unwrap();
    assert!(acc > 0.9, "accuracy after training = {acc}");
}
