//! Minibatch Adam training on the weighted hybrid objective.
//!
//! The loss is `-mean(weighted_log_prob)`. Every trainable tensor of the model (flow
//! networks, spline heads, `beta`, `beta_0`) is a `burn` parameter, so one optimizer step
//! updates them together; nothing is shared outside the model value.

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn_optim::{AdamConfig, GradientsParams, Optimizer};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::diglm::{Diglm, JointSample, DEFAULT_SCALING_CONST};
use crate::interop::{array1_to_column, array2_to_tensor, host_vec};
use crate::{BurnBackend, Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiglmTrainConfig {
    pub lr: f64,
    pub steps: usize,
    pub batch_size: usize,
    /// Weight of `log p(features)` in the objective.
    pub scaling_const: f64,
    pub seed: u64,
}

impl Default for DiglmTrainConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            steps: 200,
            batch_size: 64,
            scaling_const: DEFAULT_SCALING_CONST,
            seed: 0,
        }
    }
}

impl DiglmTrainConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(Error::Domain("lr must be positive and finite"));
        }
        if self.steps == 0 || self.batch_size == 0 {
            return Err(Error::Domain("steps and batch_size must be >= 1"));
        }
        if !self.scaling_const.is_finite() {
            return Err(Error::Domain("scaling_const must be finite"));
        }
        Ok(())
    }
}

/// Loss per optimizer step, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    pub losses: Vec<f32>,
}

impl TrainReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.losses.last().copied()
    }

    /// Mean loss over the first and last `window` steps.
    pub fn head_tail_means(&self, window: usize) -> Option<(f32, f32)> {
        let w = window.min(self.losses.len());
        if w == 0 {
            return None;
        }
        let mean = |xs: &[f32]| xs.iter().sum::<f32>() / xs.len() as f32;
        Some((
            mean(&self.losses[..w]),
            mean(&self.losses[self.losses.len() - w..]),
        ))
    }
}

/// Train `model` on `features: [N, D]` with `labels: [N]`.
///
/// Minibatch rows are drawn with replacement from a `ChaCha8Rng` seeded by `cfg.seed`.
pub fn train_diglm(
    mut model: Diglm<BurnBackend>,
    features: &ArrayView2<f32>,
    labels: &ArrayView1<f32>,
    cfg: &DiglmTrainConfig,
    device: &<BurnBackend as Backend>::Device,
) -> Result<(Diglm<BurnBackend>, TrainReport)> {
    cfg.validate()?;
    let (n, d) = features.dim();
    if n == 0 || d == 0 {
        return Err(Error::Domain("features must be non-empty"));
    }
    if labels.len() != n {
        return Err(Error::Shape(format!(
            "{} labels for {n} feature rows",
            labels.len()
        )));
    }
    if d != model.num_features() {
        return Err(Error::Shape(format!(
            "features have {d} columns, model expects {}",
            model.num_features()
        )));
    }

    let mut optim = AdamConfig::new().init::<BurnBackend, Diglm<BurnBackend>>();
    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);

    let bs = cfg.batch_size;
    let mut xs = Array2::<f32>::zeros((bs, d));
    let mut ys = Array1::<f32>::zeros(bs);
    let mut report = TrainReport {
        losses: Vec::with_capacity(cfg.steps),
    };

    for step in 0..cfg.steps {
        for i in 0..bs {
            let j = rng.random_range(0..n);
            xs.row_mut(i).assign(&features.row(j));
            ys[i] = labels[j];
        }
        let batch = JointSample::new(
            array2_to_tensor::<BurnBackend>(device, &xs.view()),
            array1_to_column::<BurnBackend>(device, &ys.view()),
        )?;

        let loss = model
            .weighted_log_prob(&batch, cfg.scaling_const)?
            .mean()
            .neg();
        let value = host_vec(loss.clone())?
            .first()
            .copied()
            .ok_or_else(|| Error::Data("empty loss tensor".into()))?;
        if !value.is_finite() {
            return Err(Error::Domain("training loss became non-finite"));
        }
        tracing::debug!(step, loss = value, "diglm train step");
        report.losses.push(value);

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(cfg.lr, model, grads);
    }

    tracing::info!(
        steps = cfg.steps,
        batch_size = bs,
        final_loss = report.final_loss(),
        "diglm training finished"
    );
    Ok((model, report))
}
