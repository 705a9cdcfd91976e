//! Evaluation utilities for DIGLM models (small + explicit).
//!
//! Scalars are computed host-side from plain slices, so they work on any backend's output
//! after a `to_vec`. Each function states the exact quantity it returns.

use burn_core as burn;

use burn::tensor::backend::Backend;

use crate::diglm::{Diglm, JointSample, DEFAULT_SCALING_CONST};
use crate::interop::host_vec;
use crate::{Error, Result};

/// Fraction of rows where `mean > threshold` agrees with `label > 0.5`.
pub fn binary_accuracy(mean: &[f32], labels: &[f32], threshold: f32) -> Result<f32> {
    if mean.is_empty() {
        return Err(Error::Domain("mean must be non-empty"));
    }
    if mean.len() != labels.len() {
        return Err(Error::Shape(format!(
            "{} predictions for {} labels",
            mean.len(),
            labels.len()
        )));
    }
    if !threshold.is_finite() {
        return Err(Error::Domain("threshold must be finite"));
    }
    let hits = mean
        .iter()
        .zip(labels)
        .filter(|(&m, &y)| (m > threshold) == (y > 0.5))
        .count();
    Ok(hits as f32 / mean.len() as f32)
}

/// Average log-likelihood (nats per observation).
pub fn mean_log_likelihood(values: &[f32]) -> Result<f32> {
    if values.is_empty() {
        return Err(Error::Domain("values must be non-empty"));
    }
    let sum: f64 = values.iter().map(|&v| v as f64).sum();
    Ok((sum / values.len() as f64) as f32)
}

/// `-mean(log p(x)) / (D ln 2)`: bits per feature dimension.
///
/// This is a continuous density, so the value can be negative; it is *not* a
/// dequantized image-style bpd.
pub fn bits_per_dim(log_prob: &[f32], num_features: usize) -> Result<f32> {
    if num_features == 0 {
        return Err(Error::Domain("num_features must be >= 1"));
    }
    let ll = mean_log_likelihood(log_prob)?;
    Ok(-ll / (num_features as f32 * core::f32::consts::LN_2))
}

/// Summary of a model on one labelled dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Only meaningful for binary labels.
    pub accuracy: f32,
    pub bits_per_dim: f32,
    /// Mean `log p(labels | features)`.
    pub label_log_likelihood: f32,
    /// Mean `weighted_log_prob` at [`DEFAULT_SCALING_CONST`].
    pub weighted_objective: f32,
}

pub fn evaluate<B: Backend>(model: &Diglm<B>, data: &JointSample<B>) -> Result<Evaluation> {
    let parts = model.log_prob_parts(data)?;
    let features_lp = parts.features.to_vec()?;
    let labels_lp = parts.labels.to_vec()?;
    let mean = host_vec(model.predict(data.features.clone())?.mean)?;
    let labels = host_vec(data.labels.clone())?;

    let weighted: Vec<f32> = labels_lp
        .iter()
        .zip(&features_lp)
        .map(|(y, x)| y + DEFAULT_SCALING_CONST as f32 * x)
        .collect();
    Ok(Evaluation {
        accuracy: binary_accuracy(&mean, &labels, 0.5)?,
        bits_per_dim: bits_per_dim(&features_lp, model.num_features())?,
        label_log_likelihood: mean_log_likelihood(&labels_lp)?,
        weighted_objective: mean_log_likelihood(&weighted)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accuracy_counts_agreements() -> Result<()> {
        let mean = [0.9f32, 0.2, 0.6, 0.4];
        let labels = [1.0f32, 0.0, 0.0, 0.0];
        assert_eq!(binary_accuracy(&mean, &labels, 0.5)?, 0.75);
        Ok(())
    }

    #[test]
    fn bits_per_dim_of_standard_normal_origin() -> Result<()> {
        // log N(0; 0, I_2) = -ln(2π)
        let lp = -(2.0 * core::f32::consts::PI).ln();
        let bpd = bits_per_dim(&[lp, lp], 2)?;
        let expected = (2.0 * core::f32::consts::PI).ln() / (2.0 * core::f32::consts::LN_2);
        assert!((bpd - expected).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn error_contracts() {
        assert!(matches!(binary_accuracy(&[], &[], 0.5), Err(Error::Domain(_))));
        assert!(matches!(binary_accuracy(&[0.1], &[0.0, 1.0], 0.5), Err(Error::Shape(_))));
        assert!(matches!(binary_accuracy(&[0.1], &[0.0], f32::NAN), Err(Error::Domain(_))));
        assert!(mean_log_likelihood(&[]).is_err());
        assert!(bits_per_dim(&[1.0], 0).is_err());
    }

    #[test]
    fn evaluate_reports_finite_scalars() -> Result<()> {
        use crate::glm::Bernoulli;
        use crate::initializer::SplineInitializer;
        use crate::nsf::NeuralSplineFlow;
        use crate::InferenceBackend as B;

        let device = Default::default();
        let spline = SplineInitializer {
            nbins: 6,
            border: 3.0,
            hidden_layers: vec![8],
            ..Default::default()
        };
        let flow = NeuralSplineFlow::<B>::from_split_features(2, 3, &spline, &device)?;
        let model = Diglm::new(flow, Bernoulli, 3, &device)?;
        let data = model.sample(&[16], 11)?;
        let eval = evaluate(&model, &data)?;
        assert!((0.0..=1.0).contains(&eval.accuracy));
        assert!(eval.bits_per_dim.is_finite());
        assert!(eval.label_log_likelihood <= 0.0);
        assert!(eval.weighted_objective.is_finite());
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            .. ProptestConfig::default()
        })]
        #[test]
        fn prop_accuracy_is_a_fraction(
            rows in prop::collection::vec((0.0f32..1.0, any::<bool>()), 1..64),
            threshold in 0.0f32..1.0,
        ) {
            let mean: Vec<f32> = rows.iter().map(|r| r.0).collect();
            let labels: Vec<f32> = rows.iter().map(|r| if r.1 { 1.0 } else { 0.0 }).collect();
            let acc = binary_accuracy(&mean, &labels, threshold).unwrap();
            prop_assert!((0.0..=1.0).contains(&acc));

            let flipped: Vec<f32> = labels.iter().map(|y| 1.0 - y).collect();
            let acc_flipped = binary_accuracy(&mean, &flipped, threshold).unwrap();
            prop_assert!((acc + acc_flipped - 1.0).abs() < 1e-5);
        }
    }
}
