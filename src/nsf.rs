//! Neural Spline Flow: a chain of spline coupling layers.
//!
//! The layer layout is given either as a split count or as an explicit mask list. With
//! `splits = s` over `D` features the layers hold fixed `⌊i·D/s⌋` leading coordinates, then
//! the same number of trailing coordinates, for `i = 1..s-1` (`2(s-1)` layers). Alternating
//! which end is held fixed lets every coordinate condition every other one.
//!
//! The split rule is also written as masks `trunc(D/i)` for `i` in `1-s..=s-1`, `i != 0`,
//! listed negatives first. That also yields `2(s-1)` masks, but `i = ±1` gives `|m| = D`, a
//! coupling with nothing left to transform: `D = 8, s = 4` produces `-2, -4, -8, 8, 4, 2`.
//! Holding the fraction `i/s` fixed instead (`⌊i·D/s⌋`) keeps the count and every mask
//! proper: `2, -2, 4, -4, 6, -6` for that case.

use burn_core as burn;

use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::bijector::{check_event_dim, Bijector};
use crate::coupling::{CouplingLayer, Mask};
use crate::initializer::SplineInitializer;
use crate::{Error, Result};

/// How the coupling layers partition the feature vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowLayout {
    Splits(usize),
    Masks(Vec<i64>),
}

impl FlowLayout {
    /// Resolve to validated masks for `num_features` coordinates.
    pub fn masks(&self, num_features: usize) -> Result<Vec<Mask>> {
        match self {
            FlowLayout::Splits(splits) => split_masks(*splits, num_features),
            FlowLayout::Masks(masks) => {
                if masks.is_empty() {
                    return Err(Error::Config("masks must not be empty".into()));
                }
                masks.iter().map(|&m| Mask::new(m, num_features)).collect()
            }
        }
    }
}

/// `+⌊i·D/s⌋, -⌊i·D/s⌋` for `i = 1..s-1`.
fn split_masks(splits: usize, num_features: usize) -> Result<Vec<Mask>> {
    if splits < 2 {
        return Err(Error::Config(format!(
            "features must be split in at least two pieces, got splits = {splits}"
        )));
    }
    let mut masks = Vec::with_capacity(2 * (splits - 1));
    for i in 1..splits {
        let m = (i * num_features / splits) as i64;
        masks.push(Mask::new(m, num_features)?);
        masks.push(Mask::new(-m, num_features)?);
    }
    Ok(masks)
}

/// Flow configuration: exactly one of `splits` / `masks`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralSplineFlowConfig {
    pub splits: Option<usize>,
    pub masks: Option<Vec<i64>>,
    pub spline: SplineInitializer,
}

impl NeuralSplineFlowConfig {
    pub fn with_splits(splits: usize) -> Self {
        Self {
            splits: Some(splits),
            ..Default::default()
        }
    }

    pub fn with_masks(masks: Vec<i64>) -> Self {
        Self {
            masks: Some(masks),
            ..Default::default()
        }
    }

    pub fn with_spline(mut self, spline: SplineInitializer) -> Self {
        self.spline = spline;
        self
    }

    pub fn layout(&self) -> Result<FlowLayout> {
        match (self.splits, &self.masks) {
            (Some(_), Some(_)) => Err(Error::Config(
                "specify `splits` or `masks`, not both".into(),
            )),
            (None, None) => Err(Error::Config("specify one of `splits` or `masks`".into())),
            (Some(s), None) => Ok(FlowLayout::Splits(s)),
            (None, Some(m)) => Ok(FlowLayout::Masks(m.clone())),
        }
    }
}

/// Neural Spline Flow bijector over `num_features`-dimensional vectors.
#[derive(Module, Debug)]
pub struct NeuralSplineFlow<B: Backend> {
    layers: Vec<CouplingLayer<B>>,
    num_features: usize,
}

impl<B: Backend> NeuralSplineFlow<B> {
    /// Validate the layout and build every coupling layer.
    pub fn new(
        config: &NeuralSplineFlowConfig,
        num_features: usize,
        device: &B::Device,
    ) -> Result<Self> {
        let masks = config.layout()?.masks(num_features)?;
        Self::from_masks(&masks, &config.spline, device)
    }

    /// Layout from a split count, as `splits` does in the config. Rejects `nsplits < 2`.
    pub fn from_split_features(
        nsplits: usize,
        nfeatures: usize,
        spline: &SplineInitializer,
        device: &B::Device,
    ) -> Result<Self> {
        let masks = split_masks(nsplits, nfeatures)?;
        Self::from_masks(&masks, spline, device)
    }

    fn from_masks(masks: &[Mask], spline: &SplineInitializer, device: &B::Device) -> Result<Self> {
        spline.validate()?;
        let num_features = match masks.first() {
            Some(m) => m.num_features(),
            None => return Err(Error::Config("a flow needs at least one mask".into())),
        };
        if masks.iter().any(|m| m.num_features() != num_features) {
            return Err(Error::Config("all masks must share one feature count".into()));
        }
        let mut layers = Vec::with_capacity(masks.len());
        for (i, &mask) in masks.iter().enumerate() {
            tracing::debug!(
                layer = i,
                mask = mask.signed(),
                transformed = mask.num_transformed(),
                "building coupling layer"
            );
            layers.push(CouplingLayer::new(mask, spline, device)?);
        }
        tracing::info!(
            num_features,
            num_layers = layers.len(),
            nbins = spline.nbins,
            "built neural spline flow"
        );
        Ok(Self {
            layers,
            num_features,
        })
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[CouplingLayer<B>] {
        &self.layers
    }

    /// Signed masks in chain order.
    pub fn masks(&self) -> Vec<i64> {
        self.layers.iter().map(|l| l.mask().signed()).collect()
    }
}

impl<B: Backend> Bijector<B> for NeuralSplineFlow<B> {
    fn forward_and_log_det(&self, x: Tensor<B, 2>) -> Result<(Tensor<B, 2>, Tensor<B, 1>)> {
        check_event_dim(&x, self.num_features, "neural spline flow")?;
        self.layers.as_slice().forward_and_log_det(x)
    }

    fn inverse_and_log_det(&self, y: Tensor<B, 2>) -> Result<(Tensor<B, 2>, Tensor<B, 1>)> {
        check_event_dim(&y, self.num_features, "neural spline flow")?;
        self.layers.as_slice().inverse_and_log_det(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InferenceBackend as B;
    use burn::tensor::Distribution;

    fn small() -> SplineInitializer {
        SplineInitializer {
            nbins: 8,
            border: 3.0,
            hidden_layers: vec![16],
            ..Default::default()
        }
    }

    fn signed(masks: Vec<Mask>) -> Vec<i64> {
        masks.iter().map(|m| m.signed()).collect()
    }

    #[test]
    fn splits_expand_to_alternating_fractions() {
        let masks = FlowLayout::Splits(4).masks(8).unwrap();
        assert_eq!(signed(masks), vec![2, -2, 4, -4, 6, -6]);
        let masks = FlowLayout::Splits(4).masks(12).unwrap();
        assert_eq!(signed(masks), vec![3, -3, 6, -6, 9, -9]);
        let masks = FlowLayout::Splits(2).masks(5).unwrap();
        assert_eq!(signed(masks), vec![2, -2]);
    }

    #[test]
    fn reciprocal_split_masks_include_a_degenerate_layer() {
        // `trunc(D/i)` for i in -3..=3, i != 0, over 8 features.
        let reciprocal: Vec<i64> = (-3i64..=3).filter(|&i| i != 0).map(|i| 8 / i).collect();
        assert_eq!(reciprocal, vec![-2, -4, -8, 8, 4, 2]);
        assert!(matches!(
            FlowLayout::Masks(reciprocal).masks(8),
            Err(Error::Config(_))
        ));
        assert_eq!(FlowLayout::Splits(4).masks(8).unwrap().len(), 6);
    }

    #[test]
    fn splits_below_two_are_rejected() {
        assert!(matches!(FlowLayout::Splits(1).masks(8), Err(Error::Config(_))));
        assert!(matches!(FlowLayout::Splits(0).masks(8), Err(Error::Config(_))));
    }

    #[test]
    fn too_many_splits_for_the_features_is_rejected() {
        // ⌊1·3/4⌋ = 0 cannot be a mask.
        assert!(matches!(FlowLayout::Splits(4).masks(3), Err(Error::Config(_))));
    }

    #[test]
    fn explicit_masks_are_checked() {
        assert!(FlowLayout::Masks(vec![4, 3, -2, -4]).masks(12).is_ok());
        assert!(matches!(FlowLayout::Masks(vec![12]).masks(12), Err(Error::Config(_))));
        assert!(matches!(FlowLayout::Masks(vec![]).masks(12), Err(Error::Config(_))));
    }

    #[test]
    fn config_needs_exactly_one_layout() {
        let both = NeuralSplineFlowConfig {
            splits: Some(2),
            masks: Some(vec![1]),
            ..Default::default()
        };
        assert!(matches!(both.layout(), Err(Error::Config(_))));
        assert!(matches!(
            NeuralSplineFlowConfig::default().layout(),
            Err(Error::Config(_))
        ));
        assert_eq!(
            NeuralSplineFlowConfig::with_splits(3).layout().unwrap(),
            FlowLayout::Splits(3)
        );
    }

    #[test]
    fn construction_fails_synchronously() {
        let device = Default::default();
        let cfg = NeuralSplineFlowConfig::with_splits(1).with_spline(small());
        assert!(matches!(
            NeuralSplineFlow::<B>::new(&cfg, 8, &device),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            NeuralSplineFlow::<B>::from_split_features(1, 8, &small(), &device),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn from_split_features_matches_splits_config() {
        let device = Default::default();
        let a = NeuralSplineFlow::<B>::from_split_features(3, 9, &small(), &device).unwrap();
        let cfg = NeuralSplineFlowConfig::with_splits(3).with_spline(small());
        let b = NeuralSplineFlow::<B>::new(&cfg, 9, &device).unwrap();
        assert_eq!(a.masks(), b.masks());
        assert_eq!(a.masks(), vec![3, -3, 6, -6]);
        assert_eq!(a.num_layers(), 4);
    }

    #[test]
    fn flow_roundtrip_on_batch() {
        let device = Default::default();
        let cfg = NeuralSplineFlowConfig::with_masks(vec![2, -3, 1]).with_spline(small());
        let flow = NeuralSplineFlow::<B>::new(&cfg, 5, &device).unwrap();
        let x = Tensor::<B, 2>::random([8, 5], Distribution::Normal(0.0, 1.5), &device);
        let (y, fldj) = flow.forward_and_log_det(x.clone()).unwrap();
        let (back, ildj) = flow.inverse_and_log_det(y).unwrap();

        let a = back.into_data().to_vec::<f32>().unwrap();
        let b = x.into_data().to_vec::<f32>().unwrap();
        for (u, v) in a.iter().zip(&b) {
            assert!((u - v).abs() < 1e-3, "{u} vs {v}");
        }
        let f = fldj.into_data().to_vec::<f32>().unwrap();
        let i = ildj.into_data().to_vec::<f32>().unwrap();
        assert_eq!(f.len(), 8);
        for (u, v) in f.iter().zip(&i) {
            assert!((u + v).abs() < 1e-3);
        }
    }

    #[test]
    fn flow_rejects_wrong_dimension() {
        let device = Default::default();
        let flow = NeuralSplineFlow::<B>::from_split_features(2, 4, &small(), &device).unwrap();
        let x = Tensor::<B, 2>::zeros([2, 5], &device);
        assert!(matches!(flow.forward(x), Err(Error::Shape(_))));
    }

    #[test]
    fn flow_rejects_empty_batches() {
        let device = Default::default();
        let flow = NeuralSplineFlow::<B>::from_split_features(2, 4, &small(), &device).unwrap();
        let x = Tensor::<B, 2>::zeros([0, 4], &device);
        assert!(matches!(flow.forward(x.clone()), Err(Error::Shape(_))));
        assert!(matches!(flow.inverse(x), Err(Error::Shape(_))));
    }

    #[test]
    fn config_roundtrips_through_json() {
        let cfg = NeuralSplineFlowConfig::with_masks(vec![2, -2]).with_spline(small());
        let json = serde_json::to_string(&cfg).unwrap();
        let back: NeuralSplineFlowConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);

        let partial: NeuralSplineFlowConfig = serde_json::from_str(r#"{"splits": 4}"#).unwrap();
        assert_eq!(partial.splits, Some(4));
        assert_eq!(partial.spline, SplineInitializer::default());
    }
}
