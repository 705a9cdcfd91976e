//! The DIGLM joint model over `{features, labels}`.
//!
//! - `features ~ TransformedDistribution(N(0, I_D), flow)`
//! - `labels | features ~ GLM(eta)`, `eta = flow^{-1}(features) · beta + beta_0`
//!
//! `weighted_log_prob` is the hybrid training objective
//! `log p(labels | features) + scaling_const * log p(features)`.

use burn_core as burn;

use burn::module::{Ignored, Module, Param};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::bijector::{check_event_dim, Bijector};
use crate::distribution::{IsotropicNormal, TransformedDistribution};
use crate::glm::{ExponentialFamily, Glm, GlmMoments};
use crate::interop::host_vec;
use crate::nsf::NeuralSplineFlow;
use crate::{Error, Result};

/// Weight of the generative term in [`Diglm::weighted_log_prob`] unless told otherwise.
pub const DEFAULT_SCALING_CONST: f64 = 0.1;

fn batch_len(batch_shape: &[usize]) -> usize {
    batch_shape.iter().product()
}

/// A batch of `{features, labels}` observations.
///
/// Rows are flattened: `features` is `[N, D]`, `labels` is `[N, 1]`, and `batch_shape`
/// (whose product is `N`) records the logical prefix. An empty `batch_shape` is a single
/// unbatched observation.
#[derive(Debug, Clone)]
pub struct JointSample<B: Backend> {
    pub features: Tensor<B, 2>,
    pub labels: Tensor<B, 2>,
    pub batch_shape: Vec<usize>,
}

impl<B: Backend> JointSample<B> {
    /// A flat batch: `batch_shape = [N]`.
    pub fn new(features: Tensor<B, 2>, labels: Tensor<B, 2>) -> Result<Self> {
        let [n, _] = features.dims();
        let [n_labels, label_dim] = labels.dims();
        if n == 0 {
            return Err(Error::Shape("a joint sample needs at least one row".into()));
        }
        if n_labels != n || label_dim != 1 {
            return Err(Error::Shape(format!(
                "labels must be [{n}, 1] to match features, got [{n_labels}, {label_dim}]"
            )));
        }
        Ok(Self {
            features,
            labels,
            batch_shape: vec![n],
        })
    }

    /// A single observation: `features [D]`, `labels [1]`.
    pub fn unbatched(features: Tensor<B, 1>, labels: Tensor<B, 1>) -> Result<Self> {
        let [d] = features.dims();
        let [k] = labels.dims();
        Self::new(features.reshape([1, d]), labels.reshape([1, k]))?.with_batch_shape(vec![])
    }

    /// Reinterpret the rows under another batch prefix with the same element count.
    pub fn with_batch_shape(mut self, batch_shape: Vec<usize>) -> Result<Self> {
        let [n, _] = self.features.dims();
        if batch_len(&batch_shape) != n {
            return Err(Error::Shape(format!(
                "batch shape {batch_shape:?} does not cover {n} rows"
            )));
        }
        self.batch_shape = batch_shape;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.features.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `batch_shape ++ [D]`.
    pub fn features_shape(&self) -> Vec<usize> {
        let mut shape = self.batch_shape.clone();
        shape.push(self.features.dims()[1]);
        shape
    }

    /// `batch_shape ++ [1]`.
    pub fn labels_shape(&self) -> Vec<usize> {
        let mut shape = self.batch_shape.clone();
        shape.push(self.labels.dims()[1]);
        shape
    }
}

/// Per-observation log-densities with their logical batch prefix.
#[derive(Debug, Clone)]
pub struct LogProb<B: Backend> {
    pub values: Tensor<B, 1>,
    pub batch_shape: Vec<usize>,
}

impl<B: Backend> LogProb<B> {
    /// Logical shape; `[]` for an unbatched observation.
    pub fn shape(&self) -> &[usize] {
        &self.batch_shape
    }

    pub fn to_vec(&self) -> Result<Vec<f32>> {
        host_vec(self.values.clone())
    }

    /// Mean over every observation, kept on the graph (the training loss is `-mean`).
    pub fn mean(&self) -> Tensor<B, 1> {
        self.values.clone().mean()
    }

    fn map(self, f: impl FnOnce(Tensor<B, 1>) -> Tensor<B, 1>) -> Self {
        Self {
            values: f(self.values),
            batch_shape: self.batch_shape,
        }
    }
}

/// The two terms of the joint log-density.
#[derive(Debug, Clone)]
pub struct LogProbParts<B: Backend> {
    /// `log p(features)`
    pub features: LogProb<B>,
    /// `log p(labels | features)`
    pub labels: LogProb<B>,
}

/// Deep invertible GLM: a neural spline flow over features with a GLM head on the latent code.
#[derive(Module, Debug)]
pub struct Diglm<B: Backend> {
    flow: NeuralSplineFlow<B>,
    beta: Param<Tensor<B, 1>>,
    beta_0: Param<Tensor<B, 1>>,
    glm: Ignored<Glm>,
    name: Ignored<String>,
    num_features: usize,
}

impl<B: Backend> Diglm<B> {
    /// `beta` starts at ones and `beta_0` at zero. A flow over a different number of
    /// features than `num_features` is rejected here.
    pub fn new(
        flow: NeuralSplineFlow<B>,
        glm: impl Into<Glm>,
        num_features: usize,
        device: &B::Device,
    ) -> Result<Self> {
        if flow.num_features() != num_features {
            return Err(Error::Shape(format!(
                "flow acts on {} features but the model has num_features = {num_features}",
                flow.num_features()
            )));
        }
        Ok(Self {
            flow,
            beta: Param::from_tensor(Tensor::ones([num_features], device)),
            beta_0: Param::from_tensor(Tensor::zeros([1], device)),
            glm: Ignored(glm.into()),
            name: Ignored("diglm".to_string()),
            num_features,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Ignored(name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name.0
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn glm(&self) -> Glm {
        self.glm.0
    }

    pub fn bijector(&self) -> &NeuralSplineFlow<B> {
        &self.flow
    }

    pub fn beta(&self) -> Tensor<B, 1> {
        self.beta.val()
    }

    pub fn beta_0(&self) -> Tensor<B, 1> {
        self.beta_0.val()
    }

    fn device(&self) -> B::Device {
        self.beta.val().device()
    }

    fn features_distribution(&self) -> TransformedDistribution<'_, NeuralSplineFlow<B>> {
        TransformedDistribution::new(IsotropicNormal::new(self.num_features), &self.flow)
    }

    /// Latent code `z = flow^{-1}(x)` for `x: [N, D]`.
    pub fn latent_features(&self, features: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        self.flow.inverse(features)
    }

    fn eta_from_latent(&self, z: Tensor<B, 2>) -> Tensor<B, 1> {
        let [n, d] = z.dims();
        let eta = z.matmul(self.beta.val().reshape([d, 1])) + self.beta_0.val().reshape([1, 1]);
        eta.reshape([n])
    }

    /// Linear predictor `eta = z · beta + beta_0`, shape `[N]`.
    pub fn eta_from_features(&self, features: Tensor<B, 2>) -> Result<Tensor<B, 1>> {
        Ok(self.eta_from_latent(self.latent_features(features)?))
    }

    /// GLM mean, variance and `d mean / d eta` at the flow-derived predictor.
    pub fn predict(&self, features: Tensor<B, 2>) -> Result<GlmMoments<B>> {
        Ok(self.glm.0.moments(self.eta_from_features(features)?))
    }

    /// Draw `prod(batch_shape)` joint observations.
    ///
    /// Features come from the flow's forward map of a base draw; labels are drawn from the
    /// GLM at the predictor of that same latent draw.
    ///
    /// Every extent of `batch_shape` must be positive.
    pub fn sample(&self, batch_shape: &[usize], seed: u64) -> Result<JointSample<B>> {
        if batch_shape.contains(&0) {
            return Err(Error::Shape(format!(
                "cannot sample an empty batch {batch_shape:?}"
            )));
        }
        let n = batch_len(batch_shape);
        let device = self.device();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (features, z) = self
            .features_distribution()
            .sample_with_latent::<B>(n, &mut rng, &device)?;
        let eta = host_vec(self.eta_from_latent(z))?;
        let labels: Vec<f32> = eta
            .iter()
            .map(|&e| self.glm.0.sample_response(e, &mut rng))
            .collect();
        let labels = Tensor::from_data(TensorData::new(labels, [n, 1]), &device);
        JointSample::new(features, labels)?.with_batch_shape(batch_shape.to_vec())
    }

    /// `log p(features)` and `log p(labels | features)` per observation.
    pub fn log_prob_parts(&self, value: &JointSample<B>) -> Result<LogProbParts<B>> {
        check_event_dim(&value.features, self.num_features, "diglm features")?;
        check_event_dim(&value.labels, 1, "diglm labels")?;
        let n = value.len();
        let (features_lp, z) = self
            .features_distribution()
            .log_prob_with_latent(value.features.clone())?;
        let eta = self.eta_from_latent(z);
        let labels_lp = self
            .glm
            .0
            .log_prob(value.labels.clone().reshape([n]), eta)?;
        Ok(LogProbParts {
            features: LogProb {
                values: features_lp,
                batch_shape: value.batch_shape.clone(),
            },
            labels: LogProb {
                values: labels_lp,
                batch_shape: value.batch_shape.clone(),
            },
        })
    }

    /// Joint `log p(features, labels)`.
    pub fn log_prob(&self, value: &JointSample<B>) -> Result<LogProb<B>> {
        let parts = self.log_prob_parts(value)?;
        let features = parts.features.values;
        Ok(parts.labels.map(|labels| labels + features))
    }

    /// `log p(labels | features) + scaling_const * log p(features)`.
    pub fn weighted_log_prob(
        &self,
        value: &JointSample<B>,
        scaling_const: f64,
    ) -> Result<LogProb<B>> {
        if !scaling_const.is_finite() {
            return Err(Error::Domain("scaling_const must be finite"));
        }
        let parts = self.log_prob_parts(value)?;
        let features = parts.features.values.mul_scalar(scaling_const);
        Ok(parts.labels.map(|labels| labels + features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glm::{Bernoulli, Normal, Poisson};
    use crate::initializer::SplineInitializer;
    use crate::InferenceBackend as B;
    use approx::assert_abs_diff_eq;
    use burn::tensor::Distribution;

    fn small_flow(d: usize) -> NeuralSplineFlow<B> {
        let spline = SplineInitializer {
            nbins: 8,
            border: 3.0,
            hidden_layers: vec![16],
            ..Default::default()
        };
        NeuralSplineFlow::from_split_features(2, d, &spline, &Default::default()).unwrap()
    }

    fn model(d: usize) -> Diglm<B> {
        Diglm::new(small_flow(d), Bernoulli, d, &Default::default()).unwrap()
    }

    #[test]
    fn construction_rejects_mismatched_flow() {
        let err = Diglm::new(small_flow(4), Bernoulli, 5, &Default::default());
        assert!(matches!(err, Err(Error::Shape(_))));
    }

    #[test]
    fn parameters_start_at_ones_and_zero() {
        let m = model(3);
        assert_eq!(host_vec(m.beta()).unwrap(), vec![1.0; 3]);
        assert_eq!(host_vec(m.beta_0()).unwrap(), vec![0.0]);
        assert_eq!(m.name(), "diglm");
        assert_eq!(m.clone().with_name("clf").name(), "clf");
        assert_eq!(m.glm(), Glm::Bernoulli);
    }

    #[test]
    fn unbatched_sample_shapes() {
        let s = model(4).sample(&[], 0).unwrap();
        assert_eq!(s.features_shape(), vec![4]);
        assert_eq!(s.labels_shape(), vec![1]);
    }

    #[test]
    fn batched_sample_shapes() {
        let s = model(4).sample(&[4, 5], 1).unwrap();
        assert_eq!(s.features_shape(), vec![4, 5, 4]);
        assert_eq!(s.labels_shape(), vec![4, 5, 1]);
        assert_eq!(s.len(), 20);
    }

    #[test]
    fn empty_batch_shapes_are_rejected() {
        let m = model(3);
        for shape in [vec![0], vec![0, 3], vec![4, 0, 2]] {
            assert!(
                matches!(m.sample(&shape, 1), Err(Error::Shape(_))),
                "{shape:?}"
            );
        }
        let device = Default::default();
        let empty = JointSample::new(
            Tensor::<B, 2>::zeros([0, 3], &device),
            Tensor::<B, 2>::zeros([0, 1], &device),
        );
        assert!(matches!(empty, Err(Error::Shape(_))));
    }

    #[test]
    fn sampling_is_reproducible_from_the_seed() {
        let m = model(3);
        let a = m.sample(&[6], 42).unwrap();
        let b = m.sample(&[6], 42).unwrap();
        assert_eq!(host_vec(a.features).unwrap(), host_vec(b.features).unwrap());
        assert_eq!(host_vec(a.labels).unwrap(), host_vec(b.labels).unwrap());
    }

    #[test]
    fn bernoulli_labels_are_binary() {
        let s = model(3).sample(&[32], 5).unwrap();
        for y in host_vec(s.labels).unwrap() {
            assert!(y == 0.0 || y == 1.0);
        }
    }

    #[test]
    fn weighted_log_prob_interpolates_the_parts() {
        let m = model(4);
        let s = m.sample(&[6, 3, 5], 2).unwrap();
        let parts = m.log_prob_parts(&s).unwrap();
        let w = m.weighted_log_prob(&s, 0.25).unwrap();
        let joint = m.log_prob(&s).unwrap();
        assert_eq!(w.shape(), &[6, 3, 5]);
        assert_eq!(joint.shape(), &[6, 3, 5]);

        let fx = parts.features.to_vec().unwrap();
        let fy = parts.labels.to_vec().unwrap();
        let wv = w.to_vec().unwrap();
        let jv = joint.to_vec().unwrap();
        for i in 0..wv.len() {
            assert_abs_diff_eq!(wv[i], fy[i] + 0.25 * fx[i], epsilon = 1e-4);
            assert_abs_diff_eq!(jv[i], fy[i] + fx[i], epsilon = 1e-4);
        }
    }

    #[test]
    fn unbatched_weighted_log_prob_is_a_finite_scalar() {
        let m = model(4);
        let s = m.sample(&[], 9).unwrap();
        let w = m.weighted_log_prob(&s, DEFAULT_SCALING_CONST).unwrap();
        assert!(w.shape().is_empty());
        let v = w.to_vec().unwrap();
        assert_eq!(v.len(), 1);
        assert!(v[0].is_finite());
    }

    #[test]
    fn predict_returns_probabilities() {
        let device = Default::default();
        let m = model(3);
        let x = Tensor::<B, 2>::random([10, 3], Distribution::Normal(0.0, 1.0), &device);
        let moments = m.predict(x).unwrap();
        for p in host_vec(moments.mean).unwrap() {
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn eta_uses_the_latent_code() {
        let device = Default::default();
        let m = model(3);
        let x = Tensor::<B, 2>::random([5, 3], Distribution::Normal(0.0, 1.0), &device);
        let z = host_vec(m.latent_features(x.clone()).unwrap()).unwrap();
        let eta = host_vec(m.eta_from_features(x).unwrap()).unwrap();
        for (i, e) in eta.iter().enumerate() {
            let expected: f32 = z[3 * i..3 * i + 3].iter().sum();
            assert_abs_diff_eq!(*e, expected, epsilon = 1e-4);
        }
    }

    #[test]
    fn log_prob_rejects_wrong_feature_count() {
        let device = Default::default();
        let m = model(3);
        let s = JointSample::new(
            Tensor::<B, 2>::zeros([2, 4], &device),
            Tensor::<B, 2>::zeros([2, 1], &device),
        )
        .unwrap();
        assert!(matches!(m.log_prob(&s), Err(Error::Shape(_))));
    }

    #[test]
    fn joint_sample_validates_shapes() {
        let device = Default::default();
        let bad = JointSample::new(
            Tensor::<B, 2>::zeros([3, 2], &device),
            Tensor::<B, 2>::zeros([2, 1], &device),
        );
        assert!(matches!(bad, Err(Error::Shape(_))));
        let ok = JointSample::new(
            Tensor::<B, 2>::zeros([6, 2], &device),
            Tensor::<B, 2>::zeros([6, 1], &device),
        )
        .unwrap();
        assert!(ok.clone().with_batch_shape(vec![2, 3]).is_ok());
        assert!(matches!(ok.with_batch_shape(vec![4]), Err(Error::Shape(_))));

        let single = JointSample::unbatched(
            Tensor::<B, 1>::zeros([2], &device),
            Tensor::<B, 1>::zeros([1], &device),
        )
        .unwrap();
        assert_eq!(single.features_shape(), vec![2]);
    }

    #[test]
    fn normal_glm_scores_real_labels() {
        let device = Default::default();
        let m = Diglm::new(small_flow(2), Normal, 2, &device).unwrap();
        let s = m.sample(&[8], 3).unwrap();
        let lp = m.log_prob(&s).unwrap().to_vec().unwrap();
        assert!(lp.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn poisson_glm_samples_and_scores_counts() {
        let device = Default::default();
        let m = Diglm::new(small_flow(3), Poisson, 3, &device).unwrap();
        let s = m.sample(&[16], 9).unwrap();
        for y in host_vec(s.labels.clone()).unwrap() {
            assert!(y >= 0.0 && y.fract() == 0.0, "{y}");
        }
        let lp = m.log_prob(&s).unwrap().to_vec().unwrap();
        assert!(lp.iter().all(|v| v.is_finite()));

        let negative = JointSample::new(s.features, Tensor::<B, 2>::ones([16, 1], &device).neg())
            .unwrap();
        assert!(matches!(m.log_prob(&negative), Err(Error::Domain(_))));
    }
}
