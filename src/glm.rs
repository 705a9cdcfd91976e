//! Exponential-family response models for the GLM head.
//!
//! Each family fixes a canonical link; `moments` evaluates the response mean, its variance
//! and `d mean / d eta` at the linear predictor, and `log_prob` scores observed responses.
//! `log_prob` fails with `Error::Domain` when a response lies outside the family's support.

use burn_core as burn;

use burn::tensor::{activation, backend::Backend, Tensor, TensorData};
use rand_distr::{Distribution, Poisson as PoissonDist, StandardNormal};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use crate::interop::host_vec;
use crate::{Error, Result};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Predictors are clamped to `[-MAX_LOG_RATE, MAX_LOG_RATE]` before a Poisson draw.
const MAX_LOG_RATE: f32 = 30.0;

/// GLM summary statistics at a linear predictor, each `[N]`.
#[derive(Debug, Clone)]
pub struct GlmMoments<B: Backend> {
    pub mean: Tensor<B, 1>,
    pub variance: Tensor<B, 1>,
    pub grad_mean: Tensor<B, 1>,
}

/// A response distribution parameterized through its canonical link.
pub trait ExponentialFamily {
    fn name(&self) -> &'static str;

    fn moments<B: Backend>(&self, eta: Tensor<B, 1>) -> GlmMoments<B>;

    /// `log p(response | eta)` elementwise.
    fn log_prob<B: Backend>(
        &self,
        response: Tensor<B, 1>,
        eta: Tensor<B, 1>,
    ) -> Result<Tensor<B, 1>>;

    /// One response draw at `eta`.
    fn sample_response(&self, eta: f32, rng: &mut impl rand::Rng) -> f32;
}

/// Binary response with logit link: `mean = sigmoid(eta)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bernoulli;

impl ExponentialFamily for Bernoulli {
    fn name(&self) -> &'static str {
        "bernoulli"
    }

    fn moments<B: Backend>(&self, eta: Tensor<B, 1>) -> GlmMoments<B> {
        let mean = activation::sigmoid(eta);
        let variance = mean.clone() * mean.clone().neg().add_scalar(1.0);
        GlmMoments {
            grad_mean: variance.clone(),
            variance,
            mean,
        }
    }

    fn log_prob<B: Backend>(
        &self,
        response: Tensor<B, 1>,
        eta: Tensor<B, 1>,
    ) -> Result<Tensor<B, 1>> {
        // y log σ(η) + (1 - y) log σ(-η)
        let pos = activation::log_sigmoid(eta.clone());
        let neg = activation::log_sigmoid(eta.neg());
        Ok(response.clone() * pos + response.neg().add_scalar(1.0) * neg)
    }

    fn sample_response(&self, eta: f32, rng: &mut impl rand::Rng) -> f32 {
        let p = 1.0 / (1.0 + (-eta).exp());
        let u: f32 = rng.random();
        if u < p {
            1.0
        } else {
            0.0
        }
    }
}

/// Real response with identity link and unit scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Normal;

impl ExponentialFamily for Normal {
    fn name(&self) -> &'static str {
        "normal"
    }

    fn moments<B: Backend>(&self, eta: Tensor<B, 1>) -> GlmMoments<B> {
        let ones = eta.ones_like();
        GlmMoments {
            mean: eta,
            variance: ones.clone(),
            grad_mean: ones,
        }
    }

    fn log_prob<B: Backend>(
        &self,
        response: Tensor<B, 1>,
        eta: Tensor<B, 1>,
    ) -> Result<Tensor<B, 1>> {
        Ok((response - eta)
            .powf_scalar(2.0)
            .mul_scalar(-0.5)
            .sub_scalar(0.5 * LN_2PI))
    }

    fn sample_response(&self, eta: f32, rng: &mut impl rand::Rng) -> f32 {
        let e: f32 = StandardNormal.sample(rng);
        eta + e
    }
}

/// Count response with log link: `mean = variance = exp(eta)`.
///
/// `log p(y) = y * eta - exp(eta) - ln Γ(y + 1)`. The `ln Γ` term does not depend on the
/// parameters, so it is evaluated on the host and enters as a constant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poisson;

impl ExponentialFamily for Poisson {
    fn name(&self) -> &'static str {
        "poisson"
    }

    fn moments<B: Backend>(&self, eta: Tensor<B, 1>) -> GlmMoments<B> {
        let mean = eta.exp();
        GlmMoments {
            variance: mean.clone(),
            grad_mean: mean.clone(),
            mean,
        }
    }

    fn log_prob<B: Backend>(
        &self,
        response: Tensor<B, 1>,
        eta: Tensor<B, 1>,
    ) -> Result<Tensor<B, 1>> {
        let counts = host_vec(response.clone())?;
        if counts.iter().any(|y| !y.is_finite() || *y < 0.0) {
            return Err(Error::Domain(
                "poisson responses must be finite and non-negative",
            ));
        }
        let ln_factorials: Vec<f32> = counts
            .iter()
            .map(|&y| ln_gamma(f64::from(y) + 1.0) as f32)
            .collect();
        let n = ln_factorials.len();
        let ln_factorials = Tensor::from_data(TensorData::new(ln_factorials, [n]), &eta.device());
        Ok(response * eta.clone() - eta.exp() - ln_factorials)
    }

    fn sample_response(&self, eta: f32, rng: &mut impl rand::Rng) -> f32 {
        let rate = eta.clamp(-MAX_LOG_RATE, MAX_LOG_RATE).exp();
        PoissonDist::new(rate).map_or(0.0, |d| d.sample(rng))
    }
}

/// The families available to a `Diglm`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Glm {
    #[default]
    Bernoulli,
    Normal,
    Poisson,
}

impl From<Bernoulli> for Glm {
    fn from(_: Bernoulli) -> Self {
        Glm::Bernoulli
    }
}

impl From<Normal> for Glm {
    fn from(_: Normal) -> Self {
        Glm::Normal
    }
}

impl From<Poisson> for Glm {
    fn from(_: Poisson) -> Self {
        Glm::Poisson
    }
}

impl ExponentialFamily for Glm {
    fn name(&self) -> &'static str {
        match self {
            Glm::Bernoulli => Bernoulli.name(),
            Glm::Normal => Normal.name(),
            Glm::Poisson => Poisson.name(),
        }
    }

    fn moments<B: Backend>(&self, eta: Tensor<B, 1>) -> GlmMoments<B> {
        match self {
            Glm::Bernoulli => Bernoulli.moments(eta),
            Glm::Normal => Normal.moments(eta),
            Glm::Poisson => Poisson.moments(eta),
        }
    }

    fn log_prob<B: Backend>(
        &self,
        response: Tensor<B, 1>,
        eta: Tensor<B, 1>,
    ) -> Result<Tensor<B, 1>> {
        match self {
            Glm::Bernoulli => Bernoulli.log_prob(response, eta),
            Glm::Normal => Normal.log_prob(response, eta),
            Glm::Poisson => Poisson.log_prob(response, eta),
        }
    }

    fn sample_response(&self, eta: f32, rng: &mut impl rand::Rng) -> f32 {
        match self {
            Glm::Bernoulli => Bernoulli.sample_response(eta, rng),
            Glm::Normal => Normal.sample_response(eta, rng),
            Glm::Poisson => Poisson.sample_response(eta, rng),
        }
    }
}
