//! Base distribution and the flow-transformed feature distribution.

use burn_core as burn;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand_distr::{Distribution, StandardNormal};

use crate::bijector::{check_event_dim, Bijector};
use crate::Result;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Isotropic multivariate normal `N(0, I_dim)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsotropicNormal {
    pub dim: usize,
}

impl IsotropicNormal {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// `log N(z; 0, I)` per row of `z: [N, dim]`.
    pub fn log_prob<B: Backend>(&self, z: Tensor<B, 2>) -> Result<Tensor<B, 1>> {
        check_event_dim(&z, self.dim, "isotropic normal")?;
        let [n, _] = z.dims();
        Ok(z.powf_scalar(2.0)
            .sum_dim(1)
            .reshape([n])
            .mul_scalar(-0.5)
            .sub_scalar(0.5 * self.dim as f64 * LN_2PI))
    }

    /// `n` draws as an `[n, dim]` tensor.
    pub fn sample<B: Backend>(
        &self,
        n: usize,
        rng: &mut impl rand::Rng,
        device: &B::Device,
    ) -> Tensor<B, 2> {
        let values: Vec<f32> = (0..n * self.dim)
            .map(|_| StandardNormal.sample(&mut *rng))
            .collect();
        Tensor::from_data(TensorData::new(values, [n, self.dim]), device)
    }
}

/// `x = f(z)` with `z ~ base`: density by change of variables through `f^{-1}`.
#[derive(Debug, Clone, Copy)]
pub struct TransformedDistribution<'a, T> {
    pub base: IsotropicNormal,
    pub bijector: &'a T,
}

impl<'a, T> TransformedDistribution<'a, T> {
    pub fn new(base: IsotropicNormal, bijector: &'a T) -> Self {
        Self { base, bijector }
    }

    /// Draw `n` rows; returns `(x, z)` so callers can reuse the latent draw.
    pub fn sample_with_latent<B: Backend>(
        &self,
        n: usize,
        rng: &mut impl rand::Rng,
        device: &B::Device,
    ) -> Result<(Tensor<B, 2>, Tensor<B, 2>)>
    where
        T: Bijector<B>,
    {
        let z = self.base.sample::<B>(n, rng, device);
        let x = self.bijector.forward(z.clone())?;
        Ok((x, z))
    }

    pub fn sample<B: Backend>(
        &self,
        n: usize,
        rng: &mut impl rand::Rng,
        device: &B::Device,
    ) -> Result<Tensor<B, 2>>
    where
        T: Bijector<B>,
    {
        Ok(self.sample_with_latent(n, rng, device)?.0)
    }

    /// `(log p(x), z = f^{-1}(x))`.
    pub fn log_prob_with_latent<B: Backend>(
        &self,
        x: Tensor<B, 2>,
    ) -> Result<(Tensor<B, 1>, Tensor<B, 2>)>
    where
        T: Bijector<B>,
    {
        let (z, ildj) = self.bijector.inverse_and_log_det(x)?;
        let lp = self.base.log_prob(z.clone())? + ildj;
        Ok((lp, z))
    }

    pub fn log_prob<B: Backend>(&self, x: Tensor<B, 2>) -> Result<Tensor<B, 1>>
    where
        T: Bijector<B>,
    {
        Ok(self.log_prob_with_latent(x)?.0)
    }
}
