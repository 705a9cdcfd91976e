//! Masks and spline coupling layers.
//!
//! A coupling layer holds `|m|` coordinates fixed (the head of the vector for `m > 0`, the
//! tail for `m < 0`) and passes every other coordinate through its own rational-quadratic
//! spline, whose parameters are computed from the fixed coordinates. The Jacobian is
//! block-triangular, so its log-determinant is the sum of the spline log-derivatives.

use burn_core as burn;

use burn::module::{Ignored, Module};
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::bijector::{check_event_dim, Bijector};
use crate::initializer::{SplineConditioner, SplineInitializer};
use crate::{Error, Result};

/// A validated coupling mask for a `num_features`-dimensional vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    signed: i64,
    num_features: usize,
}

impl Mask {
    /// `signed` counts the held-fixed coordinates; its sign picks the head (`+`) or the
    /// tail (`-`) of the vector. Requires `0 < |signed| < num_features`.
    pub fn new(signed: i64, num_features: usize) -> Result<Self> {
        let m = signed.unsigned_abs() as usize;
        if m == 0 || m >= num_features {
            return Err(Error::Config(format!(
                "mask {signed} out of range: need 0 < |mask| < {num_features}"
            )));
        }
        Ok(Self {
            signed,
            num_features,
        })
    }

    pub fn signed(&self) -> i64 {
        self.signed
    }

    /// Number of held-fixed coordinates.
    pub fn num_masked(&self) -> usize {
        self.signed.unsigned_abs() as usize
    }

    /// Number of spline-transformed coordinates.
    pub fn num_transformed(&self) -> usize {
        self.num_features - self.num_masked()
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Whether the fixed coordinates are the trailing ones.
    pub fn masks_tail(&self) -> bool {
        self.signed < 0
    }

    /// `(fixed, transformed)` column blocks of `x`.
    fn split<B: Backend>(&self, x: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let (m, t) = (self.num_masked(), self.num_transformed());
        if self.masks_tail() {
            (x.clone().narrow(1, t, m), x.narrow(1, 0, t))
        } else {
            (x.clone().narrow(1, 0, m), x.narrow(1, m, t))
        }
    }

    fn join<B: Backend>(&self, fixed: Tensor<B, 2>, transformed: Tensor<B, 2>) -> Tensor<B, 2> {
        if self.masks_tail() {
            Tensor::cat(vec![transformed, fixed], 1)
        } else {
            Tensor::cat(vec![fixed, transformed], 1)
        }
    }
}

/// Masked coupling layer with a neural spline transformer.
#[derive(Module, Debug)]
pub struct CouplingLayer<B: Backend> {
    conditioner: SplineConditioner<B>,
    mask: Ignored<Mask>,
}

impl<B: Backend> CouplingLayer<B> {
    pub fn new(mask: Mask, spline: &SplineInitializer, device: &B::Device) -> Result<Self> {
        let conditioner = spline.build(mask.num_masked(), mask.num_transformed(), device)?;
        Ok(Self {
            conditioner,
            mask: Ignored(mask),
        })
    }

    pub fn mask(&self) -> Mask {
        self.mask.0
    }

    pub fn conditioner(&self) -> &SplineConditioner<B> {
        &self.conditioner
    }
}

impl<B: Backend> Bijector<B> for CouplingLayer<B> {
    fn forward_and_log_det(&self, x: Tensor<B, 2>) -> Result<(Tensor<B, 2>, Tensor<B, 1>)> {
        let mask = self.mask.0;
        check_event_dim(&x, mask.num_features(), "coupling layer")?;
        let (fixed, free) = mask.split(x);
        let spline = self.conditioner.spline(fixed.clone())?;
        let (free, log_det) = spline.forward_and_log_det(free)?;
        Ok((mask.join(fixed, free), log_det))
    }

    fn inverse_and_log_det(&self, y: Tensor<B, 2>) -> Result<(Tensor<B, 2>, Tensor<B, 1>)> {
        let mask = self.mask.0;
        check_event_dim(&y, mask.num_features(), "coupling layer")?;
        let (fixed, free) = mask.split(y);
        let spline = self.conditioner.spline(fixed.clone())?;
        let (free, log_det) = spline.inverse_and_log_det(free)?;
        Ok((mask.join(fixed, free), log_det))
    }
}
