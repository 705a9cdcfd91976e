//! Spline initializer (config) and the spline conditioner it builds.
//!
//! Building is an explicit, one-time sizing step: `SplineInitializer::build` takes the width
//! of the masked chunk and the number of splines and returns a `SplineConditioner` whose
//! networks are fixed from then on. A conditioner cannot be re-sized; a different `nunits`
//! needs a different `build` call (and gets independent weights).

use burn_core as burn;

use burn::module::{Ignored, Module};
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::bijector::check_event_dim;
use crate::block::{BinHead, SlopeHead, SplineBlock, SplineGeometry};
use crate::spline::{RationalQuadraticSpline, SplineParams};
use crate::{Error, Result};

/// Spline network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplineInitializer {
    /// Bins per spline.
    pub nbins: usize,
    /// Splines are defined on `[-border, border]`; identity outside.
    pub border: f64,
    /// Widths of the hidden ReLU layers.
    pub hidden_layers: Vec<usize>,
    /// Lower bound on every bin width and height.
    pub min_bin_gap: f64,
    /// Lower bound on every internal knot slope.
    pub min_slope: f64,
}

impl Default for SplineInitializer {
    fn default() -> Self {
        Self {
            nbins: 128,
            border: 4.0,
            hidden_layers: vec![512, 512],
            min_bin_gap: 1e-3,
            min_slope: 1e-3,
        }
    }
}

impl SplineInitializer {
    pub fn validate(&self) -> Result<()> {
        if self.nbins < 2 {
            return Err(Error::Config(format!(
                "nbins must be >= 2, got {}",
                self.nbins
            )));
        }
        if !self.border.is_finite() || self.border <= 0.0 {
            return Err(Error::Config(format!(
                "border must be positive and finite, got {}",
                self.border
            )));
        }
        if !self.min_bin_gap.is_finite() || self.min_bin_gap < 0.0 {
            return Err(Error::Config("min_bin_gap must be finite and >= 0".into()));
        }
        if !self.min_slope.is_finite() || self.min_slope < 0.0 {
            return Err(Error::Config("min_slope must be finite and >= 0".into()));
        }
        if self.nbins as f64 * self.min_bin_gap >= 2.0 * self.border {
            return Err(Error::Config(format!(
                "{} bins of at least {} do not fit in [-{b}, {b}]",
                self.nbins,
                self.min_bin_gap,
                b = self.border
            )));
        }
        if self.hidden_layers.iter().any(|&w| w == 0) {
            return Err(Error::Config("hidden layer widths must be >= 1".into()));
        }
        Ok(())
    }

    /// Build the network for a masked chunk of `input_dim` values driving `nunits` splines.
    pub fn build<B: Backend>(
        &self,
        input_dim: usize,
        nunits: usize,
        device: &B::Device,
    ) -> Result<SplineConditioner<B>> {
        self.validate()?;
        if input_dim == 0 || nunits == 0 {
            return Err(Error::Config(format!(
                "conditioner needs input_dim >= 1 and nunits >= 1, got {input_dim} and {nunits}"
            )));
        }
        let geometry = SplineGeometry {
            nunits,
            nbins: self.nbins,
            border: self.border,
            min_bin_gap: self.min_bin_gap,
            min_slope: self.min_slope,
        };
        let block = SplineBlock::new(device, input_dim, &self.hidden_layers);
        let hidden = block.output_dim(input_dim);
        Ok(SplineConditioner {
            widths: BinHead::new(device, hidden, geometry),
            heights: BinHead::new(device, hidden, geometry),
            slopes: SlopeHead::new(device, hidden, geometry),
            block,
            input_dim,
            geometry: Ignored(geometry),
        })
    }
}

/// A built spline network: masked chunk in, rational-quadratic spline out.
#[derive(Module, Debug)]
pub struct SplineConditioner<B: Backend> {
    block: SplineBlock<B>,
    widths: BinHead<B>,
    heights: BinHead<B>,
    slopes: SlopeHead<B>,
    input_dim: usize,
    geometry: Ignored<SplineGeometry>,
}

impl<B: Backend> SplineConditioner<B> {
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn nunits(&self) -> usize {
        self.geometry.0.nunits
    }

    pub fn geometry(&self) -> SplineGeometry {
        self.geometry.0
    }

    /// Spline parameters for a batch of masked chunks `[N, input_dim]`.
    pub fn params(&self, x: Tensor<B, 2>) -> Result<SplineParams<B>> {
        check_event_dim(&x, self.input_dim, "spline conditioner")?;
        let h = self.block.forward(x);
        Ok(SplineParams {
            widths: self.widths.forward(h.clone()),
            heights: self.heights.forward(h.clone()),
            slopes: self.slopes.forward(h),
        })
    }

    /// The spline transform conditioned on `x`: `nunits` splines per row.
    pub fn spline(&self, x: Tensor<B, 2>) -> Result<RationalQuadraticSpline<B>> {
        RationalQuadraticSpline::new(self.params(x)?, self.geometry.0.border)
    }
}
