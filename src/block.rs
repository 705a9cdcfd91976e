//! The spline network: a ReLU feed-forward block and the three parameter heads.
//!
//! The heads turn hidden features into spline parameters that are valid by construction:
//!
//! - widths/heights: `softmax(z) * (2*border - K*min_bin_gap) + min_bin_gap`, so every bin is
//!   at least `min_bin_gap` wide and the bins sum to `2*border`;
//! - slopes: `softplus(z) + min_slope`, with softplus evaluated in its overflow-free form.

use burn_core as burn;

use burn::module::{Ignored, Module};
use burn::tensor::{activation, backend::Backend, Tensor};
use burn_nn::{Linear, LinearConfig};
use serde::{Deserialize, Serialize};

/// Sizing and floors shared by the parameter heads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplineGeometry {
    /// Number of parallel splines (one per transformed coordinate).
    pub nunits: usize,
    /// Bins per spline.
    pub nbins: usize,
    /// Splines live on `[-border, border]`.
    pub border: f64,
    pub min_bin_gap: f64,
    pub min_slope: f64,
}

/// Fully-connected ReLU stack mapping a masked chunk to hidden features.
#[derive(Module, Debug)]
pub struct SplineBlock<B: Backend> {
    layers: Vec<Linear<B>>,
}

impl<B: Backend> SplineBlock<B> {
    /// `hidden_layers` gives the output width of each layer; an empty list makes the block
    /// the identity.
    pub fn new(device: &B::Device, input_dim: usize, hidden_layers: &[usize]) -> Self {
        let mut layers = Vec::with_capacity(hidden_layers.len());
        let mut d_in = input_dim;
        for &d_out in hidden_layers {
            layers.push(LinearConfig::new(d_in, d_out).init(device));
            d_in = d_out;
        }
        Self { layers }
    }

    /// Input width expected by the first layer.
    pub fn input_dim(&self) -> Option<usize> {
        self.layers.first().map(|l| l.weight.val().dims()[0])
    }

    /// Width of the hidden features produced.
    pub fn output_dim(&self, input_dim: usize) -> usize {
        self.layers
            .last()
            .map(|l| l.weight.val().dims()[1])
            .unwrap_or(input_dim)
    }

    /// `[N, d_in] -> [N, d_hidden]`.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.layers
            .iter()
            .fold(x, |h, layer| activation::relu(layer.forward(h)))
    }

    /// Single chunk `[d_in] -> [d_hidden]`: a batch of one is inserted and removed.
    pub fn forward_unbatched(&self, x: Tensor<B, 1>) -> Tensor<B, 1> {
        let [d] = x.dims();
        let h = self.forward(x.reshape([1, d]));
        let [_, d_out] = h.dims();
        h.reshape([d_out])
    }
}

/// Bin widths or heights: `[N, hidden] -> [N, nunits, nbins]`.
#[derive(Module, Debug)]
pub struct BinHead<B: Backend> {
    linear: Linear<B>,
    geometry: Ignored<SplineGeometry>,
}

impl<B: Backend> BinHead<B> {
    pub fn new(device: &B::Device, hidden: usize, geometry: SplineGeometry) -> Self {
        let linear = LinearConfig::new(hidden, geometry.nunits * geometry.nbins).init(device);
        Self {
            linear,
            geometry: Ignored(geometry),
        }
    }

    pub fn forward(&self, h: Tensor<B, 2>) -> Tensor<B, 3> {
        let g = self.geometry.0;
        let [n, _] = h.dims();
        let z = self.linear.forward(h).reshape([n, g.nunits, g.nbins]);
        let span = 2.0 * g.border - g.nbins as f64 * g.min_bin_gap;
        activation::softmax(z, 2)
            .mul_scalar(span)
            .add_scalar(g.min_bin_gap)
    }
}

/// Internal knot slopes: `[N, hidden] -> [N, nunits, nbins - 1]`.
#[derive(Module, Debug)]
pub struct SlopeHead<B: Backend> {
    linear: Linear<B>,
    geometry: Ignored<SplineGeometry>,
}

impl<B: Backend> SlopeHead<B> {
    pub fn new(device: &B::Device, hidden: usize, geometry: SplineGeometry) -> Self {
        let linear =
            LinearConfig::new(hidden, geometry.nunits * (geometry.nbins - 1)).init(device);
        Self {
            linear,
            geometry: Ignored(geometry),
        }
    }

    pub fn forward(&self, h: Tensor<B, 2>) -> Tensor<B, 3> {
        let g = self.geometry.0;
        let [n, _] = h.dims();
        let z = self.linear.forward(h).reshape([n, g.nunits, g.nbins - 1]);
        softplus(z).add_scalar(g.min_slope)
    }
}

/// `log(1 + e^z)` as `relu(z) + log1p(e^{-|z|})`: finite for every finite `z`.
fn softplus<B: Backend, const D: usize>(z: Tensor<B, D>) -> Tensor<B, D> {
    activation::relu(z.clone()) + z.abs().neg().exp().log1p()
}
