//! Monotonic rational-quadratic spline bijector (Durkan et al., 2019).
//!
//! Each of the `U` coordinates of an `[N, U]` input has its own spline, parameterized by
//! `K` bin widths, `K` bin heights and `K - 1` internal knot slopes. The splines live on
//! `[-border, border]`; the two boundary derivatives are fixed to 1 so the map joins the
//! identity continuously outside that interval.
//!
//! Within bin `k` with knots `(x_k, y_k)`, width `w_k`, height `h_k`, slope `s_k = h_k / w_k`
//! and knot derivatives `d_k, d_{k+1}`, writing `xi = (x - x_k) / w_k`:
//!
//! \[
//! y = y_k + \frac{h_k\,[s_k \xi^2 + d_k \xi(1-\xi)]}{s_k + (d_{k+1} + d_k - 2 s_k)\,\xi(1-\xi)}.
//! \]

use burn_core as burn;

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

use crate::bijector::Bijector;
use crate::interop::host_vec;
use crate::{Error, Result};

/// Batched spline parameters.
///
/// - `widths`, `heights`: `[N, U, K]`
/// - `slopes`: `[N, U, K - 1]`
#[derive(Debug, Clone)]
pub struct SplineParams<B: Backend> {
    pub widths: Tensor<B, 3>,
    pub heights: Tensor<B, 3>,
    pub slopes: Tensor<B, 3>,
}

/// Host-side summary of the spline validity invariants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplineValidity {
    pub min_width: f32,
    pub min_height: f32,
    pub min_slope: f32,
    /// Largest `|sum(widths) - 2 * border|` over all splines.
    pub max_width_sum_error: f32,
    /// Largest `|sum(heights) - 2 * border|` over all splines.
    pub max_height_sum_error: f32,
}

impl SplineValidity {
    /// Floors and sums hold within `tol`, and every statistic is finite.
    pub fn satisfies(&self, min_bin_gap: f32, min_slope: f32, tol: f32) -> bool {
        self.is_finite()
            && self.min_width >= min_bin_gap - tol
            && self.min_height >= min_bin_gap - tol
            && self.min_slope >= min_slope - tol
            && self.max_width_sum_error <= tol
            && self.max_height_sum_error <= tol
    }

    fn is_finite(&self) -> bool {
        [
            self.min_width,
            self.min_height,
            self.min_slope,
            self.max_width_sum_error,
            self.max_height_sum_error,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

impl<B: Backend> SplineParams<B> {
    /// `(N, U, K)`.
    pub fn dims(&self) -> (usize, usize, usize) {
        let [n, u, k] = self.widths.dims();
        (n, u, k)
    }

    fn check(&self) -> Result<()> {
        let (n, u, k) = self.dims();
        if k < 2 {
            return Err(Error::Shape(format!("splines need at least 2 bins, got {k}")));
        }
        if self.heights.dims() != [n, u, k] {
            return Err(Error::Shape(format!(
                "heights {:?} must match widths {:?}",
                self.heights.dims(),
                [n, u, k]
            )));
        }
        if self.slopes.dims() != [n, u, k - 1] {
            return Err(Error::Shape(format!(
                "slopes {:?} must be {:?}",
                self.slopes.dims(),
                [n, u, k - 1]
            )));
        }
        Ok(())
    }

    /// Evaluate the validity invariants on the host.
    pub fn validity(&self, border: f64) -> Result<SplineValidity> {
        self.check()?;
        let (_, _, k) = self.dims();
        let widths = host_vec(self.widths.clone())?;
        let heights = host_vec(self.heights.clone())?;
        let slopes = host_vec(self.slopes.clone())?;
        let target = (2.0 * border) as f32;

        let sum_error = |xs: &[f32]| {
            xs.chunks(k)
                .map(|bins| (bins.iter().sum::<f32>() - target).abs())
                .fold(0.0f32, f32::max)
        };
        // Any non-finite entry poisons the minimum so `satisfies` rejects it.
        let min = |xs: &[f32]| {
            if xs.iter().all(|v| v.is_finite()) {
                xs.iter().copied().fold(f32::INFINITY, f32::min)
            } else {
                f32::NAN
            }
        };

        Ok(SplineValidity {
            min_width: min(&widths),
            min_height: min(&heights),
            min_slope: min(&slopes),
            max_width_sum_error: sum_error(&widths),
            max_height_sum_error: sum_error(&heights),
        })
    }
}

/// A rational-quadratic spline with `range_min = -border`.
#[derive(Debug, Clone)]
pub struct RationalQuadraticSpline<B: Backend> {
    params: SplineParams<B>,
    border: f64,
}

/// Per-element bin quantities, each `[M, 1]`.
struct Bin<B: Backend> {
    x_k: Tensor<B, 2>,
    y_k: Tensor<B, 2>,
    w_k: Tensor<B, 2>,
    h_k: Tensor<B, 2>,
    d_k: Tensor<B, 2>,
    d_k1: Tensor<B, 2>,
}

impl<B: Backend> Bin<B> {
    fn slope(&self) -> Tensor<B, 2> {
        self.h_k.clone() / self.w_k.clone()
    }

    /// `d_k + d_{k+1} - 2 s_k`.
    fn curvature(&self, s: Tensor<B, 2>) -> Tensor<B, 2> {
        self.d_k.clone() + self.d_k1.clone() - s.mul_scalar(2.0)
    }

    /// `log dy/dx` at normalized position `xi`.
    fn log_derivative(&self, xi: Tensor<B, 2>) -> Tensor<B, 2> {
        let s = self.slope();
        let one_minus = xi.clone().neg().add_scalar(1.0);
        let t = xi.clone() * one_minus.clone();
        let denom = s.clone() + self.curvature(s.clone()) * t.clone();
        let numer = s.clone().powf_scalar(2.0)
            * (self.d_k1.clone() * xi.powf_scalar(2.0)
                + s.mul_scalar(2.0) * t
                + self.d_k.clone() * one_minus.powf_scalar(2.0));
        numer.log() - denom.log().mul_scalar(2.0)
    }
}

/// Flattened bins and knots for all `M = N * U` splines.
struct Knots<B: Backend> {
    widths: Tensor<B, 2>,
    heights: Tensor<B, 2>,
    derivatives: Tensor<B, 2>,
    knots_x: Tensor<B, 2>,
    knots_y: Tensor<B, 2>,
}

impl<B: Backend> Knots<B> {
    fn bin(&self, idx: Tensor<B, 2, Int>) -> Bin<B> {
        let next = idx.clone().add_scalar(1);
        Bin {
            x_k: self.knots_x.clone().gather(1, idx.clone()),
            y_k: self.knots_y.clone().gather(1, idx.clone()),
            w_k: self.widths.clone().gather(1, idx.clone()),
            h_k: self.heights.clone().gather(1, idx.clone()),
            d_k: self.derivatives.clone().gather(1, idx),
            d_k1: self.derivatives.clone().gather(1, next),
        }
    }
}

/// Knot positions `[M, K + 1]`: `-border` followed by the running sum of `bins`.
fn cumulative_knots<B: Backend>(bins: Tensor<B, 2>, border: f64) -> Tensor<B, 2> {
    let [_, k] = bins.dims();
    let mut upper = vec![0.0f32; k * (k + 1)];
    for i in 0..k {
        for j in (i + 1)..=k {
            upper[i * (k + 1) + j] = 1.0;
        }
    }
    let upper = Tensor::<B, 2>::from_data(TensorData::new(upper, [k, k + 1]), &bins.device());
    bins.matmul(upper).sub_scalar(border)
}

/// Index of the bin containing `v` (`[M, 1]`), counting interior knots `<= v`.
fn bin_index<B: Backend>(knots: Tensor<B, 2>, v: Tensor<B, 2>) -> Tensor<B, 2, Int> {
    let [_, kp1] = knots.dims();
    let interior = knots.narrow(1, 1, kp1 - 2);
    (interior - v).lower_equal_elem(0.0).int().sum_dim(1)
}

impl<B: Backend> RationalQuadraticSpline<B> {
    pub fn new(params: SplineParams<B>, border: f64) -> Result<Self> {
        if !border.is_finite() || border <= 0.0 {
            return Err(Error::Domain("border must be positive and finite"));
        }
        params.check()?;
        Ok(Self { params, border })
    }

    pub fn range_min(&self) -> f64 {
        -self.border
    }

    pub fn params(&self) -> &SplineParams<B> {
        &self.params
    }

    /// Number of parallel splines `U`.
    pub fn num_units(&self) -> usize {
        self.params.dims().1
    }

    fn knots(&self) -> Knots<B> {
        let (n, u, k) = self.params.dims();
        let m = n * u;
        let widths = self.params.widths.clone().reshape([m, k]);
        let heights = self.params.heights.clone().reshape([m, k]);
        let slopes = self.params.slopes.clone().reshape([m, k - 1]);
        let ones = Tensor::<B, 2>::ones([m, 1], &widths.device());
        let derivatives = Tensor::cat(vec![ones.clone(), slopes, ones], 1);
        Knots {
            knots_x: cumulative_knots(widths.clone(), self.border),
            knots_y: cumulative_knots(heights.clone(), self.border),
            widths,
            heights,
            derivatives,
        }
    }

    fn check_input(&self, x: &Tensor<B, 2>) -> Result<()> {
        let (n, u, _) = self.params.dims();
        if n == 0 || x.dims() != [n, u] {
            return Err(Error::Shape(format!(
                "spline input {:?} does not match parameters for {:?}",
                x.dims(),
                [n, u]
            )));
        }
        Ok(())
    }
}

impl<B: Backend> Bijector<B> for RationalQuadraticSpline<B> {
    fn forward_and_log_det(&self, x: Tensor<B, 2>) -> Result<(Tensor<B, 2>, Tensor<B, 1>)> {
        self.check_input(&x)?;
        let [n, u] = x.dims();
        let m = n * u;
        let knots = self.knots();

        let x = x.reshape([m, 1]);
        let inside = x.clone().abs().lower_elem(self.border);
        let xc = x.clone().clamp(-self.border, self.border);

        let bin = knots.bin(bin_index(knots.knots_x.clone(), xc.clone()));
        let s = bin.slope();
        let xi = ((xc - bin.x_k.clone()) / bin.w_k.clone()).clamp(0.0, 1.0);
        let t = xi.clone() * xi.clone().neg().add_scalar(1.0);
        let numer = bin.h_k.clone() * (s.clone() * xi.clone().powf_scalar(2.0) + bin.d_k.clone() * t.clone());
        let denom = s.clone() + bin.curvature(s) * t;
        let y_in = bin.y_k.clone() + numer / denom;
        let ld_in = bin.log_derivative(xi);

        let y = x.clone().mask_where(inside.clone(), y_in).reshape([n, u]);
        let ld = x
            .zeros_like()
            .mask_where(inside, ld_in)
            .reshape([n, u])
            .sum_dim(1)
            .reshape([n]);
        Ok((y, ld))
    }

    fn inverse_and_log_det(&self, y: Tensor<B, 2>) -> Result<(Tensor<B, 2>, Tensor<B, 1>)> {
        self.check_input(&y)?;
        let [n, u] = y.dims();
        let m = n * u;
        let knots = self.knots();

        let y = y.reshape([m, 1]);
        let inside = y.clone().abs().lower_elem(self.border);
        let yc = y.clone().clamp(-self.border, self.border);

        let bin = knots.bin(bin_index(knots.knots_y.clone(), yc.clone()));
        let s = bin.slope();
        let dy = yc - bin.y_k.clone();
        let curv = bin.curvature(s.clone());
        let a = bin.h_k.clone() * (s.clone() - bin.d_k.clone()) + dy.clone() * curv.clone();
        let b = bin.h_k.clone() * bin.d_k.clone() - dy.clone() * curv;
        let c = s.neg() * dy;
        let disc = (b.clone().powf_scalar(2.0) - a.mul_scalar(4.0) * c.clone()).clamp_min(0.0);
        let xi = (c.mul_scalar(2.0) / (b.neg() - disc.sqrt())).clamp(0.0, 1.0);
        let x_in = xi.clone() * bin.w_k.clone() + bin.x_k.clone();
        let ld_in = bin.log_derivative(xi).neg();

        let x = y.clone().mask_where(inside.clone(), x_in).reshape([n, u]);
        let ld = y
            .zeros_like()
            .mask_where(inside, ld_in)
            .reshape([n, u])
            .sum_dim(1)
            .reshape([n]);
        Ok((x, ld))
    }
}
