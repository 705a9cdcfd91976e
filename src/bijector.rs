//! The bijector capability interface and chain composition.
//!
//! Every transform in this crate (a single spline, a coupling layer, a whole flow) is an
//! invertible map on `[N, D]` event tensors with a tractable log-determinant. Implementors
//! provide the two fused passes; the plain accessors are derived from them.
//!
//! Log-determinants are always reduced over the event axis, so they have shape `[N]`.

use burn_core as burn;

use burn::tensor::{backend::Backend, Tensor};

use crate::{Error, Result};

/// An invertible, differentiable transform on batched vectors.
pub trait Bijector<B: Backend> {
    /// `y = f(x)` together with `log |det df/dx|` per row.
    fn forward_and_log_det(&self, x: Tensor<B, 2>) -> Result<(Tensor<B, 2>, Tensor<B, 1>)>;

    /// `x = f^{-1}(y)` together with `log |det df^{-1}/dy|` per row.
    fn inverse_and_log_det(&self, y: Tensor<B, 2>) -> Result<(Tensor<B, 2>, Tensor<B, 1>)>;

    fn forward(&self, x: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        Ok(self.forward_and_log_det(x)?.0)
    }

    fn inverse(&self, y: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        Ok(self.inverse_and_log_det(y)?.0)
    }

    fn forward_log_det_jacobian(&self, x: Tensor<B, 2>) -> Result<Tensor<B, 1>> {
        Ok(self.forward_and_log_det(x)?.1)
    }

    fn inverse_log_det_jacobian(&self, y: Tensor<B, 2>) -> Result<Tensor<B, 1>> {
        Ok(self.inverse_and_log_det(y)?.1)
    }

    /// Forward map of a single vector `[D]` (a batch of one is inserted and removed).
    fn forward_unbatched(&self, x: Tensor<B, 1>) -> Result<Tensor<B, 1>> {
        let [d] = x.dims();
        let y = self.forward(x.reshape([1, d]))?;
        let [_, d_out] = y.dims();
        Ok(y.reshape([d_out]))
    }

    /// Inverse map of a single vector `[D]`.
    fn inverse_unbatched(&self, y: Tensor<B, 1>) -> Result<Tensor<B, 1>> {
        let [d] = y.dims();
        let x = self.inverse(y.reshape([1, d]))?;
        let [_, d_out] = x.dims();
        Ok(x.reshape([d_out]))
    }
}

/// Chain composition: forward applies the bijectors in order, inverse applies each inverse
/// in reverse order. Log-determinants are summed along the evaluated path.
impl<B: Backend, T: Bijector<B>> Bijector<B> for [T] {
    fn forward_and_log_det(&self, x: Tensor<B, 2>) -> Result<(Tensor<B, 2>, Tensor<B, 1>)> {
        let [n, _] = x.dims();
        let mut log_det = Tensor::<B, 1>::zeros([n], &x.device());
        let mut y = x;
        for bijector in self.iter() {
            let (next, ld) = bijector.forward_and_log_det(y)?;
            y = next;
            log_det = log_det + ld;
        }
        Ok((y, log_det))
    }

    fn inverse_and_log_det(&self, y: Tensor<B, 2>) -> Result<(Tensor<B, 2>, Tensor<B, 1>)> {
        let [n, _] = y.dims();
        let mut log_det = Tensor::<B, 1>::zeros([n], &y.device());
        let mut x = y;
        for bijector in self.iter().rev() {
            let (prev, ld) = bijector.inverse_and_log_det(x)?;
            x = prev;
            log_det = log_det + ld;
        }
        Ok((x, log_det))
    }
}

/// Fails unless `x` is `[_, expected]`.
pub(crate) fn check_event_dim<B: Backend>(
    x: &Tensor<B, 2>,
    expected: usize,
    what: &str,
) -> Result<()> {
    let [n, d] = x.dims();
    if n == 0 {
        return Err(Error::Shape(format!("{what}: empty batch")));
    }
    if d != expected {
        return Err(Error::Shape(format!(
            "{what}: expected event dimension {expected}, got {d}"
        )));
    }
    Ok(())
}
