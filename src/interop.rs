//! `ndarray` <-> `burn` conversions.
//!
//! Datasets are usually assembled host-side as `ndarray` arrays; models consume `burn`
//! tensors. These helpers copy in both directions without assuming standard layout.

use burn_core as burn;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::{Error, Result};

/// `[N, D]` array to an `[N, D]` tensor.
pub fn array2_to_tensor<B: Backend>(device: &B::Device, x: &ArrayView2<f32>) -> Tensor<B, 2> {
    let (n, d) = x.dim();
    let values: Vec<f32> = x.iter().copied().collect();
    Tensor::from_data(TensorData::new(values, [n, d]), device)
}

/// `[N]` array to an `[N, 1]` column tensor (the label layout).
pub fn array1_to_column<B: Backend>(device: &B::Device, x: &ArrayView1<f32>) -> Tensor<B, 2> {
    let n = x.len();
    let values: Vec<f32> = x.iter().copied().collect();
    Tensor::from_data(TensorData::new(values, [n, 1]), device)
}

/// Copy any tensor to a flat host vector in row-major order.
pub fn host_vec<const D: usize, B: Backend>(t: Tensor<B, D>) -> Result<Vec<f32>> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Data(format!("{e:?}")))
}

pub fn tensor_to_array2<B: Backend>(t: Tensor<B, 2>) -> Result<Array2<f32>> {
    let [n, d] = t.dims();
    Array2::from_shape_vec((n, d), host_vec(t)?).map_err(|e| Error::Data(e.to_string()))
}

pub fn tensor_to_array1<B: Backend>(t: Tensor<B, 1>) -> Result<Array1<f32>> {
    Ok(Array1::from_vec(host_vec(t)?))
}
