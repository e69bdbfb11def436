//! Fixed fusions of primitive layers ("sandwich" layers).
//!
//! Each forward calls its primitives in order and bundles their caches; each
//! backward unpacks the bundle and runs the primitive backward passes in
//! reverse. No extra math happens here.

use crate::error::Result;
use crate::nn::activations::{relu_backward, relu_forward, ReluCache};
use crate::nn::affine::{self, AffineCache};
use crate::nn::batchnorm::{batchnorm_backward_alt, batchnorm_forward, BatchNormCache, BatchNormPass};
use crate::nn::conv::{conv_backward_naive, conv_forward_naive, ConvCache, ConvParam};
use crate::nn::pooling::{max_pool_backward_naive, max_pool_forward_naive, PoolCache, PoolParam};
use ndarray::{Array1, Array2, Array4, ArrayD, ArrayView1, ArrayView2, ArrayView4};

/// affine -> relu
#[derive(Debug, Clone)]
pub struct AffineReluCache {
    affine: AffineCache,
    relu: ReluCache,
}

pub fn affine_relu_forward(
    x: &ArrayD<f64>,
    w: ArrayView2<f64>,
    b: ArrayView1<f64>,
) -> Result<(ArrayD<f64>, AffineReluCache)> {
    let (a, affine) = affine::forward(x, w, b)?;
    let (out, relu) = relu_forward(&a);
    Ok((out, AffineReluCache { affine, relu }))
}

/// Returns `(dx, dw, db)`.
pub fn affine_relu_backward(
    dout: &ArrayD<f64>,
    cache: AffineReluCache,
) -> Result<(ArrayD<f64>, Array2<f64>, Array1<f64>)> {
    let da = relu_backward(dout, cache.relu)?;
    affine::backward(&da, cache.affine)
}

/// affine -> batchnorm -> relu
#[derive(Debug, Clone)]
pub struct AffineBnReluCache {
    affine: AffineCache,
    bn: BatchNormCache,
    relu: ReluCache,
}

pub fn affine_bn_relu_forward(
    x: &ArrayD<f64>,
    w: ArrayView2<f64>,
    b: ArrayView1<f64>,
    gamma: ArrayView1<f64>,
    beta: ArrayView1<f64>,
    pass: BatchNormPass<'_>,
) -> Result<(ArrayD<f64>, AffineBnReluCache)> {
    let (a, affine) = affine::forward(x, w, b)?;
    let (normed, bn) = batchnorm_forward(&a, gamma, beta, pass)?;
    let (out, relu) = relu_forward(&normed);
    Ok((out, AffineBnReluCache { affine, bn, relu }))
}

/// Gradients of [`affine_bn_relu_forward`]: `(dx, dw, db, dgamma, dbeta)`.
pub type AffineBnReluGrads = (ArrayD<f64>, Array2<f64>, Array1<f64>, Array1<f64>, Array1<f64>);

pub fn affine_bn_relu_backward(dout: &ArrayD<f64>, cache: AffineBnReluCache) -> Result<AffineBnReluGrads> {
    let dnormed = relu_backward(dout, cache.relu)?;
    let (da, dgamma, dbeta) = batchnorm_backward_alt(&dnormed, cache.bn)?;
    let (dx, dw, db) = affine::backward(&da, cache.affine)?;
    Ok((dx, dw, db, dgamma, dbeta))
}

/// conv -> relu
#[derive(Debug, Clone)]
pub struct ConvReluCache {
    conv: ConvCache,
    relu: ReluCache,
}

pub fn conv_relu_forward(
    x: &ArrayD<f64>,
    w: ArrayView4<f64>,
    b: ArrayView1<f64>,
    param: ConvParam,
) -> Result<(ArrayD<f64>, ConvReluCache)> {
    let (a, conv) = conv_forward_naive(x, w, b, param)?;
    let (out, relu) = relu_forward(&a);
    Ok((out, ConvReluCache { conv, relu }))
}

pub fn conv_relu_backward(
    dout: &ArrayD<f64>,
    cache: ConvReluCache,
) -> Result<(ArrayD<f64>, Array4<f64>, Array1<f64>)> {
    let da = relu_backward(dout, cache.relu)?;
    conv_backward_naive(&da, cache.conv)
}

/// conv -> relu -> max pool
#[derive(Debug, Clone)]
pub struct ConvReluPoolCache {
    conv: ConvCache,
    relu: ReluCache,
    pool: PoolCache,
}

pub fn conv_relu_pool_forward(
    x: &ArrayD<f64>,
    w: ArrayView4<f64>,
    b: ArrayView1<f64>,
    conv_param: ConvParam,
    pool_param: PoolParam,
) -> Result<(ArrayD<f64>, ConvReluPoolCache)> {
    let (a, conv) = conv_forward_naive(x, w, b, conv_param)?;
    let (s, relu) = relu_forward(&a);
    let (out, pool) = max_pool_forward_naive(&s, pool_param)?;
    Ok((out, ConvReluPoolCache { conv, relu, pool }))
}

pub fn conv_relu_pool_backward(
    dout: &ArrayD<f64>,
    cache: ConvReluPoolCache,
) -> Result<(ArrayD<f64>, Array4<f64>, Array1<f64>)> {
    let ds = max_pool_backward_naive(dout, cache.pool)?;
    let da = relu_backward(&ds, cache.relu)?;
    conv_backward_naive(&da, cache.conv)
}
