//! Naive 2D max pooling over (N, C, H, W) inputs.

use crate::error::{Error, Result};
use crate::nn::conv::as_nchw;
use ndarray::{s, Array4, ArrayD, ArrayView2};
use serde::{Deserialize, Serialize};

const LAYER: &str = "max_pool";

/// Pooling window and stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolParam {
    pub pool_height: usize,
    pub pool_width: usize,
    pub stride: usize,
}

impl Default for PoolParam {
    fn default() -> Self {
        Self::square(2)
    }
}

impl PoolParam {
    pub fn new(pool_height: usize, pool_width: usize, stride: usize) -> Self {
        Self {
            pool_height,
            pool_width,
            stride,
        }
    }

    /// Square window whose stride equals its size.
    pub fn square(size: usize) -> Self {
        Self::new(size, size, size)
    }

    fn output_len(&self, input: usize, window: usize) -> Option<usize> {
        if self.stride == 0 || window == 0 || input < window || (input - window) % self.stride != 0 {
            return None;
        }
        Some(1 + (input - window) / self.stride)
    }
}

/// Position of the maximum within each window, as a flat `row * W + col`
/// index into the input plane.
#[derive(Debug, Clone)]
pub struct PoolCache {
    argmax: Array4<usize>,
    input_dim: (usize, usize, usize, usize),
}

/// First maximum in row-major order. A NaN wins over any number so it
/// propagates to the output.
fn window_argmax(window: ArrayView2<f64>) -> (usize, usize, f64) {
    let mut best = (0, 0, f64::NEG_INFINITY);
    let mut first = true;
    for ((r, c), &v) in window.indexed_iter() {
        if first || v > best.2 || (v.is_nan() && !best.2.is_nan()) {
            best = (r, c, v);
            first = false;
        }
    }
    best
}

pub fn max_pool_forward_naive(x: &ArrayD<f64>, param: PoolParam) -> Result<(ArrayD<f64>, PoolCache)> {
    let x = as_nchw(LAYER, x)?;
    let (n, c, h, w) = x.dim();
    let (ph, pw, st) = (param.pool_height, param.pool_width, param.stride);
    let (h_out, w_out) = match (param.output_len(h, ph), param.output_len(w, pw)) {
        (Some(ho), Some(wo)) => (ho, wo),
        _ => {
            return Err(Error::shape(
                LAYER,
                format!("spatial dims tiled exactly by {}x{} windows at stride {}", ph, pw, st),
                x.shape(),
            ))
        }
    };

    let mut out = Array4::<f64>::zeros((n, c, h_out, w_out));
    let mut argmax = Array4::<usize>::zeros((n, c, h_out, w_out));
    for ni in 0..n {
        for ci in 0..c {
            for i in 0..h_out {
                for j in 0..w_out {
                    let (r0, c0) = (i * st, j * st);
                    let window = x.slice(s![ni, ci, r0..r0 + ph, c0..c0 + pw]);
                    let (r, col, v) = window_argmax(window);
                    out[[ni, ci, i, j]] = v;
                    argmax[[ni, ci, i, j]] = (r0 + r) * w + (c0 + col);
                }
            }
        }
    }

    Ok((
        out.into_dyn(),
        PoolCache {
            argmax,
            input_dim: (n, c, h, w),
        },
    ))
}

/// Routes each output gradient to the single input that held the window
/// maximum. Overlapping windows accumulate.
pub fn max_pool_backward_naive(dout: &ArrayD<f64>, cache: PoolCache) -> Result<ArrayD<f64>> {
    let dout = as_nchw(LAYER, dout)?;
    if dout.dim() != cache.argmax.dim() {
        return Err(Error::shape(
            LAYER,
            format!("an upstream gradient of shape {:?}", cache.argmax.shape()),
            dout.shape(),
        ));
    }

    let (_, _, _, w) = cache.input_dim;
    let mut dx = Array4::<f64>::zeros(cache.input_dim);
    for ((ni, ci, i, j), &flat) in cache.argmax.indexed_iter() {
        dx[[ni, ci, flat / w, flat % w]] += dout[[ni, ci, i, j]];
    }
    Ok(dx.into_dyn())
}
