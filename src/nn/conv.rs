//! Naive 2D convolution (cross-correlation) with zero padding and stride.
//!
//! Input is (N, C, H, W), filters are (F, C, HH, WW), bias is (F,). The
//! output is (N, F, H', W') with
//! `H' = 1 + (H + 2 * pad - HH) / stride` and likewise for `W'`.

use crate::error::{Error, Result};
use ndarray::{s, Array1, Array4, ArrayD, ArrayView1, ArrayView4, Ix4};
use serde::{Deserialize, Serialize};

const LAYER: &str = "conv";

/// Stride and zero padding, shared by both spatial axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvParam {
    pub stride: usize,
    pub pad: usize,
}

impl Default for ConvParam {
    fn default() -> Self {
        Self { stride: 1, pad: 0 }
    }
}

impl ConvParam {
    pub fn new(stride: usize, pad: usize) -> Self {
        Self { stride, pad }
    }

    /// Stride 1 with the padding that keeps H and W for an odd `filter_size`.
    pub fn same(filter_size: usize) -> Self {
        Self {
            stride: 1,
            pad: filter_size.saturating_sub(1) / 2,
        }
    }

    /// Output extent along one axis, or `None` when the windows do not tile.
    fn output_len(&self, input: usize, kernel: usize) -> Option<usize> {
        let padded = input + 2 * self.pad;
        if self.stride == 0 || kernel == 0 || padded < kernel || (padded - kernel) % self.stride != 0 {
            return None;
        }
        Some(1 + (padded - kernel) / self.stride)
    }
}

/// Zero-padded input and hyperparameters captured by [`conv_forward_naive`].
#[derive(Debug, Clone)]
pub struct ConvCache {
    x_padded: Array4<f64>,
    w: Array4<f64>,
    param: ConvParam,
    in_hw: (usize, usize),
}

pub(crate) fn as_nchw<'a>(layer: &'static str, x: &'a ArrayD<f64>) -> Result<ArrayView4<'a, f64>> {
    x.view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| Error::shape(layer, "(N, C, H, W)", x.shape()))
}

pub fn conv_forward_naive(
    x: &ArrayD<f64>,
    w: ArrayView4<f64>,
    b: ArrayView1<f64>,
    param: ConvParam,
) -> Result<(ArrayD<f64>, ConvCache)> {
    let x = as_nchw(LAYER, x)?;
    let (n, c, h, width) = x.dim();
    let (f, wc, hh, ww) = w.dim();
    if wc != c {
        return Err(Error::shape(LAYER, format!("filters with {} input channels", c), w.shape()));
    }
    if b.len() != f {
        return Err(Error::shape(LAYER, format!("a bias of length {}", f), b.shape()));
    }
    let (h_out, w_out) = match (param.output_len(h, hh), param.output_len(width, ww)) {
        (Some(ho), Some(wo)) => (ho, wo),
        _ => {
            return Err(Error::shape(
                LAYER,
                format!(
                    "spatial dims tiled exactly by {}x{} filters at stride {} pad {}",
                    hh, ww, param.stride, param.pad
                ),
                x.shape(),
            ))
        }
    };

    let p = param.pad;
    let st = param.stride;
    let mut x_padded = Array4::<f64>::zeros((n, c, h + 2 * p, width + 2 * p));
    x_padded.slice_mut(s![.., .., p..p + h, p..p + width]).assign(&x);

    let mut out = Array4::<f64>::zeros((n, f, h_out, w_out));
    for ni in 0..n {
        for fi in 0..f {
            let filter = w.slice(s![fi, .., .., ..]);
            for i in 0..h_out {
                for j in 0..w_out {
                    let window = x_padded.slice(s![ni, .., i * st..i * st + hh, j * st..j * st + ww]);
                    out[[ni, fi, i, j]] = (&window * &filter).sum() + b[fi];
                }
            }
        }
    }

    let cache = ConvCache {
        x_padded,
        w: w.to_owned(),
        param,
        in_hw: (h, width),
    };
    Ok((out.into_dyn(), cache))
}

/// Returns `(dx, dw, db)`.
///
/// Every output position scatters its gradient into the input and filter
/// positions it read from; overlapping windows accumulate.
pub fn conv_backward_naive(
    dout: &ArrayD<f64>,
    cache: ConvCache,
) -> Result<(ArrayD<f64>, Array4<f64>, Array1<f64>)> {
    let ConvCache { x_padded, w, param, in_hw } = cache;
    let dout = as_nchw(LAYER, dout)?;
    let (n, _, _, _) = x_padded.dim();
    let (f, _, hh, ww) = w.dim();
    let (h_out, w_out) = (
        param.output_len(in_hw.0, hh).unwrap_or(0),
        param.output_len(in_hw.1, ww).unwrap_or(0),
    );
    if dout.dim() != (n, f, h_out, w_out) {
        return Err(Error::shape(
            LAYER,
            format!("an upstream gradient of shape [{}, {}, {}, {}]", n, f, h_out, w_out),
            dout.shape(),
        ));
    }

    let st = param.stride;
    let mut dx_padded = Array4::<f64>::zeros(x_padded.raw_dim());
    let mut dw = Array4::<f64>::zeros(w.raw_dim());
    let mut db = Array1::<f64>::zeros(f);

    for ni in 0..n {
        for fi in 0..f {
            for i in 0..h_out {
                for j in 0..w_out {
                    let g = dout[[ni, fi, i, j]];
                    db[fi] += g;
                    let rows = i * st..i * st + hh;
                    let cols = j * st..j * st + ww;
                    let window = x_padded.slice(s![ni, .., rows.clone(), cols.clone()]);
                    dw.slice_mut(s![fi, .., .., ..]).scaled_add(g, &window);
                    dx_padded
                        .slice_mut(s![ni, .., rows, cols])
                        .scaled_add(g, &w.slice(s![fi, .., .., ..]));
                }
            }
        }
    }

    let (h, width) = in_hw;
    let p = param.pad;
    let dx = dx_padded.slice(s![.., .., p..p + h, p..p + width]).to_owned();
    Ok((dx.into_dyn(), dw, db))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};

    #[test]
    fn test_conv_forward_reference_values() {
        let x = Array::linspace(-0.1, 0.5, 2 * 3 * 4 * 4)
            .into_shape_with_order(vec![2, 3, 4, 4])
            .unwrap();
        let w = Array::linspace(-0.2, 0.3, 3 * 3 * 4 * 4)
            .into_shape_with_order((3, 3, 4, 4))
            .unwrap();
        let b = Array::linspace(-0.1, 0.2, 3);

        let (out, _) = conv_forward_naive(&x, w.view(), b.view(), ConvParam::new(2, 1)).unwrap();
        let expected = array![
            [
                [[-0.08759809, -0.10987781], [-0.18387192, -0.2109216]],
                [[0.21027089, 0.21661097], [0.22847626, 0.23004637]],
                [[0.50813986, 0.54309974], [0.64082444, 0.67101435]]
            ],
            [
                [[-0.98053589, -1.03143541], [-1.19128892, -1.24695841]],
                [[0.69108355, 0.66880383], [0.59480972, 0.56776003]],
                [[2.36270298, 2.36904306], [2.38090835, 2.38247847]]
            ]
        ];
        assert_abs_diff_eq!(out, expected.into_dyn(), epsilon = 1e-7);
    }

    #[test]
    fn test_same_padding_preserves_size() {
        let x = ArrayD::from_elem(vec![1, 2, 5, 5], 1.0);
        let w = Array4::from_elem((4, 2, 3, 3), 1.0);
        let b = Array1::zeros(4);
        let (out, _) = conv_forward_naive(&x, w.view(), b.view(), ConvParam::same(3)).unwrap();
        assert_eq!(out.shape(), &[1, 4, 5, 5]);
        // Centre sees the full 2x3x3 window, corners only 2x2x2.
        assert_eq!(out[[0, 0, 2, 2]], 18.0);
        assert_eq!(out[[0, 0, 0, 0]], 8.0);
    }

    #[test]
    fn test_overlapping_windows_accumulate() {
        // Stride 1 with a 2x2 kernel: the centre input of a 3x3 map is read by
        // all four output positions.
        let x = ArrayD::from_elem(vec![1, 1, 3, 3], 1.0);
        let w = Array4::from_elem((1, 1, 2, 2), 1.0);
        let b = Array1::zeros(1);
        let (_, cache) = conv_forward_naive(&x, w.view(), b.view(), ConvParam::default()).unwrap();
        let dout = ArrayD::from_elem(vec![1, 1, 2, 2], 1.0);
        let (dx, dw, db) = conv_backward_naive(&dout, cache).unwrap();
        assert_eq!(dx[[0, 0, 1, 1]], 4.0);
        assert_eq!(dx[[0, 0, 0, 0]], 1.0);
        assert_eq!(dx[[0, 0, 0, 1]], 2.0);
        assert_eq!(dw, Array4::from_elem((1, 1, 2, 2), 4.0));
        assert_eq!(db[0], 4.0);
    }

    #[test]
    fn test_rejects_untileable_stride() {
        let x = ArrayD::zeros(vec![1, 1, 5, 5]);
        let w = Array4::zeros((1, 1, 2, 2));
        let b = Array1::zeros(1);
        let err = conv_forward_naive(&x, w.view(), b.view(), ConvParam::new(2, 0)).unwrap_err();
        assert!(matches!(err, Error::InvalidShape { layer: "conv", .. }));
    }

    #[test]
    fn test_rejects_channel_mismatch() {
        let x = ArrayD::zeros(vec![1, 3, 4, 4]);
        let w = Array4::zeros((2, 2, 3, 3));
        let b = Array1::zeros(2);
        assert!(conv_forward_naive(&x, w.view(), b.view(), ConvParam::same(3)).is_err());
    }
}
