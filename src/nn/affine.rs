//! Fully connected (affine) layer: `out = flatten(x) · W + b`.

use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, CowArray, Ix2};

const LAYER: &str = "affine";

/// Values captured by [`forward`] for the matching [`backward`] call.
#[derive(Debug, Clone)]
pub struct AffineCache {
    /// Input exactly as received, with its original shape.
    x: ArrayD<f64>,
    /// Weight matrix of shape (D, M).
    w: Array2<f64>,
}

/// Collapses every non-batch dimension so `x` becomes (N, D).
pub(crate) fn flatten(x: &ArrayD<f64>) -> Result<CowArray<'_, f64, Ix2>> {
    let n = match x.shape().first() {
        Some(&n) => n,
        None => return Err(Error::shape(LAYER, "an input with a batch dimension", x.shape())),
    };
    let d: usize = x.shape()[1..].iter().product();
    x.to_shape((n, d))
        .map_err(|_| Error::shape(LAYER, format!("an input reshapeable to ({}, {})", n, d), x.shape()))
}

/// Computes the affine forward pass.
///
/// `x` has shape (N, d_1, ..., d_k) and is flattened to (N, D) with
/// `D = d_1 * ... * d_k`; `w` is (D, M) and `b` is (M,). The output is (N, M).
pub fn forward(
    x: &ArrayD<f64>,
    w: ArrayView2<f64>,
    b: ArrayView1<f64>,
) -> Result<(ArrayD<f64>, AffineCache)> {
    let x2 = flatten(x)?;
    let (d, m) = w.dim();
    if x2.ncols() != d {
        return Err(Error::shape(
            LAYER,
            format!("an input with {} features per sample", d),
            x.shape(),
        ));
    }
    if b.len() != m {
        return Err(Error::shape(LAYER, format!("a bias of length {}", m), b.shape()));
    }

    let out = x2.dot(&w) + &b;
    let cache = AffineCache {
        x: x.clone(),
        w: w.to_owned(),
    };
    Ok((out.into_dyn(), cache))
}

/// Computes the affine backward pass.
///
/// Returns `(dx, dw, db)` where `dx` has the original input shape.
pub fn backward(
    dout: &ArrayD<f64>,
    cache: AffineCache,
) -> Result<(ArrayD<f64>, Array2<f64>, Array1<f64>)> {
    let AffineCache { x, w } = cache;
    let n = x.shape()[0];
    let m = w.ncols();
    let dout = dout
        .view()
        .into_dimensionality::<Ix2>()
        .ok()
        .filter(|d| d.dim() == (n, m))
        .ok_or_else(|| Error::shape(LAYER, format!("an upstream gradient of shape ({}, {})", n, m), dout.shape()))?;

    let x2 = flatten(&x)?;
    let dw = x2.t().dot(&dout);
    let db = dout.sum_axis(Axis(0));
    let dx2 = dout.dot(&w.t());
    let dx = dx2
        .to_shape(x.shape())
        .map_err(|_| Error::shape(LAYER, "a gradient reshapeable to the input", dx2.shape()))?
        .into_owned();

    Ok((dx, dw, db))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};

    #[test]
    fn test_forward_flattens_trailing_dims() {
        // Two samples of shape (4, 5, 6) projected to 3 outputs.
        let x = Array::linspace(-0.1, 0.5, 2 * 120)
            .into_shape_with_order(vec![2, 4, 5, 6])
            .unwrap();
        let w = Array::linspace(-0.2, 0.3, 120 * 3)
            .into_shape_with_order((120, 3))
            .unwrap();
        let b = Array::linspace(-0.3, 0.1, 3);

        let (out, _) = forward(&x, w.view(), b.view()).unwrap();
        let expected = array![
            [1.49834967, 1.70660132, 1.91485297],
            [3.25553199, 3.5141327, 3.77273342]
        ];
        assert_eq!(out.shape(), &[2, 3]);
        assert_abs_diff_eq!(out, expected.into_dyn(), epsilon = 1e-7);
    }

    #[test]
    fn test_backward_restores_input_shape() {
        let x = ArrayD::from_elem(vec![3, 2, 2], 0.5);
        let w = Array2::from_elem((4, 5), 0.1);
        let b = Array1::zeros(5);
        let (_, cache) = forward(&x, w.view(), b.view()).unwrap();

        let dout = ArrayD::from_elem(vec![3, 5], 1.0);
        let (dx, dw, db) = backward(&dout, cache).unwrap();
        assert_eq!(dx.shape(), &[3, 2, 2]);
        assert_eq!(dw.dim(), (4, 5));
        assert_eq!(db, Array1::from_elem(5, 3.0));
    }

    #[test]
    fn test_forward_rejects_feature_mismatch() {
        let x = ArrayD::zeros(vec![2, 5]);
        let w = Array2::zeros((6, 3));
        let b = Array1::zeros(3);
        let err = forward(&x, w.view(), b.view()).unwrap_err();
        assert!(matches!(err, Error::InvalidShape { layer: "affine", .. }));
    }

    #[test]
    fn test_forward_rejects_bias_mismatch() {
        let x = ArrayD::zeros(vec![2, 6]);
        let w = Array2::zeros((6, 3));
        let b = Array1::zeros(4);
        assert!(forward(&x, w.view(), b.view()).is_err());
    }

    #[test]
    fn test_backward_rejects_wrong_upstream_shape() {
        let x = ArrayD::zeros(vec![2, 6]);
        let w = Array2::zeros((6, 3));
        let b = Array1::zeros(3);
        let (_, cache) = forward(&x, w.view(), b.view()).unwrap();
        let dout = ArrayD::zeros(vec![2, 4]);
        assert!(backward(&dout, cache).is_err());
    }
}
