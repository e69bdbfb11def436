//! Rectified linear unit.

use crate::error::{Error, Result};
use ndarray::{ArrayD, Zip};

const LAYER: &str = "relu";

/// Input saved by [`relu_forward`]; its sign pattern is the backward mask.
#[derive(Debug, Clone)]
pub struct ReluCache {
    x: ArrayD<f64>,
}

/// `max(0, x)` elementwise. NaN inputs pass through unchanged.
pub fn relu_forward(x: &ArrayD<f64>) -> (ArrayD<f64>, ReluCache) {
    let out = x.mapv(|v| if v < 0.0 { 0.0 } else { v });
    (out, ReluCache { x: x.clone() })
}

/// Routes `dout` through positions where the input was strictly positive.
pub fn relu_backward(dout: &ArrayD<f64>, cache: ReluCache) -> Result<ArrayD<f64>> {
    if dout.shape() != cache.x.shape() {
        return Err(Error::shape(
            LAYER,
            format!("an upstream gradient of shape {:?}", cache.x.shape()),
            dout.shape(),
        ));
    }
    let dx = Zip::from(dout)
        .and(&cache.x)
        .map_collect(|&g, &v| if v > 0.0 { g } else { 0.0 });
    Ok(dx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};

    #[test]
    fn test_relu_forward() {
        let x = Array::linspace(-0.5, 0.5, 12)
            .into_shape_with_order((3, 4))
            .unwrap()
            .into_dyn();
        let (out, _) = relu_forward(&x);
        let expected = array![
            [0., 0., 0., 0.],
            [0., 0., 0.04545455, 0.13636364],
            [0.22727273, 0.31818182, 0.40909091, 0.5]
        ];
        assert_abs_diff_eq!(out, expected.into_dyn(), epsilon = 1e-8);
    }

    #[test]
    fn test_zero_input_gets_zero_gradient() {
        let x = array![-1.0, 0.0, 2.0].into_dyn();
        let (_, cache) = relu_forward(&x);
        let dx = relu_backward(&array![5.0, 5.0, 5.0].into_dyn(), cache).unwrap();
        assert_eq!(dx, array![0.0, 0.0, 5.0].into_dyn());
    }

    #[test]
    fn test_nan_propagates() {
        let x = array![f64::NAN, -1.0].into_dyn();
        let (out, _) = relu_forward(&x);
        assert!(out[0].is_nan());
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn test_backward_shape_mismatch() {
        let (_, cache) = relu_forward(&ArrayD::zeros(vec![2, 3]));
        assert!(relu_backward(&ArrayD::zeros(vec![3, 2]), cache).is_err());
    }
}
