//! Batch normalization over the feature axis of an (N, D) input, plus the
//! spatial variant over the channel axis of (N, C, H, W).
//!
//! Training mode normalizes with the batch mean and biased variance and folds
//! them into the running statistics:
//! `running = momentum * running + (1 - momentum) * batch`.
//! Evaluation mode normalizes with the running statistics and leaves them
//! untouched.

use crate::error::{Error, Result};
use crate::mode::Mode;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, Axis, Ix2, Ix4};

/// Small constant added to the variance for numerical stability.
pub const DEFAULT_EPS: f64 = 1e-5;

/// Momentum for updating running statistics.
pub const DEFAULT_MOMENTUM: f64 = 0.9;

const LAYER: &str = "batchnorm";
const SPATIAL_LAYER: &str = "spatial_batchnorm";

/// Persistent per-layer statistics owned by a network.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormState {
    pub running_mean: Array1<f64>,
    pub running_var: Array1<f64>,
    pub momentum: f64,
    pub eps: f64,
}

impl BatchNormState {
    /// Zero-initialized running statistics for `dim` features.
    pub fn new(dim: usize) -> Self {
        Self {
            running_mean: Array1::zeros(dim),
            running_var: Array1::zeros(dim),
            momentum: DEFAULT_MOMENTUM,
            eps: DEFAULT_EPS,
        }
    }

    /// # Errors
    /// `InvalidConfiguration` unless `momentum` lies in `[0, 1]`.
    pub fn with_momentum(mut self, momentum: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&momentum) {
            return Err(Error::config(format!("batchnorm momentum must be in [0, 1], got {}", momentum)));
        }
        self.momentum = momentum;
        Ok(self)
    }

    /// # Errors
    /// `InvalidConfiguration` unless `eps` is finite and positive.
    pub fn with_eps(mut self, eps: f64) -> Result<Self> {
        if !eps.is_finite() || eps <= 0.0 {
            return Err(Error::config(format!("batchnorm eps must be finite and positive, got {}", eps)));
        }
        self.eps = eps;
        Ok(self)
    }

    pub fn dim(&self) -> usize {
        self.running_mean.len()
    }
}

/// How a forward call may touch the running statistics.
///
/// Training borrows them mutably to fold in the batch statistics; evaluation
/// only reads them.
#[derive(Debug)]
pub enum BatchNormPass<'a> {
    Train(&'a mut BatchNormState),
    Eval(&'a BatchNormState),
}

impl BatchNormPass<'_> {
    pub fn mode(&self) -> Mode {
        match self {
            BatchNormPass::Train(_) => Mode::Train,
            BatchNormPass::Eval(_) => Mode::Eval,
        }
    }

    fn state(&self) -> &BatchNormState {
        match self {
            BatchNormPass::Train(state) => state,
            BatchNormPass::Eval(state) => state,
        }
    }
}

/// Intermediates captured by [`batchnorm_forward`].
#[derive(Debug, Clone)]
pub enum BatchNormCache {
    Train {
        x: Array2<f64>,
        mean: Array1<f64>,
        var: Array1<f64>,
        x_hat: Array2<f64>,
        gamma: Array1<f64>,
        eps: f64,
    },
    Eval {
        x_hat: Array2<f64>,
        gamma: Array1<f64>,
        inv_std: Array1<f64>,
    },
}

fn as_matrix<'a>(layer: &'static str, x: &'a ArrayD<f64>, d: usize) -> Result<ndarray::ArrayView2<'a, f64>> {
    x.view()
        .into_dimensionality::<Ix2>()
        .ok()
        .filter(|v| v.ncols() == d && v.nrows() > 0)
        .ok_or_else(|| Error::shape(layer, format!("(N >= 1, {})", d), x.shape()))
}

pub fn batchnorm_forward(
    x: &ArrayD<f64>,
    gamma: ArrayView1<f64>,
    beta: ArrayView1<f64>,
    pass: BatchNormPass<'_>,
) -> Result<(ArrayD<f64>, BatchNormCache)> {
    let d = gamma.len();
    if beta.len() != d {
        return Err(Error::shape(LAYER, format!("beta of length {}", d), beta.shape()));
    }
    if pass.state().dim() != d {
        return Err(Error::shape(
            LAYER,
            format!("running statistics of length {}", d),
            pass.state().dim(),
        ));
    }
    let x = as_matrix(LAYER, x, d)?;

    match pass {
        BatchNormPass::Train(state) => {
            let mean = x
                .mean_axis(Axis(0))
                .ok_or_else(|| Error::shape(LAYER, "a non-empty batch", x.shape()))?;
            let var = x.var_axis(Axis(0), 0.0);
            let std = var.mapv(|v| (v + state.eps).sqrt());
            let x_hat = (&x - &mean) / &std;
            let out = &x_hat * &gamma + &beta;

            let m = state.momentum;
            state.running_mean = &state.running_mean * m + &mean * (1.0 - m);
            state.running_var = &state.running_var * m + &var * (1.0 - m);

            let cache = BatchNormCache::Train {
                x: x.to_owned(),
                mean,
                var,
                x_hat,
                gamma: gamma.to_owned(),
                eps: state.eps,
            };
            Ok((out.into_dyn(), cache))
        }
        BatchNormPass::Eval(state) => {
            let inv_std = state.running_var.mapv(|v| 1.0 / (v + state.eps).sqrt());
            let x_hat = (&x - &state.running_mean) * &inv_std;
            let out = &x_hat * &gamma + &beta;
            let cache = BatchNormCache::Eval {
                x_hat,
                gamma: gamma.to_owned(),
                inv_std,
            };
            Ok((out.into_dyn(), cache))
        }
    }
}

fn upstream<'a>(dout: &'a ArrayD<f64>, x_hat: &Array2<f64>) -> Result<ndarray::ArrayView2<'a, f64>> {
    dout.view()
        .into_dimensionality::<Ix2>()
        .ok()
        .filter(|v| v.dim() == x_hat.dim())
        .ok_or_else(|| {
            Error::shape(
                LAYER,
                format!("an upstream gradient of shape {:?}", x_hat.shape()),
                dout.shape(),
            )
        })
}

fn eval_backward(
    dout: ndarray::ArrayView2<f64>,
    x_hat: &Array2<f64>,
    gamma: &Array1<f64>,
    inv_std: &Array1<f64>,
) -> (ArrayD<f64>, Array1<f64>, Array1<f64>) {
    let dbeta = dout.sum_axis(Axis(0));
    let dgamma = (&dout * x_hat).sum_axis(Axis(0));
    let dx = &dout * &(gamma * inv_std);
    (dx.into_dyn(), dgamma, dbeta)
}

/// Step-by-step differentiation of the normalization graph.
///
/// Returns `(dx, dgamma, dbeta)`.
pub fn batchnorm_backward(
    dout: &ArrayD<f64>,
    cache: BatchNormCache,
) -> Result<(ArrayD<f64>, Array1<f64>, Array1<f64>)> {
    match cache {
        BatchNormCache::Eval { x_hat, gamma, inv_std } => {
            let dout = upstream(dout, &x_hat)?;
            Ok(eval_backward(dout, &x_hat, &gamma, &inv_std))
        }
        BatchNormCache::Train { x, mean, var, x_hat, gamma, eps } => {
            let dout = upstream(dout, &x_hat)?;
            let n = x.nrows() as f64;

            let dbeta = dout.sum_axis(Axis(0));
            let dgamma = (&dout * &x_hat).sum_axis(Axis(0));

            let x_mu = &x - &mean;
            let sqrt_var = var.mapv(|v| (v + eps).sqrt());
            let inv_var = sqrt_var.mapv(|s| 1.0 / s);

            let dx_hat = &dout * &gamma;
            let d_inv_var = (&dx_hat * &x_mu).sum_axis(Axis(0));
            let dx_mu1 = &dx_hat * &inv_var;
            let d_sqrt_var = -&d_inv_var / &sqrt_var.mapv(|s| s * s);
            let d_var = 0.5 * &d_sqrt_var / &sqrt_var;
            let dx_mu2 = &x_mu * &(2.0 * &d_var / n);
            let dx1 = dx_mu1 + dx_mu2;
            let d_mu = -dx1.sum_axis(Axis(0));
            let dx = dx1 + &(d_mu / n);

            Ok((dx.into_dyn(), dgamma, dbeta))
        }
    }
}

/// Fused closed-form gradient of batch normalization.
///
/// Agrees with [`batchnorm_backward`] up to floating-point error.
pub fn batchnorm_backward_alt(
    dout: &ArrayD<f64>,
    cache: BatchNormCache,
) -> Result<(ArrayD<f64>, Array1<f64>, Array1<f64>)> {
    match cache {
        BatchNormCache::Eval { x_hat, gamma, inv_std } => {
            let dout = upstream(dout, &x_hat)?;
            Ok(eval_backward(dout, &x_hat, &gamma, &inv_std))
        }
        BatchNormCache::Train { var, x_hat, gamma, eps, .. } => {
            let dout = upstream(dout, &x_hat)?;
            let n = x_hat.nrows() as f64;

            let dbeta = dout.sum_axis(Axis(0));
            let dgamma = (&dout * &x_hat).sum_axis(Axis(0));

            let inv_std = var.mapv(|v| 1.0 / (v + eps).sqrt());
            let dx_hat = &dout * &gamma;
            let sum_dx_hat = dx_hat.sum_axis(Axis(0));
            let sum_dx_hat_x_hat = (&dx_hat * &x_hat).sum_axis(Axis(0));
            let dx = (dx_hat * n - &sum_dx_hat - &x_hat * &sum_dx_hat_x_hat) * &(inv_std / n);

            Ok((dx.into_dyn(), dgamma, dbeta))
        }
    }
}

/// Cache for [`spatial_batchnorm_forward`]: the inner (N*H*W, C) cache plus
/// the original layout.
#[derive(Debug, Clone)]
pub struct SpatialBatchNormCache {
    inner: BatchNormCache,
    dims: (usize, usize, usize, usize),
}

/// Moves channels last and collapses everything else into rows.
fn channels_to_rows(layer: &'static str, x: &ArrayD<f64>) -> Result<(Array2<f64>, (usize, usize, usize, usize))> {
    let x4 = x
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| Error::shape(layer, "(N, C, H, W)", x.shape()))?;
    let dims = x4.dim();
    let (n, c, h, w) = dims;
    let rows = x4
        .permuted_axes([0, 2, 3, 1])
        .to_shape((n * h * w, c))
        .map_err(|_| Error::shape(layer, "(N, C, H, W)", x.shape()))?
        .into_owned();
    Ok((rows, dims))
}

fn rows_to_channels(
    layer: &'static str,
    rows: &ArrayD<f64>,
    dims: (usize, usize, usize, usize),
) -> Result<ArrayD<f64>> {
    let (n, c, h, w) = dims;
    let nhwc = rows
        .to_shape((n, h, w, c))
        .map_err(|_| Error::shape(layer, format!("({}, {})", n * h * w, c), rows.shape()))?;
    Ok(nhwc
        .permuted_axes([0, 3, 1, 2])
        .as_standard_layout()
        .into_owned()
        .into_dyn())
}

/// Batch normalization per channel of an (N, C, H, W) input.
pub fn spatial_batchnorm_forward(
    x: &ArrayD<f64>,
    gamma: ArrayView1<f64>,
    beta: ArrayView1<f64>,
    pass: BatchNormPass<'_>,
) -> Result<(ArrayD<f64>, SpatialBatchNormCache)> {
    let (rows, dims) = channels_to_rows(SPATIAL_LAYER, x)?;
    let (out, inner) = batchnorm_forward(&rows.into_dyn(), gamma, beta, pass)?;
    let out = rows_to_channels(SPATIAL_LAYER, &out, dims)?;
    Ok((out, SpatialBatchNormCache { inner, dims }))
}

/// Backward pass of [`spatial_batchnorm_forward`], using the fused formula.
pub fn spatial_batchnorm_backward(
    dout: &ArrayD<f64>,
    cache: SpatialBatchNormCache,
) -> Result<(ArrayD<f64>, Array1<f64>, Array1<f64>)> {
    let (rows, dims) = channels_to_rows(SPATIAL_LAYER, dout)?;
    if dims != cache.dims {
        return Err(Error::shape(
            SPATIAL_LAYER,
            format!("an upstream gradient of shape {:?}", cache.dims),
            dout.shape(),
        ));
    }
    let (dx, dgamma, dbeta) = batchnorm_backward_alt(&rows.into_dyn(), cache.inner)?;
    let dx = rows_to_channels(SPATIAL_LAYER, &dx, dims)?;
    Ok((dx, dgamma, dbeta))
}
