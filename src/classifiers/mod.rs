//! Network assemblies built from the layers in [`crate::nn`].
//!
//! Every network implements [`Classifier`]: `scores` runs the evaluation
//! forward pass, `loss_and_grads` runs the training forward pass followed by
//! the backward chain, and `loss` dispatches between the two depending on
//! whether labels were supplied.
//!
//! - [`TwoLayerNet`]: affine - relu - affine - softmax
//! - [`FullyConnectedNet`]: `{affine - [batchnorm] - relu - [dropout]} x (L - 1)` - affine - softmax
//! - [`ThreeLayerConvNet`]: conv - relu - 2x2 max pool - affine - relu - affine - softmax

pub mod cnn;
pub mod fc_net;
pub mod two_layer;

pub use cnn::{ConvNetConfig, ThreeLayerConvNet};
pub use fc_net::{FullyConnectedConfig, FullyConnectedNet};
pub use two_layer::{TwoLayerConfig, TwoLayerNet};

use crate::error::{Error, Result};
use crate::params::{GradientStore, ParameterStore};
use ndarray::{Array2, ArrayD, ArrayView2, Axis, Ix2, IxDyn};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Result of [`Classifier::loss`].
#[derive(Debug, Clone, PartialEq)]
pub enum LossOutput {
    /// No labels were given: class scores of shape (N, C).
    Scores(Array2<f64>),
    /// Labels were given: mean data loss plus L2 penalty, and one gradient
    /// per parameter.
    Training { loss: f64, grads: GradientStore },
}

/// A network that maps a batch to class scores and can differentiate its
/// classification loss with respect to its parameters.
pub trait Classifier {
    fn params(&self) -> &ParameterStore;

    /// Parameters are updated in place by an external optimizer between calls.
    fn params_mut(&mut self) -> &mut ParameterStore;

    fn reg(&self) -> f64;

    /// # Errors
    /// `InvalidConfiguration` when `reg` is negative or not finite.
    fn set_reg(&mut self, reg: f64) -> Result<()>;

    /// Evaluation-mode forward pass. Leaves every running statistic untouched.
    fn scores(&self, x: &ArrayD<f64>) -> Result<Array2<f64>>;

    /// Training-mode forward and backward pass.
    fn loss_and_grads(&mut self, x: &ArrayD<f64>, y: &[usize]) -> Result<(f64, GradientStore)>;

    fn loss(&mut self, x: &ArrayD<f64>, y: Option<&[usize]>) -> Result<LossOutput> {
        match y {
            None => self.scores(x).map(LossOutput::Scores),
            Some(y) => {
                let (loss, grads) = self.loss_and_grads(x, y)?;
                Ok(LossOutput::Training { loss, grads })
            }
        }
    }

    /// Index of the highest score in each row.
    fn predict(&self, x: &ArrayD<f64>) -> Result<Vec<usize>> {
        Ok(argmax_rows(self.scores(x)?.view()))
    }
}

/// First index of the row maximum; NaN rows resolve to 0.
pub(crate) fn argmax_rows(scores: ArrayView2<f64>) -> Vec<usize> {
    scores
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
                .0
        })
        .collect()
}

pub(crate) fn init_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Zero-mean normal samples with standard deviation `scale`.
pub(crate) fn gaussian(shape: &[usize], scale: f64, rng: &mut StdRng) -> ArrayD<f64> {
    ArrayD::<f64>::random_using(IxDyn(shape), StandardNormal, rng) * scale
}

pub(crate) fn validate_reg(reg: f64) -> Result<()> {
    if !reg.is_finite() || reg < 0.0 {
        return Err(Error::config(format!(
            "regularization strength must be finite and non-negative, got {}",
            reg
        )));
    }
    Ok(())
}

pub(crate) fn validate_weight_scale(weight_scale: f64) -> Result<()> {
    if !weight_scale.is_finite() || weight_scale <= 0.0 {
        return Err(Error::config(format!(
            "weight scale must be finite and positive, got {}",
            weight_scale
        )));
    }
    Ok(())
}

pub(crate) fn validate_dim(name: &str, dim: usize) -> Result<()> {
    if dim == 0 {
        return Err(Error::config(format!("{} must be positive", name)));
    }
    Ok(())
}

pub(crate) fn into_scores(layer: &'static str, scores: ArrayD<f64>) -> Result<Array2<f64>> {
    let shape = scores.shape().to_vec();
    scores
        .into_dimensionality::<Ix2>()
        .map_err(|_| Error::shape(layer, "scores of shape (N, C)", shape))
}

/// Adds `0.5 * reg * sum(W^2)` to the data loss and `reg * W` to every
/// weight gradient. Biases and batchnorm parameters are not penalized.
pub(crate) fn apply_l2(
    net: &'static str,
    data_loss: f64,
    params: &ParameterStore,
    grads: &mut GradientStore,
    reg: f64,
) -> f64 {
    let loss = data_loss + 0.5 * reg * params.weight_square_sum();
    for (g, p) in grads.iter_mut().zip(params.iter()) {
        g.weight.scaled_add(reg, &p.weight);
    }
    if loss.is_finite() {
        tracing::debug!(net, data_loss, loss, reg, "computed training loss");
    } else {
        tracing::warn!(net, data_loss, loss, "training loss is not finite");
    }
    loss
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamSet;
    use ndarray::array;

    #[test]
    fn test_argmax_rows_prefers_first_maximum() {
        let s = array![[0.1, 0.7, 0.7], [3.0, -1.0, 2.0], [f64::NAN, f64::NAN, f64::NAN]];
        assert_eq!(argmax_rows(s.view()), vec![1, 0, 0]);
    }

    #[test]
    fn test_seeded_init_is_reproducible() {
        let a = gaussian(&[4, 3], 0.1, &mut init_rng(Some(7)));
        let b = gaussian(&[4, 3], 0.1, &mut init_rng(Some(7)));
        assert_eq!(a, b);
        assert_eq!(a.shape(), &[4, 3]);
    }

    #[test]
    fn test_apply_l2_penalizes_weights_only() {
        let params = ParameterStore::new(vec![ParamSet::new(
            ArrayD::from_elem(vec![2, 2], 2.0),
            ArrayD::from_elem(vec![2], 5.0),
        )]);
        let mut grads = ParameterStore::new(vec![ParamSet::new(
            ArrayD::zeros(vec![2, 2]),
            ArrayD::zeros(vec![2]),
        )]);
        let loss = apply_l2("test", 1.0, &params, &mut grads, 0.5);
        assert_eq!(loss, 1.0 + 0.5 * 0.5 * 16.0);
        assert_eq!(grads[0].weight, ArrayD::from_elem(vec![2, 2], 1.0));
        assert_eq!(grads[0].bias, ArrayD::zeros(vec![2]));
    }

    #[test]
    fn test_validators() {
        assert!(validate_reg(0.0).is_ok());
        assert!(validate_reg(-1e-3).is_err());
        assert!(validate_reg(f64::NAN).is_err());
        assert!(validate_weight_scale(0.0).is_err());
        assert!(validate_weight_scale(f64::INFINITY).is_err());
        assert!(validate_dim("hidden_dim", 0).is_err());
    }
}
