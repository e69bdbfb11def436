//! Two-layer fully connected network with a ReLU hidden layer.

use super::{apply_l2, gaussian, init_rng, into_scores, validate_dim, validate_reg, validate_weight_scale, Classifier};
use crate::error::Result;
use crate::losses::softmax_loss;
use crate::nn::affine;
use crate::nn::sandwich::{affine_relu_backward, affine_relu_forward};
use crate::params::{GradientStore, ParamSet, ParameterStore};
use ndarray::{Array2, ArrayD};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

const NET: &str = "two_layer";

/// Hyperparameters of [`TwoLayerNet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoLayerConfig {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub num_classes: usize,
    /// Standard deviation of the Gaussian weight initialization.
    pub weight_scale: f64,
    /// L2 regularization strength.
    pub reg: f64,
    /// Seed for weight initialization; `None` draws from entropy.
    pub init_seed: Option<u64>,
}

impl Default for TwoLayerConfig {
    fn default() -> Self {
        Self {
            input_dim: 3 * 32 * 32,
            hidden_dim: 100,
            num_classes: 10,
            weight_scale: 1e-3,
            reg: 0.0,
            init_seed: None,
        }
    }
}

impl TwoLayerConfig {
    pub fn with_input_dim(mut self, input_dim: usize) -> Self {
        self.input_dim = input_dim;
        self
    }

    pub fn with_hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = hidden_dim;
        self
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    pub fn with_weight_scale(mut self, weight_scale: f64) -> Self {
        self.weight_scale = weight_scale;
        self
    }

    pub fn with_reg(mut self, reg: f64) -> Self {
        self.reg = reg;
        self
    }

    pub fn with_init_seed(mut self, seed: u64) -> Self {
        self.init_seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_dim("input_dim", self.input_dim)?;
        validate_dim("hidden_dim", self.hidden_dim)?;
        validate_dim("num_classes", self.num_classes)?;
        validate_weight_scale(self.weight_scale)?;
        validate_reg(self.reg)
    }
}

/// `affine - relu - affine - softmax`.
///
/// Layer 0 holds `W1` of shape (D, H) and `b1` of shape (H,), layer 1 holds
/// `W2` of shape (H, C) and `b2` of shape (C,). Weights start as
/// `N(0, weight_scale^2)` samples and biases start at zero.
#[derive(Debug, Clone)]
pub struct TwoLayerNet {
    config: TwoLayerConfig,
    params: ParameterStore,
}

impl TwoLayerNet {
    pub fn new(config: TwoLayerConfig) -> Result<Self> {
        config.validate()?;
        let (d, h, c) = (config.input_dim, config.hidden_dim, config.num_classes);
        let mut rng = init_rng(config.init_seed);
        let params = ParameterStore::new(vec![
            ParamSet::new(gaussian(&[d, h], config.weight_scale, &mut rng), ArrayD::zeros(vec![h])),
            ParamSet::new(gaussian(&[h, c], config.weight_scale, &mut rng), ArrayD::zeros(vec![c])),
        ]);
        debug!(
            net = NET,
            input_dim = d,
            hidden_dim = h,
            num_classes = c,
            parameters = params.num_parameters(),
            "built network"
        );
        Ok(Self { config, params })
    }

    pub fn config(&self) -> &TwoLayerConfig {
        &self.config
    }
}

impl Classifier for TwoLayerNet {
    fn params(&self) -> &ParameterStore {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParameterStore {
        &mut self.params
    }

    fn reg(&self) -> f64 {
        self.config.reg
    }

    fn set_reg(&mut self, reg: f64) -> Result<()> {
        validate_reg(reg)?;
        self.config.reg = reg;
        Ok(())
    }

    fn scores(&self, x: &ArrayD<f64>) -> Result<Array2<f64>> {
        let (l1, l2) = (self.params.require(NET, 0)?, self.params.require(NET, 1)?);
        let (hidden, _) = affine_relu_forward(x, l1.weight2()?, l1.bias1()?)?;
        let (scores, _) = affine::forward(&hidden, l2.weight2()?, l2.bias1()?)?;
        into_scores(NET, scores)
    }

    fn loss_and_grads(&mut self, x: &ArrayD<f64>, y: &[usize]) -> Result<(f64, GradientStore)> {
        let (l1, l2) = (self.params.require(NET, 0)?, self.params.require(NET, 1)?);
        let (hidden, hidden_cache) = affine_relu_forward(x, l1.weight2()?, l1.bias1()?)?;
        let (scores, out_cache) = affine::forward(&hidden, l2.weight2()?, l2.bias1()?)?;

        let (data_loss, dscores) = softmax_loss(&scores, y)?;
        trace!(net = NET, batch = y.len(), data_loss, "forward done");

        let (dhidden, dw2, db2) = affine::backward(&dscores, out_cache)?;
        let (_, dw1, db1) = affine_relu_backward(&dhidden, hidden_cache)?;

        let mut grads = GradientStore::new(vec![
            ParamSet::new(dw1.into_dyn(), db1.into_dyn()),
            ParamSet::new(dw2.into_dyn(), db2.into_dyn()),
        ]);
        let loss = apply_l2(NET, data_loss, &self.params, &mut grads, self.config.reg);
        Ok((loss, grads))
    }
}
