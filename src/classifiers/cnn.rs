//! Three-layer convolutional network.

use super::{apply_l2, gaussian, init_rng, into_scores, validate_dim, validate_reg, validate_weight_scale, Classifier};
use crate::error::{Error, Result};
use crate::losses::softmax_loss;
use crate::nn::affine;
use crate::nn::conv::ConvParam;
use crate::nn::pooling::PoolParam;
use crate::nn::sandwich::{
    affine_relu_backward, affine_relu_forward, conv_relu_pool_backward, conv_relu_pool_forward,
};
use crate::params::{GradientStore, ParamSet, ParameterStore};
use ndarray::{Array2, ArrayD};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

const NET: &str = "three_layer_convnet";

/// Hyperparameters of [`ThreeLayerConvNet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvNetConfig {
    /// `(C, H, W)` of a single input sample.
    pub input_dim: (usize, usize, usize),
    pub num_filters: usize,
    /// Side of the square filters; must be odd.
    pub filter_size: usize,
    pub hidden_dim: usize,
    pub num_classes: usize,
    pub weight_scale: f64,
    pub reg: f64,
    pub init_seed: Option<u64>,
}

impl Default for ConvNetConfig {
    fn default() -> Self {
        Self {
            input_dim: (3, 32, 32),
            num_filters: 32,
            filter_size: 7,
            hidden_dim: 100,
            num_classes: 10,
            weight_scale: 1e-3,
            reg: 0.0,
            init_seed: None,
        }
    }
}

impl ConvNetConfig {
    pub fn with_input_dim(mut self, channels: usize, height: usize, width: usize) -> Self {
        self.input_dim = (channels, height, width);
        self
    }

    pub fn with_num_filters(mut self, num_filters: usize) -> Self {
        self.num_filters = num_filters;
        self
    }

    pub fn with_filter_size(mut self, filter_size: usize) -> Self {
        self.filter_size = filter_size;
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
        let (c, h, w) = self.input_dim;
        validate_dim("input channels", c)?;
        validate_dim("input height", h)?;
        validate_dim("input width", w)?;
        validate_dim("num_filters", self.num_filters)?;
        validate_dim("hidden_dim", self.hidden_dim)?;
        validate_dim("num_classes", self.num_classes)?;
        if self.filter_size % 2 == 0 {
            return Err(Error::config(format!(
                "filter_size must be odd to preserve the spatial size, got {}",
                self.filter_size
            )));
        }
        if h % 2 != 0 || w % 2 != 0 {
            return Err(Error::config(format!(
                "input height and width must be even for 2x2 pooling, got {}x{}",
                h, w
            )));
        }
        validate_weight_scale(self.weight_scale)?;
        validate_reg(self.reg)
    }

    fn conv_param(&self) -> ConvParam {
        ConvParam::same(self.filter_size)
    }

    /// Length of the flattened pooled feature map fed to the hidden affine.
    fn pooled_len(&self) -> usize {
        let (_, h, w) = self.input_dim;
        self.num_filters * (h / 2) * (w / 2)
    }
}

/// `conv - relu - 2x2 max pool - affine - relu - affine - softmax`.
///
/// Convolutions use stride 1 and "same" padding, so only the pooling halves
/// the spatial size. Inputs have shape (N, C, H, W).
#[derive(Debug, Clone)]
pub struct ThreeLayerConvNet {
    config: ConvNetConfig,
    params: ParameterStore,
}

impl ThreeLayerConvNet {
    pub fn new(config: ConvNetConfig) -> Result<Self> {
        config.validate()?;
        let (c, _, _) = config.input_dim;
        let (f, fs, h, k) = (config.num_filters, config.filter_size, config.hidden_dim, config.num_classes);
        let scale = config.weight_scale;
        let mut rng = init_rng(config.init_seed);
        let params = ParameterStore::new(vec![
            ParamSet::new(gaussian(&[f, c, fs, fs], scale, &mut rng), ArrayD::zeros(vec![f])),
            ParamSet::new(gaussian(&[config.pooled_len(), h], scale, &mut rng), ArrayD::zeros(vec![h])),
            ParamSet::new(gaussian(&[h, k], scale, &mut rng), ArrayD::zeros(vec![k])),
        ]);
        debug!(
            net = NET,
            input_dim = ?config.input_dim,
            num_filters = f,
            filter_size = fs,
            parameters = params.num_parameters(),
            "built network"
        );
        Ok(Self { config, params })
    }

    pub fn config(&self) -> &ConvNetConfig {
        &self.config
    }

    fn layers(&self) -> Result<(&ParamSet, &ParamSet, &ParamSet)> {
        Ok((
            self.params.require(NET, 0)?,
            self.params.require(NET, 1)?,
            self.params.require(NET, 2)?,
        ))
    }
}

impl Classifier for ThreeLayerConvNet {
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
        let (conv, hidden_layer, out_layer) = self.layers()?;
        let (pooled, _) = conv_relu_pool_forward(
            x,
            conv.weight4()?,
            conv.bias1()?,
            self.config.conv_param(),
            PoolParam::square(2),
        )?;
        let (hidden, _) = affine_relu_forward(&pooled, hidden_layer.weight2()?, hidden_layer.bias1()?)?;
        let (scores, _) = affine::forward(&hidden, out_layer.weight2()?, out_layer.bias1()?)?;
        into_scores(NET, scores)
    }

    fn loss_and_grads(&mut self, x: &ArrayD<f64>, y: &[usize]) -> Result<(f64, GradientStore)> {
        let (conv, hidden_layer, out_layer) = self.layers()?;
        let (pooled, conv_cache) = conv_relu_pool_forward(
            x,
            conv.weight4()?,
            conv.bias1()?,
            self.config.conv_param(),
            PoolParam::square(2),
        )?;
        trace!(net = NET, shape = ?pooled.shape(), "conv block forward");
        let (hidden, hidden_cache) = affine_relu_forward(&pooled, hidden_layer.weight2()?, hidden_layer.bias1()?)?;
        let (scores, out_cache) = affine::forward(&hidden, out_layer.weight2()?, out_layer.bias1()?)?;

        let (data_loss, dscores) = softmax_loss(&scores, y)?;

        let (dhidden, dw3, db3) = affine::backward(&dscores, out_cache)?;
        let (dpooled, dw2, db2) = affine_relu_backward(&dhidden, hidden_cache)?;
        let (_, dw1, db1) = conv_relu_pool_backward(&dpooled, conv_cache)?;

        let mut grads = GradientStore::new(vec![
            ParamSet::new(dw1.into_dyn(), db1.into_dyn()),
            ParamSet::new(dw2.into_dyn(), db2.into_dyn()),
            ParamSet::new(dw3.into_dyn(), db3.into_dyn()),
        ]);
        let loss = apply_l2(NET, data_loss, &self.params, &mut grads, self.config.reg);
        Ok((loss, grads))
    }
}
