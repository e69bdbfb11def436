//! Fully connected network with an arbitrary number of hidden layers.
//!
//! Each hidden layer is `affine - [batchnorm] - relu - [dropout]` and the
//! last layer is a plain affine producing class scores. Batchnorm and dropout
//! are switched on network-wide at construction.

use super::{apply_l2, gaussian, init_rng, into_scores, validate_dim, validate_reg, validate_weight_scale, Classifier};
use crate::error::{Error, Result};
use crate::losses::softmax_loss;
use crate::mode::Mode;
use crate::nn::affine::{self, AffineCache};
use crate::nn::batchnorm::{BatchNormPass, BatchNormState};
use crate::nn::dropout::{dropout_backward, dropout_forward, DropoutCache, DropoutConfig};
use crate::nn::sandwich::{
    affine_bn_relu_backward, affine_bn_relu_forward, affine_relu_backward, affine_relu_forward, AffineBnReluCache,
    AffineReluCache,
};
use crate::params::{GradientStore, ParamSet, ParameterStore};
use ndarray::{Array2, ArrayD};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

const NET: &str = "fully_connected";

/// Hyperparameters of [`FullyConnectedNet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FullyConnectedConfig {
    /// Width of every hidden layer; must not be empty.
    pub hidden_dims: Vec<usize>,
    pub input_dim: usize,
    pub num_classes: usize,
    /// Dropout probability after every hidden ReLU; `0.0` disables dropout.
    pub dropout: f64,
    pub use_batchnorm: bool,
    pub reg: f64,
    pub weight_scale: f64,
    /// Fixes the dropout masks, for gradient checking.
    pub seed: Option<u64>,
    /// Seed for weight initialization; `None` draws from entropy.
    pub init_seed: Option<u64>,
}

impl Default for FullyConnectedConfig {
    fn default() -> Self {
        Self {
            hidden_dims: vec![100],
            input_dim: 3 * 32 * 32,
            num_classes: 10,
            dropout: 0.0,
            use_batchnorm: false,
            reg: 0.0,
            weight_scale: 1e-2,
            seed: None,
            init_seed: None,
        }
    }
}

impl FullyConnectedConfig {
    pub fn new(hidden_dims: Vec<usize>) -> Self {
        Self {
            hidden_dims,
            ..Self::default()
        }
    }

    pub fn with_input_dim(mut self, input_dim: usize) -> Self {
        self.input_dim = input_dim;
        self
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    pub fn with_dropout(mut self, p: f64) -> Self {
        self.dropout = p;
        self
    }

    pub fn with_batchnorm(mut self, use_batchnorm: bool) -> Self {
        self.use_batchnorm = use_batchnorm;
        self
    }

    pub fn with_reg(mut self, reg: f64) -> Self {
        self.reg = reg;
        self
    }

    pub fn with_weight_scale(mut self, weight_scale: f64) -> Self {
        self.weight_scale = weight_scale;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_init_seed(mut self, seed: u64) -> Self {
        self.init_seed = Some(seed);
        self
    }

    /// Total number of affine layers, hidden plus output.
    pub fn num_layers(&self) -> usize {
        self.hidden_dims.len() + 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.hidden_dims.is_empty() {
            return Err(Error::config("at least one hidden layer is required"));
        }
        for (i, &h) in self.hidden_dims.iter().enumerate() {
            validate_dim(&format!("hidden_dims[{}]", i), h)?;
        }
        validate_dim("input_dim", self.input_dim)?;
        validate_dim("num_classes", self.num_classes)?;
        validate_weight_scale(self.weight_scale)?;
        validate_reg(self.reg)?;
        self.dropout_config().map(|_| ())
    }

    fn dropout_config(&self) -> Result<Option<DropoutConfig>> {
        if self.dropout == 0.0 {
            return Ok(None);
        }
        let config = DropoutConfig::new(self.dropout)?;
        Ok(Some(match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }))
    }
}

/// Running statistics of every hidden batchnorm, borrowed for one pass.
enum NormStates<'a> {
    Train(&'a mut [BatchNormState]),
    Eval(&'a [BatchNormState]),
}

impl NormStates<'_> {
    fn mode(&self) -> Mode {
        match self {
            NormStates::Train(_) => Mode::Train,
            NormStates::Eval(_) => Mode::Eval,
        }
    }

    fn pass(&mut self, layer: usize) -> Result<BatchNormPass<'_>> {
        let pass = match self {
            NormStates::Train(states) => states.get_mut(layer).map(BatchNormPass::Train),
            NormStates::Eval(states) => states.get(layer).map(BatchNormPass::Eval),
        };
        pass.ok_or_else(|| Error::shape("batchnorm", format!("running statistics for layer {}", layer), "missing"))
    }
}

#[derive(Debug)]
enum HiddenLayerCache {
    Plain(AffineReluCache),
    Normalized(AffineBnReluCache),
}

#[derive(Debug)]
struct HiddenCache {
    layer: HiddenLayerCache,
    dropout: Option<DropoutCache>,
}

struct ForwardOutput {
    scores: ArrayD<f64>,
    hidden: Vec<HiddenCache>,
    output: AffineCache,
}

/// A fully connected classifier with `L - 1` hidden layers.
///
/// `params[i]` for `i < L - 1` holds the hidden layer `W` (D_in, H_i) and
/// `b` (H_i,), plus `gamma` (ones) and `beta` (zeros) when batchnorm is on.
/// `params[L - 1]` holds the output affine.
#[derive(Debug, Clone)]
pub struct FullyConnectedNet {
    config: FullyConnectedConfig,
    params: ParameterStore,
    bn_states: Vec<BatchNormState>,
    dropout: Option<DropoutConfig>,
}

impl FullyConnectedNet {
    pub fn new(config: FullyConnectedConfig) -> Result<Self> {
        config.validate()?;
        let dropout = config.dropout_config()?;
        let mut rng = init_rng(config.init_seed);

        let mut dims = Vec::with_capacity(config.num_layers() + 1);
        dims.push(config.input_dim);
        dims.extend_from_slice(&config.hidden_dims);
        dims.push(config.num_classes);

        let hidden_count = config.hidden_dims.len();
        let mut layers = Vec::with_capacity(config.num_layers());
        let mut bn_states = Vec::new();
        for (i, pair) in dims.windows(2).enumerate() {
            let (d_in, d_out) = (pair[0], pair[1]);
            let set = ParamSet::new(
                gaussian(&[d_in, d_out], config.weight_scale, &mut rng),
                ArrayD::zeros(vec![d_out]),
            );
            if config.use_batchnorm && i < hidden_count {
                layers.push(set.with_norm(ArrayD::ones(vec![d_out]), ArrayD::zeros(vec![d_out])));
                bn_states.push(BatchNormState::new(d_out));
            } else {
                layers.push(set);
            }
        }
        let params = ParameterStore::new(layers);

        debug!(
            net = NET,
            layers = params.len(),
            batchnorm = config.use_batchnorm,
            dropout = config.dropout,
            parameters = params.num_parameters(),
            "built network"
        );
        Ok(Self {
            config,
            params,
            bn_states,
            dropout,
        })
    }

    pub fn config(&self) -> &FullyConnectedConfig {
        &self.config
    }

    /// Running statistics of each hidden batchnorm, in layer order. Empty
    /// when batchnorm is off.
    pub fn batchnorm_states(&self) -> &[BatchNormState] {
        &self.bn_states
    }

    pub fn num_layers(&self) -> usize {
        self.params.len()
    }
}

fn forward_chain(
    params: &ParameterStore,
    dropout: Option<&DropoutConfig>,
    mut norms: NormStates<'_>,
    x: &ArrayD<f64>,
) -> Result<ForwardOutput> {
    let mode = norms.mode();
    let last = params
        .len()
        .checked_sub(1)
        .ok_or_else(|| Error::shape(NET, "at least one parameter layer", params.len()))?;
    let mut hidden = Vec::with_capacity(last);
    let mut out = x.clone();

    for (i, layer) in params.iter().take(last).enumerate() {
        let (h, layer_cache) = if layer.gamma.is_some() {
            let (h, c) = affine_bn_relu_forward(
                &out,
                layer.weight2()?,
                layer.bias1()?,
                layer.gamma1()?,
                layer.beta1()?,
                norms.pass(i)?,
            )?;
            (h, HiddenLayerCache::Normalized(c))
        } else {
            let (h, c) = affine_relu_forward(&out, layer.weight2()?, layer.bias1()?)?;
            (h, HiddenLayerCache::Plain(c))
        };
        let (h, dropout_cache) = match dropout {
            Some(config) => {
                let (h, c) = dropout_forward(&h, config, mode);
                (h, Some(c))
            }
            None => (h, None),
        };
        trace!(net = NET, layer = i, shape = ?h.shape(), "hidden layer forward");
        hidden.push(HiddenCache {
            layer: layer_cache,
            dropout: dropout_cache,
        });
        out = h;
    }

    let output_layer = params.require(NET, last)?;
    let (scores, output) = affine::forward(&out, output_layer.weight2()?, output_layer.bias1()?)?;
    Ok(ForwardOutput { scores, hidden, output })
}

impl Classifier for FullyConnectedNet {
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
        let forward = forward_chain(&self.params, self.dropout.as_ref(), NormStates::Eval(&self.bn_states), x)?;
        into_scores(NET, forward.scores)
    }

    fn loss_and_grads(&mut self, x: &ArrayD<f64>, y: &[usize]) -> Result<(f64, GradientStore)> {
        // Running statistics are committed only once the whole pass succeeds.
        let mut bn_states = self.bn_states.clone();
        let ForwardOutput { scores, hidden, output } = forward_chain(
            &self.params,
            self.dropout.as_ref(),
            NormStates::Train(&mut bn_states),
            x,
        )?;
        let (data_loss, dscores) = softmax_loss(&scores, y)?;

        let mut reversed = Vec::with_capacity(self.params.len());
        let (mut dout, dw, db) = affine::backward(&dscores, output)?;
        reversed.push(ParamSet::new(dw.into_dyn(), db.into_dyn()));

        for (i, cache) in hidden.into_iter().enumerate().rev() {
            if let Some(dc) = cache.dropout {
                dout = dropout_backward(&dout, dc)?;
            }
            let (dx, set) = match cache.layer {
                HiddenLayerCache::Plain(c) => {
                    let (dx, dw, db) = affine_relu_backward(&dout, c)?;
                    (dx, ParamSet::new(dw.into_dyn(), db.into_dyn()))
                }
                HiddenLayerCache::Normalized(c) => {
                    let (dx, dw, db, dgamma, dbeta) = affine_bn_relu_backward(&dout, c)?;
                    let set = ParamSet::new(dw.into_dyn(), db.into_dyn()).with_norm(dgamma.into_dyn(), dbeta.into_dyn());
                    (dx, set)
                }
            };
            trace!(net = NET, layer = i, "hidden layer backward");
            reversed.push(set);
            dout = dx;
        }
        reversed.reverse();

        let mut grads = GradientStore::new(reversed);
        let loss = apply_l2(NET, data_loss, &self.params, &mut grads, self.config.reg);
        self.bn_states = bn_states;
        Ok((loss, grads))
    }
}
