//! Inverted dropout.
//!
//! In [`Mode::Train`] every activation is zeroed independently with
//! probability `p` and survivors are scaled by `1 / (1 - p)`, so the expected
//! activation is unchanged and evaluation needs no rescaling. In
//! [`Mode::Eval`] the layer is the identity in both directions.

use crate::error::{Error, Result};
use crate::mode::Mode;
use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const LAYER: &str = "dropout";

/// Dropout hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DropoutConfig {
    /// Probability of zeroing an activation, in `[0, 1)`.
    pub p: f64,
    /// When set, every training-mode call draws the same mask for a given shape.
    pub seed: Option<u64>,
}

impl DropoutConfig {
    /// Creates a dropout config.
    ///
    /// # Errors
    /// `InvalidConfiguration` when `p` is not finite or not in `[0, 1)`.
    pub fn new(p: f64) -> Result<Self> {
        if !p.is_finite() || !(0.0..1.0).contains(&p) {
            return Err(Error::config(format!(
                "dropout probability must be in [0, 1), got {}",
                p
            )));
        }
        Ok(Self { p, seed: None })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// Mask drawn during a training-mode forward pass, already scaled.
#[derive(Debug, Clone)]
pub struct DropoutCache {
    mask: Option<ArrayD<f64>>,
}

impl DropoutCache {
    pub fn mask(&self) -> Option<&ArrayD<f64>> {
        self.mask.as_ref()
    }
}

pub fn dropout_forward(
    x: &ArrayD<f64>,
    config: &DropoutConfig,
    mode: Mode,
) -> (ArrayD<f64>, DropoutCache) {
    if !mode.is_train() || config.p == 0.0 {
        return (x.clone(), DropoutCache { mask: None });
    }

    let keep = 1.0 - config.p;
    let mut rng = config.rng();
    let mask = ArrayD::from_shape_fn(x.raw_dim(), |_| {
        if rng.gen::<f64>() >= config.p {
            1.0 / keep
        } else {
            0.0
        }
    });
    let out = x * &mask;
    (out, DropoutCache { mask: Some(mask) })
}

/// Replays the cached mask; identity when the forward pass did not mask.
pub fn dropout_backward(dout: &ArrayD<f64>, cache: DropoutCache) -> Result<ArrayD<f64>> {
    match cache.mask {
        None => Ok(dout.clone()),
        Some(mask) if mask.shape() == dout.shape() => Ok(dout * &mask),
        Some(mask) => Err(Error::shape(
            LAYER,
            format!("an upstream gradient of shape {:?}", mask.shape()),
            dout.shape(),
        )),
    }
}
