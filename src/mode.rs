//! Train/eval switch passed explicitly into mode-sensitive forward calls.

use serde::{Deserialize, Serialize};

/// Whether a forward pass is part of a training step or an evaluation.
///
/// Dropout and batch normalization behave differently in each mode. The mode
/// is never stored on a layer; every call receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

impl Mode {
    pub fn is_train(self) -> bool {
        matches!(self, Mode::Train)
    }
}
