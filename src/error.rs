//! Error type shared by every layer and network in the crate.

use thiserror::Error;

/// Errors raised by layer and network computations.
///
/// All of them are fatal for the call that produced them: no layer performs
/// partial work before returning an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A layer was called with arrays whose dimensions do not fit its contract.
    #[error("{layer}: invalid shape, expected {expected}, got {actual}")]
    InvalidShape {
        layer: &'static str,
        expected: String,
        actual: String,
    },

    /// A constructor or config rejected its hyperparameters.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A loss layer received a label outside `0..num_classes`.
    #[error("label {label} at row {index} is out of range for {num_classes} classes")]
    InvalidLabel {
        index: usize,
        label: usize,
        num_classes: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn shape(
        layer: &'static str,
        expected: impl Into<String>,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Error::InvalidShape {
            layer,
            expected: expected.into(),
            actual: format!("{:?}", actual),
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::InvalidConfiguration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_error_message() {
        let err = Error::shape("affine", "(N, 6)", [2, 5]);
        assert_eq!(
            err.to_string(),
            "affine: invalid shape, expected (N, 6), got [2, 5]"
        );
    }

    #[test]
    fn test_label_error_message() {
        let err = Error::InvalidLabel {
            index: 2,
            label: 9,
            num_classes: 7,
        };
        assert!(err.to_string().contains("out of range for 7 classes"));
    }
}
