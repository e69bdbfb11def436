//! Metrics for evaluating classifiers across batches.
//!
//! ```rust,ignore
//! use rustynn::metrics::{Accuracy, Metric};
//!
//! let mut accuracy = Accuracy::new();
//! accuracy.update(&scores, &labels);
//! println!("accuracy: {:.4}", accuracy.compute());
//! accuracy.reset();
//! ```

pub mod classification;

pub use classification::Accuracy;

/// A metric accumulated over any number of batches.
pub trait Metric: Send + Sync {
    type Prediction: ?Sized;
    type Target: ?Sized;
    type Output;

    /// Folds one batch into the running state.
    fn update(&mut self, predictions: &Self::Prediction, targets: &Self::Target);

    fn compute(&self) -> Self::Output;

    fn reset(&mut self);

    fn name(&self) -> &str;
}
