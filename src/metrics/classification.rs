//! Classification metrics.

use super::Metric;
use crate::classifiers::argmax_rows;
use ndarray::Array2;

/// Fraction of rows whose highest score sits at the true label index.
///
/// Rows beyond the shorter of `scores` and `labels` are ignored.
#[derive(Debug, Clone, Default)]
pub struct Accuracy {
    correct: usize,
    total: usize,
}

impl Accuracy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Same as [`Metric::update`] for already computed predictions.
    pub fn update_predictions(&mut self, predicted: &[usize], labels: &[usize]) {
        for (p, y) in predicted.iter().zip(labels) {
            if p == y {
                self.correct += 1;
            }
            self.total += 1;
        }
    }
}

impl Metric for Accuracy {
    type Prediction = Array2<f64>;
    type Target = [usize];
    type Output = f64;

    fn update(&mut self, predictions: &Array2<f64>, targets: &[usize]) {
        let predicted = argmax_rows(predictions.view());
        self.update_predictions(&predicted, targets);
    }

    fn compute(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }

    fn name(&self) -> &str {
        "Accuracy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_accuracy_over_batches() {
        let mut acc = Accuracy::new();
        assert_eq!(acc.compute(), 0.0);

        acc.update(&array![[0.1, 0.9], [0.8, 0.2]], &[1, 1]);
        assert_eq!(acc.compute(), 0.5);

        acc.update(&array![[2.0, 1.0, 0.0], [0.0, 0.0, 3.0]], &[0, 2]);
        assert_eq!(acc.total(), 4);
        assert_eq!(acc.compute(), 0.75);

        acc.reset();
        assert_eq!(acc.total(), 0);
    }

    #[test]
    fn test_update_predictions() {
        let mut acc = Accuracy::new();
        acc.update_predictions(&[0, 1, 2], &[0, 1, 1]);
        assert!((acc.compute() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(acc.name(), "Accuracy");
    }
}
