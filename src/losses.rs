//! Terminal classification losses.
//!
//! Both take an (N, C) score matrix and one integer label per row, and return
//! the mean loss over the batch together with the gradient of that loss with
//! respect to the scores.
//!
//! - **Softmax cross-entropy**: [`softmax_loss`]
//! - **Multiclass SVM (hinge, margin 1)**: [`svm_loss`]

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayD, ArrayView2, Axis, Ix2};

/// Validates scores against labels and returns the (N, C) view.
fn scores_and_labels<'a>(
    layer: &'static str,
    scores: &'a ArrayD<f64>,
    y: &[usize],
) -> Result<ArrayView2<'a, f64>> {
    let x = scores
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| Error::shape(layer, "scores of shape (N, C)", scores.shape()))?;
    let (n, c) = x.dim();
    if n == 0 || c == 0 {
        return Err(Error::shape(layer, "at least one sample and one class", x.shape()));
    }
    if y.len() != n {
        return Err(Error::shape(layer, format!("{} labels", n), y.len()));
    }
    if let Some((index, &label)) = y.iter().enumerate().find(|&(_, &label)| label >= c) {
        return Err(Error::InvalidLabel {
            index,
            label,
            num_classes: c,
        });
    }
    Ok(x)
}

/// Softmax cross-entropy loss.
///
/// Each row is shifted by its maximum before exponentiating, so large scores
/// do not overflow. Non-finite scores are not masked and show up in the
/// returned loss and gradient.
pub fn softmax_loss(scores: &ArrayD<f64>, y: &[usize]) -> Result<(f64, ArrayD<f64>)> {
    let x = scores_and_labels("softmax_loss", scores, y)?;
    let n = x.nrows() as f64;

    let mut log_probs: Array2<f64> = x.to_owned();
    for mut row in log_probs.axis_iter_mut(Axis(0)) {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| v - max);
        let log_sum = row.mapv(f64::exp).sum().ln();
        row.mapv_inplace(|v| v - log_sum);
    }

    let loss = -y
        .iter()
        .enumerate()
        .map(|(i, &label)| log_probs[[i, label]])
        .sum::<f64>()
        / n;

    let mut dx = log_probs.mapv(f64::exp);
    for (i, &label) in y.iter().enumerate() {
        dx[[i, label]] -= 1.0;
    }
    dx /= n;

    Ok((loss, dx.into_dyn()))
}

/// Multiclass SVM loss with margin 1.
pub fn svm_loss(scores: &ArrayD<f64>, y: &[usize]) -> Result<(f64, ArrayD<f64>)> {
    let x = scores_and_labels("svm_loss", scores, y)?;
    let n = x.nrows() as f64;

    let mut margins = Array2::<f64>::zeros(x.raw_dim());
    for (i, (row, &label)) in x.axis_iter(Axis(0)).zip(y).enumerate() {
        let correct = row[label];
        for (j, &s) in row.iter().enumerate() {
            if j != label {
                margins[[i, j]] = (s - correct + 1.0).max(0.0);
            }
        }
    }
    let loss = margins.sum() / n;

    let mut dx = margins.mapv(|m| if m > 0.0 { 1.0 } else { 0.0 });
    for (i, &label) in y.iter().enumerate() {
        let active = dx.row(i).sum();
        dx[[i, label]] -= active;
    }
    dx /= n;

    Ok((loss, dx.into_dyn()))
}
