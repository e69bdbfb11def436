//! Per-layer parameter sets and the ordered stores that hold them.
//!
//! A network owns one [`ParameterStore`]; every training-mode `loss` call
//! produces a fresh [`GradientStore`] with the same layout, so the gradient
//! for `params[i].weight` is `grads[i].weight`.

use crate::error::{Error, Result};
use ndarray::{ArrayD, ArrayView1, ArrayView2, ArrayView4, Dimension, Ix1, Ix2, Ix4};
use std::ops::{Index, IndexMut};

/// Names the arrays inside a [`ParamSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Weight,
    Bias,
    Gamma,
    Beta,
}

impl ParamKind {
    /// Only weights are subject to L2 regularization.
    pub fn is_regularized(self) -> bool {
        matches!(self, ParamKind::Weight)
    }
}

/// Parameters (or gradients) of one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSet {
    pub weight: ArrayD<f64>,
    pub bias: ArrayD<f64>,
    /// Batch-norm scale, present only on normalized layers.
    pub gamma: Option<ArrayD<f64>>,
    /// Batch-norm shift, present only on normalized layers.
    pub beta: Option<ArrayD<f64>>,
}

impl ParamSet {
    pub fn new(weight: ArrayD<f64>, bias: ArrayD<f64>) -> Self {
        Self {
            weight,
            bias,
            gamma: None,
            beta: None,
        }
    }

    pub fn with_norm(mut self, gamma: ArrayD<f64>, beta: ArrayD<f64>) -> Self {
        self.gamma = Some(gamma);
        self.beta = Some(beta);
        self
    }

    pub fn get(&self, kind: ParamKind) -> Option<&ArrayD<f64>> {
        match kind {
            ParamKind::Weight => Some(&self.weight),
            ParamKind::Bias => Some(&self.bias),
            ParamKind::Gamma => self.gamma.as_ref(),
            ParamKind::Beta => self.beta.as_ref(),
        }
    }

    pub fn get_mut(&mut self, kind: ParamKind) -> Option<&mut ArrayD<f64>> {
        match kind {
            ParamKind::Weight => Some(&mut self.weight),
            ParamKind::Bias => Some(&mut self.bias),
            ParamKind::Gamma => self.gamma.as_mut(),
            ParamKind::Beta => self.beta.as_mut(),
        }
    }

    /// Every array present in this set, weight first.
    pub fn tensors(&self) -> impl Iterator<Item = (ParamKind, &ArrayD<f64>)> + '_ {
        [
            (ParamKind::Weight, Some(&self.weight)),
            (ParamKind::Bias, Some(&self.bias)),
            (ParamKind::Gamma, self.gamma.as_ref()),
            (ParamKind::Beta, self.beta.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, t)| t.map(|t| (kind, t)))
    }

    pub fn tensors_mut(&mut self) -> impl Iterator<Item = (ParamKind, &mut ArrayD<f64>)> + '_ {
        [
            (ParamKind::Weight, Some(&mut self.weight)),
            (ParamKind::Bias, Some(&mut self.bias)),
            (ParamKind::Gamma, self.gamma.as_mut()),
            (ParamKind::Beta, self.beta.as_mut()),
        ]
        .into_iter()
        .filter_map(|(kind, t)| t.map(|t| (kind, t)))
    }

    /// Number of scalar parameters in the set.
    pub fn len(&self) -> usize {
        self.tensors().map(|(_, t)| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn weight2(&self) -> Result<ArrayView2<'_, f64>> {
        fixed_rank::<Ix2>("weight", &self.weight)
    }

    pub(crate) fn weight4(&self) -> Result<ArrayView4<'_, f64>> {
        fixed_rank::<Ix4>("weight", &self.weight)
    }

    pub(crate) fn bias1(&self) -> Result<ArrayView1<'_, f64>> {
        fixed_rank::<Ix1>("bias", &self.bias)
    }

    pub(crate) fn gamma1(&self) -> Result<ArrayView1<'_, f64>> {
        match &self.gamma {
            Some(g) => fixed_rank::<Ix1>("gamma", g),
            None => Err(Error::shape("gamma", "a batchnorm scale", "missing")),
        }
    }

    pub(crate) fn beta1(&self) -> Result<ArrayView1<'_, f64>> {
        match &self.beta {
            Some(b) => fixed_rank::<Ix1>("beta", b),
            None => Err(Error::shape("beta", "a batchnorm shift", "missing")),
        }
    }
}

fn fixed_rank<'a, D: Dimension>(name: &'static str, t: &'a ArrayD<f64>) -> Result<ndarray::ArrayView<'a, f64, D>> {
    t.view().into_dimensionality::<D>().map_err(|_| {
        Error::shape(
            name,
            format!("a rank-{} array", D::NDIM.unwrap_or(0)),
            t.shape(),
        )
    })
}

/// Ordered per-layer sets, indexed by layer position (0-based).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterStore {
    layers: Vec<ParamSet>,
}

/// Gradients use exactly the parameter layout.
pub type GradientStore = ParameterStore;

impl ParameterStore {
    pub fn new(layers: Vec<ParamSet>) -> Self {
        Self { layers }
    }

    pub fn layer(&self, index: usize) -> Option<&ParamSet> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut ParamSet> {
        self.layers.get_mut(index)
    }

    /// Layer `index`, or `InvalidShape` naming `net` when the store is too short.
    pub(crate) fn require(&self, net: &'static str, index: usize) -> Result<&ParamSet> {
        self.layers.get(index).ok_or_else(|| {
            Error::shape(
                net,
                format!("parameters for layer {}", index),
                format!("{} layers", self.layers.len()),
            )
        })
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ParamSet> {
        self.layers.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ParamSet> {
        self.layers.iter_mut()
    }

    /// Total number of scalar parameters.
    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(ParamSet::len).sum()
    }

    /// Sum of squared entries over every weight array.
    pub fn weight_square_sum(&self) -> f64 {
        self.layers
            .iter()
            .map(|p| p.weight.iter().map(|w| w * w).sum::<f64>())
            .sum()
    }

    /// True when `other` has the same layers, kinds and shapes.
    pub fn same_layout(&self, other: &ParameterStore) -> bool {
        self.len() == other.len()
            && self.iter().zip(other.iter()).all(|(a, b)| {
                a.tensors().count() == b.tensors().count()
                    && a
                        .tensors()
                        .zip(b.tensors())
                        .all(|((ka, ta), (kb, tb))| ka == kb && ta.shape() == tb.shape())
            })
    }
}

impl Index<usize> for ParameterStore {
    type Output = ParamSet;

    fn index(&self, index: usize) -> &ParamSet {
        &self.layers[index]
    }
}

impl IndexMut<usize> for ParameterStore {
    fn index_mut(&mut self, index: usize) -> &mut ParamSet {
        &mut self.layers[index]
    }
}

impl<'a> IntoIterator for &'a ParameterStore {
    type Item = &'a ParamSet;
    type IntoIter = std::slice::Iter<'a, ParamSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.layers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ParameterStore {
        ParameterStore::new(vec![
            ParamSet::new(ArrayD::from_elem(vec![3, 2], 2.0), ArrayD::zeros(vec![2]))
                .with_norm(ArrayD::ones(vec![2]), ArrayD::zeros(vec![2])),
            ParamSet::new(ArrayD::from_elem(vec![2, 4], 1.0), ArrayD::zeros(vec![4])),
        ])
    }

    #[test]
    fn test_tensor_enumeration() {
        let s = store();
        let kinds: Vec<_> = s[0].tensors().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![ParamKind::Weight, ParamKind::Bias, ParamKind::Gamma, ParamKind::Beta]
        );
        assert_eq!(s[1].tensors().count(), 2);
        assert_eq!(s.num_parameters(), 6 + 2 + 2 + 2 + 8 + 4);
    }

    #[test]
    fn test_weight_square_sum_ignores_bias_and_norm() {
        let mut s = store();
        s[0].bias.fill(100.0);
        s[0].gamma.as_mut().unwrap().fill(100.0);
        assert_eq!(s.weight_square_sum(), 6.0 * 4.0 + 8.0);
    }

    #[test]
    fn test_rank_checked_views() {
        let s = store();
        assert!(s[0].weight2().is_ok());
        assert!(s[0].weight4().is_err());
        assert!(s[1].gamma1().is_err());
    }

    #[test]
    fn test_require_reports_missing_layer() {
        let s = store();
        assert!(s.require("net", 1).is_ok());
        assert!(matches!(
            s.require("net", 2),
            Err(Error::InvalidShape { layer: "net", .. })
        ));
        assert!(ParameterStore::default().require("net", 0).is_err());
    }

    #[test]
    fn test_same_layout() {
        let a = store();
        let mut b = store();
        assert!(a.same_layout(&b));
        b[1].gamma = Some(ArrayD::zeros(vec![4]));
        assert!(!a.same_layout(&b));
    }
}
