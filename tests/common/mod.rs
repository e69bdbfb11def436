//! Central-difference gradient helpers shared by the integration tests.

#![allow(dead_code)]

use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustynn::classifiers::Classifier;
use rustynn::ParamKind;

pub const H: f64 = 1e-5;

/// Differences below this are treated as floating point noise.
const ABS_FLOOR: f64 = 1e-8;

pub fn randn(shape: &[usize], seed: u64) -> ArrayD<f64> {
    ArrayD::random_using(IxDyn(shape), StandardNormal, &mut StdRng::seed_from_u64(seed))
}

/// Numerical gradient of a scalar function at `x`.
pub fn eval_numerical_gradient<F>(mut f: F, x: &ArrayD<f64>, h: f64) -> ArrayD<f64>
where
    F: FnMut(&ArrayD<f64>) -> f64,
{
    let mut x = x.clone();
    let mut grad = ArrayD::zeros(x.raw_dim());
    for (i, g) in grad.iter_mut().enumerate() {
        let old = x.as_slice().unwrap()[i];
        x.as_slice_mut().unwrap()[i] = old + h;
        let fxph = f(&x);
        x.as_slice_mut().unwrap()[i] = old - h;
        let fxmh = f(&x);
        x.as_slice_mut().unwrap()[i] = old;
        *g = (fxph - fxmh) / (2.0 * h);
    }
    grad
}

/// Numerical gradient of `sum(f(x) * dout)` at `x`, for array-valued `f`.
pub fn eval_numerical_gradient_array<F>(mut f: F, x: &ArrayD<f64>, dout: &ArrayD<f64>) -> ArrayD<f64>
where
    F: FnMut(&ArrayD<f64>) -> ArrayD<f64>,
{
    eval_numerical_gradient(|x| (f(x) * dout).sum(), x, H)
}

/// `max(|x - y| / max(1e-8, |x| + |y|))`
pub fn rel_error(x: &ArrayD<f64>, y: &ArrayD<f64>) -> f64 {
    assert_eq!(x.shape(), y.shape(), "shape mismatch");
    x.iter()
        .zip(y.iter())
        .map(|(a, b)| (a - b).abs() / (a.abs() + b.abs()).max(1e-8))
        .fold(0.0, f64::max)
}

/// Element-wise comparison of an analytic and a numerical gradient.
pub fn assert_grads_are_close(what: &str, analytic: &ArrayD<f64>, numeric: &ArrayD<f64>, tolerance: f64) {
    assert_eq!(analytic.shape(), numeric.shape(), "{}: gradient shapes do not match", what);
    for (a, n) in analytic.iter().zip(numeric.iter()) {
        let diff = (a - n).abs();
        if diff < ABS_FLOOR {
            continue;
        }
        let relative_error = diff / (a.abs() + n.abs()).max(1e-8);
        assert!(
            relative_error < tolerance,
            "{}: gradients do not match, analytic {:.8e}, numeric {:.8e}, relative error {:.3e}",
            what,
            a,
            n,
            relative_error
        );
    }
}

/// Numerically differentiates the training loss with respect to every
/// parameter of `net` and compares against the analytic gradient store.
pub fn check_network_grads<C: Classifier>(net: &mut C, x: &ArrayD<f64>, y: &[usize], tolerance: f64) {
    let (_, grads) = net.loss_and_grads(x, y).unwrap();
    assert!(grads.same_layout(net.params()));

    for layer in 0..net.params().len() {
        let kinds: Vec<ParamKind> = net.params()[layer].tensors().map(|(k, _)| k).collect();
        for kind in kinds {
            let numeric = numeric_param_grad(net, layer, kind, x, y);
            let analytic = grads[layer].get(kind).unwrap();
            assert_grads_are_close(&format!("layer {} {:?}", layer, kind), analytic, &numeric, tolerance);
        }
    }
}

fn numeric_param_grad<C: Classifier>(
    net: &mut C,
    layer: usize,
    kind: ParamKind,
    x: &ArrayD<f64>,
    y: &[usize],
) -> ArrayD<f64> {
    let len = net.params()[layer].get(kind).unwrap().len();
    let mut grad = ArrayD::zeros(net.params()[layer].get(kind).unwrap().raw_dim());
    for i in 0..len {
        let old = entry(net, layer, kind, i);
        *entry_mut(net, layer, kind, i) = old + H;
        let (fxph, _) = net.loss_and_grads(x, y).unwrap();
        *entry_mut(net, layer, kind, i) = old - H;
        let (fxmh, _) = net.loss_and_grads(x, y).unwrap();
        *entry_mut(net, layer, kind, i) = old;
        grad.as_slice_mut().unwrap()[i] = (fxph - fxmh) / (2.0 * H);
    }
    grad
}

fn entry<C: Classifier>(net: &C, layer: usize, kind: ParamKind, i: usize) -> f64 {
    net.params()[layer].get(kind).unwrap().as_slice().unwrap()[i]
}

fn entry_mut<C: Classifier>(net: &mut C, layer: usize, kind: ParamKind, i: usize) -> &mut f64 {
    &mut net.params_mut()[layer].get_mut(kind).unwrap().as_slice_mut().unwrap()[i]
}
