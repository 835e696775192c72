//! Gradient-descent parameter updates.
//!
//! An [`Optimizer`] consumes the gradient accumulator a backward pass
//! left inside each [`Parameter`] and applies an in-place update to its
//! value buffer. Stateful optimizers key their per-parameter state on
//! the stable id the network assigns each parameter, so two layers of
//! identical size never share moment estimates.

use crate::tensors::{Float, Parameter};
use rayon::prelude::*;
use std::collections::HashMap;

/// In-place parameter update rule.
pub trait Optimizer {
    /// Updates `param.value` from `param.grad`.
    ///
    /// `id` is stable across steps for the lifetime of a network and
    /// identifies this parameter buffer. The update is elementwise, so
    /// honoring `parallelize` never changes the result.
    fn update(&mut self, id: usize, param: &mut Parameter, parallelize: bool);
}

fn apply<F>(parallelize: bool, param: &mut Parameter, f: F)
where
    F: Fn(&mut Float, Float) + Sync,
{
    if parallelize {
        param
            .value
            .par_iter_mut()
            .zip(param.grad.par_iter())
            .for_each(|(v, &g)| f(v, g));
    } else {
        for (v, &g) in param.value.iter_mut().zip(param.grad.iter()) {
            f(v, g);
        }
    }
}

/// Plain stochastic gradient descent, `w -= lr * dw`.
pub struct Sgd {
    lr: Float,
}

impl Sgd {
    #[must_use]
    pub fn new(lr: Float) -> Self {
        Self { lr }
    }
}

impl Optimizer for Sgd {
    fn update(&mut self, _id: usize, param: &mut Parameter, parallelize: bool) {
        let lr = self.lr;
        apply(parallelize, param, |v, g| *v -= lr * g);
    }
}

/// Adam with bias-corrected first and second moment estimates.
///
/// Moment buffers are allocated lazily per parameter id on the first
/// update and persist across steps.
pub struct Adam {
    lr: Float,
    beta1: Float,
    beta2: Float,
    eps: Float,
    /// Per-parameter `(m, v, t)` state.
    state: HashMap<usize, (Vec<Float>, Vec<Float>, u32)>,
}

impl Adam {
    /// Adam with the customary defaults (`beta1 = 0.9`, `beta2 = 0.999`,
    /// `eps = 1e-8`).
    #[must_use]
    pub fn new(lr: Float) -> Self {
        Self::with_betas(lr, 0.9, 0.999, 1e-8)
    }

    #[must_use]
    pub fn with_betas(lr: Float, beta1: Float, beta2: Float, eps: Float) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            state: HashMap::new(),
        }
    }
}

impl Optimizer for Adam {
    fn update(&mut self, id: usize, param: &mut Parameter, parallelize: bool) {
        let n = param.len();
        let (m, v, t) = self
            .state
            .entry(id)
            .or_insert_with(|| (vec![0.0; n], vec![0.0; n], 0));
        *t += 1;
        let bias1 = 1.0 - self.beta1.powi(*t as i32);
        let bias2 = 1.0 - self.beta2.powi(*t as i32);
        let (lr, beta1, beta2, eps) = (self.lr, self.beta1, self.beta2, self.eps);

        let step = |((w, &g), (m, v)): ((&mut Float, &Float), (&mut Float, &mut Float))| {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *w -= lr * m_hat / (v_hat.sqrt() + eps);
        };

        if parallelize {
            param
                .value
                .par_iter_mut()
                .zip(param.grad.par_iter())
                .zip(m.par_iter_mut().zip(v.par_iter_mut()))
                .for_each(step);
        } else {
            param
                .value
                .iter_mut()
                .zip(param.grad.iter())
                .zip(m.iter_mut().zip(v.iter_mut()))
                .for_each(step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sgd_steps_against_gradient() {
        let mut p = Parameter::zeros("weight", 2);
        p.value.copy_from_slice(&[1.0, -1.0]);
        p.grad.copy_from_slice(&[0.5, -0.5]);
        Sgd::new(0.1).update(0, &mut p, false);
        assert_eq!(p.value, vec![0.95, -0.95]);
    }

    #[test]
    fn adam_state_is_per_parameter() {
        let mut opt = Adam::new(0.01);
        let mut a = Parameter::zeros("weight", 1);
        let mut b = Parameter::zeros("weight", 1);
        a.grad[0] = 1.0;
        b.grad[0] = -1.0;
        for _ in 0..3 {
            opt.update(0, &mut a, false);
            opt.update(1, &mut b, false);
        }
        // symmetric gradients under independent state give symmetric steps
        assert!((a.value[0] + b.value[0]).abs() < 1e-9);
        assert!(a.value[0] < 0.0);
    }

    #[test]
    fn adam_parallel_matches_serial() {
        let grads: Vec<Float> = (0..64).map(|i| (i as Float - 32.0) * 0.03).collect();
        let mut serial = Parameter::zeros("weight", 64);
        let mut parallel = Parameter::zeros("weight", 64);
        serial.grad.copy_from_slice(&grads);
        parallel.grad.copy_from_slice(&grads);

        let mut opt_s = Adam::new(0.02);
        let mut opt_p = Adam::new(0.02);
        for _ in 0..5 {
            opt_s.update(0, &mut serial, false);
            opt_p.update(0, &mut parallel, true);
        }
        assert_eq!(serial.value, parallel.value);
    }
}
