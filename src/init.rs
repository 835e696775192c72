//! Weight initialization with explicitly passed RNG state.

use crate::tensors::Float;
use rand::{Rng, RngCore};

/// Fills `buf` with Xavier-uniform samples in
/// `±sqrt(6 / (fan_in + fan_out))`.
pub fn xavier_uniform(rng: &mut dyn RngCore, fan_in: usize, fan_out: usize, buf: &mut [Float]) {
    let bound = (6.0 / (fan_in + fan_out) as Float).sqrt();
    for v in buf.iter_mut() {
        *v = rng.random_range(-bound..bound);
    }
}

/// Fills `buf` with a constant, the convention for bias buffers.
pub fn constant(value: Float, buf: &mut [Float]) {
    for v in buf.iter_mut() {
        *v = value;
    }
}
