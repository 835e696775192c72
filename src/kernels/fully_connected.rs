//! Reference ("internal") fully-connected kernels.
//!
//! # Contract
//!
//! Forward, for every sample and output index `i`:
//!
//! ```text
//! out[i] = bias[i] + Σ_c W[c * out_size + i] * in[c]      c in [0, in_size)
//! ```
//!
//! (bias term absent when the layer has none). Backward:
//!
//! ```text
//! prev_delta[c]          += Σ_i curr_delta[i] * W[c * out_size + i]
//! dW[c * out_size + i]   += curr_delta[i] * prev_out[c]     (summed over samples)
//! db[i]                  += curr_delta[i]                   (summed over samples)
//! ```
//!
//! Every other variant (AVX, quantized-dequantized) must reproduce these
//! results within floating-point rounding. Samples are independent; the
//! `parallelize` flag splits the batch across the rayon pool without
//! changing the numbers (parameter gradients are merged in sample order,
//! see [`crate::parallel::accumulate_samples`]).
//!
//! Zero-length batches are a no-op.

use crate::parallel::{accumulate_samples, zip_for_each};
use crate::params::FullyParams;
use crate::tensors::{Batch, Float, Vect};

/// Forward affine transform over a batch.
///
/// # Panics
/// Panics in debug builds if any buffer disagrees with `params`.
pub fn forward(
    params: &FullyParams,
    in_data: &Batch,
    weights: &Vect,
    bias: Option<&Vect>,
    out_data: &mut Batch,
    parallelize: bool,
) {
    debug_assert_eq!(weights.len(), params.weight_len());
    debug_assert_eq!(in_data.len(), out_data.len());

    let in_size = params.in_size;
    let out_size = params.out_size;

    zip_for_each(parallelize, out_data, in_data, |out, inp| {
        debug_assert_eq!(inp.len(), in_size);
        debug_assert_eq!(out.len(), out_size);
        for i in 0..out_size {
            let mut sum = bias.map_or(0.0, |b| b[i]);
            for (c, &x) in inp.iter().enumerate() {
                sum += weights[c * out_size + i] * x;
            }
            out[i] = sum;
        }
    });
}

/// Backward pass: input gradient plus parameter-gradient accumulation.
///
/// `prev_delta` rows gain the gradient w.r.t. this operation's input;
/// `weight_grads`/`bias_grads` gain the batch-summed parameter gradients.
/// All three are `+=`, never `=`.
pub fn backward(
    params: &FullyParams,
    prev_out: &Batch,
    weights: &Vect,
    weight_grads: &mut Vect,
    mut bias_grads: Option<&mut Vect>,
    curr_delta: &Batch,
    prev_delta: &mut Batch,
    parallelize: bool,
) {
    debug_assert_eq!(prev_out.len(), curr_delta.len());
    debug_assert_eq!(prev_out.len(), prev_delta.len());

    let in_size = params.in_size;
    let out_size = params.out_size;

    // Input gradient: rows are disjoint, safe to split by sample.
    zip_for_each(parallelize, prev_delta, curr_delta, |pd, cd| {
        for c in 0..in_size {
            let row = &weights[c * out_size..(c + 1) * out_size];
            let mut sum = 0.0;
            for (w, &d) in row.iter().zip(cd.iter()) {
                sum += w * d;
            }
            pd[c] += sum;
        }
    });

    // Parameter gradients: per-sample partials, merged in sample order so
    // parallel and serial runs accumulate identically.
    let samples = prev_out.len();
    accumulate_samples(
        parallelize,
        samples,
        |sample| sample_weight_grads(params, &prev_out[sample], &curr_delta[sample]),
        |partial| {
            for (dst, &src) in weight_grads.iter_mut().zip(partial.iter()) {
                *dst += src;
            }
        },
    );

    if let Some(db) = bias_grads.as_deref_mut() {
        for cd in curr_delta {
            for (dst, &d) in db.iter_mut().zip(cd.iter()) {
                *dst += d;
            }
        }
    }
}

/// One sample's contribution to `dW`.
fn sample_weight_grads(params: &FullyParams, prev_out: &Vect, curr_delta: &Vect) -> Vect {
    let out_size = params.out_size;
    let mut dw = vec![0.0 as Float; params.weight_len()];
    for (c, &x) in prev_out.iter().enumerate() {
        let row = &mut dw[c * out_size..(c + 1) * out_size];
        for (slot, &d) in row.iter_mut().zip(curr_delta.iter()) {
            *slot = d * x;
        }
    }
    dw
}
