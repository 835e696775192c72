//! AVX2 fully-connected kernels.
//!
//! Same contract as [`super::fully_connected`], vectorized across the
//! output index: the weight layout `W[c * out_size + i]` keeps each input
//! channel's weights contiguous in `i`, so the forward pass broadcasts
//! `in[c]` and fused-multiply-adds eight outputs per lane group. Results
//! match the reference kernel within floating-point rounding.
//!
//! # Safety
//!
//! The `unsafe` blocks assume an AVX2-capable x86_64 CPU; the module only
//! compiles under `--features simd` on targets where `avx2` is enabled,
//! and the dispatcher refuses the engine everywhere else.

use core::arch::x86_64::{
    _mm256_add_ps, _mm256_fmadd_ps, _mm256_loadu_ps, _mm256_mul_ps, _mm256_set1_ps,
    _mm256_setzero_ps, _mm256_storeu_ps,
};

use crate::parallel::{accumulate_samples, zip_for_each};
use crate::params::FullyParams;
use crate::tensors::{Batch, Float, Vect};

const LANES: usize = 8;

/// Forward affine transform, AVX2 variant.
pub fn forward(
    params: &FullyParams,
    in_data: &Batch,
    weights: &Vect,
    bias: Option<&Vect>,
    out_data: &mut Batch,
    parallelize: bool,
) {
    let out_size = params.out_size;

    zip_for_each(parallelize, out_data, in_data, |out, inp| {
        match bias {
            Some(b) => out.copy_from_slice(b),
            None => out.fill(0.0),
        }

        let tail = out_size - out_size % LANES;
        for (c, &x) in inp.iter().enumerate() {
            let row = &weights[c * out_size..(c + 1) * out_size];
            unsafe {
                let xv = _mm256_set1_ps(x);
                let mut i = 0;
                while i < tail {
                    let w = _mm256_loadu_ps(row.as_ptr().add(i));
                    let acc = _mm256_loadu_ps(out.as_ptr().add(i));
                    let acc = _mm256_fmadd_ps(xv, w, acc);
                    _mm256_storeu_ps(out.as_mut_ptr().add(i), acc);
                    i += LANES;
                }
            }
            for i in tail..out_size {
                out[i] += x * row[i];
            }
        }
    });
}

/// Backward pass, AVX2 variant.
///
/// The input-gradient dot products run vectorized; parameter gradients
/// reuse the per-sample partial scheme of the reference kernel so the
/// accumulation order is identical across variants.
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
    let in_size = params.in_size;
    let out_size = params.out_size;
    let tail = out_size - out_size % LANES;

    zip_for_each(parallelize, prev_delta, curr_delta, |pd, cd| {
        for c in 0..in_size {
            let row = &weights[c * out_size..(c + 1) * out_size];
            let mut sum;
            unsafe {
                let mut acc = _mm256_setzero_ps();
                let mut i = 0;
                while i < tail {
                    let w = _mm256_loadu_ps(row.as_ptr().add(i));
                    let d = _mm256_loadu_ps(cd.as_ptr().add(i));
                    acc = _mm256_fmadd_ps(w, d, acc);
                    i += LANES;
                }
                let mut buf = [0.0 as Float; LANES];
                _mm256_storeu_ps(buf.as_mut_ptr(), acc);
                sum = buf.iter().sum::<Float>();
            }
            for i in tail..out_size {
                sum += row[i] * cd[i];
            }
            pd[c] += sum;
        }
    });

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

fn sample_weight_grads(params: &FullyParams, prev_out: &Vect, curr_delta: &Vect) -> Vect {
    let out_size = params.out_size;
    let tail = out_size - out_size % LANES;
    let mut dw = vec![0.0 as Float; params.weight_len()];
    for (c, &x) in prev_out.iter().enumerate() {
        let row = &mut dw[c * out_size..(c + 1) * out_size];
        unsafe {
            let xv = _mm256_set1_ps(x);
            let mut i = 0;
            while i < tail {
                let d = _mm256_loadu_ps(curr_delta.as_ptr().add(i));
                let prod = _mm256_mul_ps(xv, d);
                let acc = _mm256_loadu_ps(row.as_ptr().add(i));
                _mm256_storeu_ps(row.as_mut_ptr().add(i), _mm256_add_ps(acc, prod));
                i += LANES;
            }
        }
        for i in tail..out_size {
            row[i] += x * curr_delta[i];
        }
    }
    dw
}

#[cfg(test)]
mod tests {
    use super::super::fully_connected as reference;
    use super::*;

    #[test]
    fn avx_matches_reference() {
        let p = FullyParams::new(5, 11, true).unwrap();
        let w: Vect = (0..p.weight_len()).map(|i| (i as Float) * 0.01 - 0.3).collect();
        let b: Vect = (0..11).map(|i| i as Float * 0.1).collect();
        let input = vec![(0..5).map(|i| i as Float - 2.0).collect::<Vect>()];
        let mut fast = vec![vec![0.0; 11]];
        let mut slow = vec![vec![0.0; 11]];
        forward(&p, &input, &w, Some(&b), &mut fast, false);
        reference::forward(&p, &input, &w, Some(&b), &mut slow, false);
        for (a, r) in fast[0].iter().zip(slow[0].iter()) {
            assert!((a - r).abs() < 1e-5, "{a} vs {r}");
        }
    }
}
