//! Quantized-8-bit fully-connected kernels.
//!
//! Same mathematical contract as [`super::fully_connected`], routed
//! through fixed-point arithmetic:
//!
//! 1. operands are mapped to `u8` over tracked float ranges;
//! 2. the dot product runs in `i32` accumulators on zero-offset values;
//! 3. the accumulator's float range is derived analytically
//!    ([`range_for_multiplication`]) and widened by the bias range;
//! 4. the result is requantized to 8 bits with a range tightened to the
//!    observed accumulator extremes
//!    ([`quantize_down_and_shrink_range`]) and finally dequantized to
//!    float for the next layer.
//!
//! Operand ranges come from a [`RangeSource`]: either scanned from the
//! buffers on every call, or supplied by the caller when an upstream
//! quantized layer already knows the realized range of the data it hands
//! down. Both paths share this one kernel body.

use crate::parallel::for_each_indexed;
use crate::params::FullyParams;
use crate::quantize::{
    QRange, dequantize_slice, float_to_quantized, float_to_quantized_unclamped,
    quantize_down_and_shrink_range, quantize_slice, range_for_multiplication,
};
use crate::tensors::{Batch, Vect};

/// Where a quantized kernel gets its operand ranges.
#[derive(Debug, Clone, Copy)]
pub enum RangeSource {
    /// Scan every buffer's min/max on each call.
    Computed,
    /// Reuse ranges handed down by the caller, e.g. the realized output
    /// range of an upstream quantized layer.
    Supplied {
        input: QRange,
        weight: QRange,
        bias: QRange,
    },
}

impl RangeSource {
    fn weight_range(&self, weights: &Vect) -> QRange {
        match self {
            Self::Computed => QRange::of_slice(weights),
            Self::Supplied { weight, .. } => *weight,
        }
    }

    fn input_range(&self, sample: &Vect) -> QRange {
        match self {
            Self::Computed => QRange::of_slice(sample),
            Self::Supplied { input, .. } => *input,
        }
    }

    fn bias_range(&self, bias: &Vect) -> QRange {
        match self {
            Self::Computed => QRange::of_slice_with_zero(bias),
            Self::Supplied { bias: range, .. } => *range,
        }
    }
}

/// Forward affine transform in fixed-point arithmetic.
///
/// Returns the realized output range of each sample, which a chaining
/// caller may feed back in as a [`RangeSource::Supplied`] input range.
pub fn forward(
    params: &FullyParams,
    in_data: &Batch,
    weights: &Vect,
    bias: Option<&Vect>,
    ranges: RangeSource,
    out_data: &mut Batch,
    parallelize: bool,
) -> Vec<QRange> {
    let out_size = params.out_size;

    let weight_range = ranges.weight_range(weights);
    let weights_q: Vec<u8> = quantize_slice(weights, weight_range);
    let offset_weight = float_to_quantized_unclamped::<u8>(0.0, weight_range) as i32;

    let quantized_bias: Option<(Vec<u8>, QRange)> = bias.map(|b| {
        let range = ranges.bias_range(b);
        (quantize_slice(b, range), range)
    });

    let mut realized = Vec::with_capacity(in_data.len());
    for (sample, out) in in_data.iter().zip(out_data.iter_mut()) {
        let input_range = ranges.input_range(sample);
        let input_q: Vec<u8> = quantize_slice(sample, input_range);
        let offset_input = float_to_quantized_unclamped::<u8>(0.0, input_range) as i32;

        // Analytic accumulator range, widened by the bias bounds.
        let mut acc_range = range_for_multiplication::<u8, u8, i32>(input_range, weight_range);
        if let Some((_, br)) = &quantized_bias {
            acc_range = acc_range.offset(br.min, br.max);
        }
        let zero_in_acc_space = float_to_quantized::<i32>(0.0, acc_range);

        let mut acc = vec![0_i32; out_size];
        for_each_indexed(parallelize, &mut acc, |i, slot| {
            let mut sum = 0_i32;
            for (c, &x_q) in input_q.iter().enumerate() {
                let w = i32::from(weights_q[c * out_size + i]) - offset_weight;
                let x = i32::from(x_q) - offset_input;
                sum += w * x;
            }
            if let Some((bq, _)) = &quantized_bias {
                sum += i32::from(bq[i]) - zero_in_acc_space;
            }
            *slot = sum;
        });

        let (requantized, out_range) = quantize_down_and_shrink_range(&acc, acc_range);
        out.copy_from_slice(&dequantize_slice(&requantized, out_range));
        realized.push(out_range);
    }
    realized
}

/// Backward pass in fixed-point arithmetic.
///
/// `prev_delta` and `weight_grads` accumulate the dequantized results
/// (`+=`), matching the contract of every other kernel variant; `db`
/// accumulates the raw float deltas since the bias gradient involves no
/// multiplication.
#[allow(clippy::too_many_arguments)]
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

    let weight_range = QRange::of_slice(weights);
    let weights_q: Vec<u8> = quantize_slice(weights, weight_range);
    let offset_weight = float_to_quantized_unclamped::<u8>(0.0, weight_range) as i32;

    for sample in 0..prev_out.len() {
        let out_range = QRange::of_slice(&prev_out[sample]);
        let prev_out_q: Vec<u8> = quantize_slice(&prev_out[sample], out_range);
        let offset_prev_out = float_to_quantized_unclamped::<u8>(0.0, out_range) as i32;

        let delta_range = QRange::of_slice(&curr_delta[sample]);
        let delta_q: Vec<u8> = quantize_slice(&curr_delta[sample], delta_range);
        let offset_delta = float_to_quantized_unclamped::<u8>(0.0, delta_range) as i32;

        // prev_delta[c] += Σ_i curr_delta[i] * W[c * out_size + i]
        let pd_range = range_for_multiplication::<u8, u8, i32>(delta_range, weight_range);
        let mut pd_acc = vec![0_i32; in_size];
        for_each_indexed(parallelize, &mut pd_acc, |c, slot| {
            let mut sum = 0_i32;
            for i in 0..out_size {
                let d = i32::from(delta_q[i]) - offset_delta;
                let w = i32::from(weights_q[c * out_size + i]) - offset_weight;
                sum += d * w;
            }
            *slot = sum;
        });
        let (pd_q, pd_realized) = quantize_down_and_shrink_range(&pd_acc, pd_range);
        for (dst, src) in prev_delta[sample]
            .iter_mut()
            .zip(dequantize_slice(&pd_q, pd_realized))
        {
            *dst += src;
        }

        // dW[c * out_size + i] += curr_delta[i] * prev_out[c]
        let dw_range = range_for_multiplication::<u8, u8, i32>(delta_range, out_range);
        let mut dw_acc = vec![0_i32; params.weight_len()];
        for (c, &po_q) in prev_out_q.iter().enumerate() {
            let po = i32::from(po_q) - offset_prev_out;
            let row = &mut dw_acc[c * out_size..(c + 1) * out_size];
            for (i, slot) in row.iter_mut().enumerate() {
                let d = i32::from(delta_q[i]) - offset_delta;
                *slot = d * po;
            }
        }
        let (dw_q, dw_realized) = quantize_down_and_shrink_range(&dw_acc, dw_range);
        for (dst, src) in weight_grads
            .iter_mut()
            .zip(dequantize_slice(&dw_q, dw_realized))
        {
            *dst += src;
        }

        // db[i] += curr_delta[i], exact in float.
        if let Some(db) = bias_grads.as_deref_mut() {
            for (dst, &d) in db.iter_mut().zip(curr_delta[sample].iter()) {
                *dst += d;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fully_connected as reference;
    use super::*;
    use crate::tensors::Float;

    #[test]
    fn quantized_forward_tracks_reference() {
        let p = FullyParams::new(4, 3, true).unwrap();
        let w: Vect = vec![
            0.5, -0.25, 0.75, 1.0, 0.1, -0.6, -0.9, 0.3, 0.2, 0.4, -0.5, 0.8,
        ];
        let b: Vect = vec![0.1, -0.2, 0.05];
        let input = vec![vec![1.0, 0.0, -1.0, 2.0]];
        let mut exact = vec![vec![0.0; 3]];
        reference::forward(&p, &input, &w, Some(&b), &mut exact, false);

        let mut approx = vec![vec![0.0; 3]];
        let ranges = forward(
            &p,
            &input,
            &w,
            Some(&b),
            RangeSource::Computed,
            &mut approx,
            false,
        );
        assert_eq!(ranges.len(), 1);
        let scale = exact[0].iter().fold(1.0 as Float, |m, v| m.max(v.abs()));
        for (a, e) in approx[0].iter().zip(exact[0].iter()) {
            assert!(
                (a - e).abs() <= 0.05 * scale,
                "quantized {a} too far from exact {e}"
            );
        }
    }
}
