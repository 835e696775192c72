//! Reference 2D-convolution kernels.
//!
//! Valid padding, per-channel-pair filters, optional connection table
//! masking which (in-channel, out-channel) pairs participate. Forward
//! accumulates into an output buffer the caller has zeroed; backward
//! accumulates `prev_delta`, `dW` and `db` under the same `+=` contract
//! as the fully-connected kernels. Samples are independent and the
//! outer loop splits across the rayon pool when `parallelize` is set.

use crate::parallel::{accumulate_samples, zip_for_each};
use crate::params::ConvParams;
use crate::tensors::{Batch, Float, Vect};

/// Forward convolution over a batch. `out_data` rows must be zeroed.
pub fn forward(
    params: &ConvParams,
    in_data: &Batch,
    weights: &Vect,
    bias: Option<&Vect>,
    out_data: &mut Batch,
    parallelize: bool,
) {
    zip_for_each(parallelize, out_data, in_data, |out, inp| {
        forward_sample(params, inp, weights, bias, out);
    });
}

fn forward_sample(
    params: &ConvParams,
    inp: &Vect,
    weights: &Vect,
    bias: Option<&Vect>,
    out: &mut Vect,
) {
    let (inshape, outshape, wshape) = (params.in_shape, params.out_shape, params.weight);

    for o in 0..outshape.depth {
        for inc in 0..inshape.depth {
            if !params.tbl.is_connected(inc, o) {
                continue;
            }
            let filter =
                &weights[wshape.index(0, 0, inshape.depth * o + inc)..][..wshape.width * wshape.height];
            for y in 0..outshape.height {
                for x in 0..outshape.width {
                    let mut sum = 0.0;
                    for wy in 0..wshape.height {
                        for wx in 0..wshape.width {
                            let ix = x * params.w_stride + wx;
                            let iy = y * params.h_stride + wy;
                            sum += filter[wy * wshape.width + wx]
                                * inp[inshape.index(ix, iy, inc)];
                        }
                    }
                    out[outshape.index(x, y, o)] += sum;
                }
            }
        }
        if let Some(b) = bias {
            for y in 0..outshape.height {
                for x in 0..outshape.width {
                    out[outshape.index(x, y, o)] += b[o];
                }
            }
        }
    }
}

/// Backward convolution: input gradient plus parameter-gradient
/// accumulation, batch-parallel over samples for `prev_delta` and merged
/// per-sample partials for `dW`/`db`.
pub fn backward(
    params: &ConvParams,
    prev_out: &Batch,
    weights: &Vect,
    weight_grads: &mut Vect,
    mut bias_grads: Option<&mut Vect>,
    curr_delta: &Batch,
    prev_delta: &mut Batch,
    parallelize: bool,
) {
    let (inshape, outshape, wshape) = (params.in_shape, params.out_shape, params.weight);

    zip_for_each(parallelize, prev_delta, curr_delta, |pd, cd| {
        for inc in 0..inshape.depth {
            for o in 0..outshape.depth {
                if !params.tbl.is_connected(inc, o) {
                    continue;
                }
                let filter = &weights[wshape.index(0, 0, inshape.depth * o + inc)..]
                    [..wshape.width * wshape.height];
                for y in 0..outshape.height {
                    for x in 0..outshape.width {
                        let delta = cd[outshape.index(x, y, o)];
                        for wy in 0..wshape.height {
                            for wx in 0..wshape.width {
                                let ix = x * params.w_stride + wx;
                                let iy = y * params.h_stride + wy;
                                pd[inshape.index(ix, iy, inc)] +=
                                    filter[wy * wshape.width + wx] * delta;
                            }
                        }
                    }
                }
            }
        }
    });

    let samples = prev_out.len();
    accumulate_samples(
        parallelize,
        samples,
        |sample| sample_param_grads(params, &prev_out[sample], &curr_delta[sample]),
        |(dw, db)| {
            for (dst, &src) in weight_grads.iter_mut().zip(dw.iter()) {
                *dst += src;
            }
            if let Some(bias) = bias_grads.as_deref_mut() {
                for (dst, &src) in bias.iter_mut().zip(db.iter()) {
                    *dst += src;
                }
            }
        },
    );
}

/// One sample's `(dW, db)` contribution.
fn sample_param_grads(params: &ConvParams, prev_out: &Vect, curr_delta: &Vect) -> (Vect, Vect) {
    let (inshape, outshape, wshape) = (params.in_shape, params.out_shape, params.weight);
    let mut dw = vec![0.0 as Float; wshape.size()];
    let mut db = vec![0.0 as Float; outshape.depth];

    for inc in 0..inshape.depth {
        for o in 0..outshape.depth {
            if !params.tbl.is_connected(inc, o) {
                continue;
            }
            for wy in 0..wshape.height {
                for wx in 0..wshape.width {
                    let mut sum = 0.0;
                    for y in 0..outshape.height {
                        for x in 0..outshape.width {
                            let ix = x * params.w_stride + wx;
                            let iy = y * params.h_stride + wy;
                            sum += prev_out[inshape.index(ix, iy, inc)]
                                * curr_delta[outshape.index(x, y, o)];
                        }
                    }
                    dw[wshape.index(wx, wy, inshape.depth * o + inc)] += sum;
                }
            }
        }
    }

    if params.has_bias {
        for o in 0..outshape.depth {
            let mut sum = 0.0;
            for y in 0..outshape.height {
                for x in 0..outshape.width {
                    sum += curr_delta[outshape.index(x, y, o)];
                }
            }
            db[o] += sum;
        }
    }
    (dw, db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ConnectionTable;
    use crate::tensors::Shape3d;

    #[test]
    fn forward_known_values() {
        // 3x3 input, 2x2 filter of ones, stride 1 -> 2x2 sums of windows
        let p = ConvParams::new(
            Shape3d::new(3, 3, 1),
            2,
            2,
            1,
            1,
            1,
            false,
            ConnectionTable::all(),
        )
        .unwrap();
        let input = vec![(1..=9).map(|v| v as Float).collect::<Vect>()];
        let w = vec![1.0; 4];
        let mut out = vec![vec![0.0; 4]];
        forward(&p, &input, &w, None, &mut out, false);
        assert_eq!(out[0], vec![12.0, 16.0, 24.0, 28.0]);
    }

    #[test]
    fn masked_pair_contributes_nothing() {
        let tbl = ConnectionTable::new(vec![false], 1, 1).unwrap();
        let p = ConvParams::new(Shape3d::new(3, 3, 1), 2, 2, 1, 1, 1, false, tbl).unwrap();
        let input = vec![vec![1.0; 9]];
        let w = vec![1.0; 4];
        let mut out = vec![vec![0.0; 4]];
        forward(&p, &input, &w, None, &mut out, false);
        assert!(out[0].iter().all(|&v| v == 0.0));
    }
}
