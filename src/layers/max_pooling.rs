//! Spatial max-pooling layer.

use crate::error::{NnError, Result};
use crate::layer::Layer;
use crate::parallel::{for_each_sample, zip_for_each};
use crate::tensors::{Batch, Shape3d, Vect};

/// Square-window max reduction over each channel plane.
///
/// Parameterless. The forward pass retains the flat input index of every
/// window's winning element; the backward pass routes the downstream
/// gradient to exactly those positions and nowhere else, matching the
/// subgradient of `max`.
#[derive(Debug)]
pub struct MaxPooling {
    in_shape: Shape3d,
    out_shape: Shape3d,
    pool: usize,
    stride: usize,
    // per sample, per output element: flat index of the forward winner
    winners: Vec<Vec<usize>>,
    parallelize: bool,
}

impl MaxPooling {
    /// Builds a pooling layer with a `pool`-sided window moved by
    /// `stride`. Output geometry is `(in - pool) / stride + 1` per axis;
    /// depth is preserved.
    ///
    /// # Errors
    /// [`NnError::Config`] for a zero window or stride, or a window
    /// larger than the input plane.
    pub fn new(in_shape: Shape3d, pool: usize, stride: usize) -> Result<Self> {
        if pool == 0 || stride == 0 {
            return Err(NnError::Config(
                "pooling window and stride must be nonzero".into(),
            ));
        }
        if pool > in_shape.width || pool > in_shape.height {
            return Err(NnError::Config(format!(
                "pooling window {pool} exceeds input plane {}",
                in_shape.describe()
            )));
        }
        let out_shape = Shape3d::new(
            (in_shape.width - pool) / stride + 1,
            (in_shape.height - pool) / stride + 1,
            in_shape.depth,
        );
        Ok(Self {
            in_shape,
            out_shape,
            pool,
            stride,
            winners: Vec::new(),
            parallelize: true,
        })
    }
}

impl Layer for MaxPooling {
    fn layer_type(&self) -> &'static str {
        "max-pooling"
    }

    fn in_shape(&self) -> Vec<Shape3d> {
        vec![self.in_shape]
    }

    fn out_shape(&self) -> Vec<Shape3d> {
        vec![self.out_shape]
    }

    fn forward_propagation(&mut self, in_data: &[&Batch], out_data: &mut Batch) -> Result<()> {
        let inputs = in_data[0];
        self.winners.resize_with(inputs.len(), Vec::new);
        for w in &mut self.winners {
            w.resize(self.out_shape.size(), 0);
        }

        let (ins, outs) = (self.in_shape, self.out_shape);
        let (pool, stride) = (self.pool, self.stride);
        let mut rows: Vec<(&mut Vect, &mut Vec<usize>)> =
            out_data.iter_mut().zip(self.winners.iter_mut()).collect();
        for_each_sample(self.parallelize, &mut rows, |sample, row| {
            let (out, winners) = row;
            let inp = &inputs[sample];
            for c in 0..ins.depth {
                for oy in 0..outs.height {
                    for ox in 0..outs.width {
                        let mut best = ins.index(ox * stride, oy * stride, c);
                        for wy in 0..pool {
                            for wx in 0..pool {
                                let idx = ins.index(ox * stride + wx, oy * stride + wy, c);
                                if inp[idx] > inp[best] {
                                    best = idx;
                                }
                            }
                        }
                        let o = outs.index(ox, oy, c);
                        out[o] = inp[best];
                        winners[o] = best;
                    }
                }
            }
        });
        Ok(())
    }

    fn back_propagation(
        &mut self,
        _in_data: &[&Batch],
        _out_data: &Batch,
        out_grad: &Batch,
        in_grad: &mut [Batch],
    ) -> Result<()> {
        let rows: Vec<(&Vect, &Vec<usize>)> =
            out_grad.iter().zip(self.winners.iter()).collect();
        zip_for_each(self.parallelize, &mut in_grad[0], &rows, |pd, row| {
            let (grad, winners) = row;
            for (o, &src) in winners.iter().enumerate() {
                pd[src] += grad[o];
            }
        });
        Ok(())
    }

    fn set_parallelize(&mut self, parallelize: bool) {
        self.parallelize = parallelize;
    }

    fn parallelize(&self) -> bool {
        self.parallelize
    }
}
