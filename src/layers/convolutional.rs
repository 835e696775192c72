//! 2D convolutional layer.

use crate::backend::Backend;
use crate::error::{NnError, Result};
use crate::init::{constant, xavier_uniform};
use crate::layer::Layer;
use crate::op_kernel::{BackwardContext, Conv2dOp, ForwardContext};
use crate::params::{ConnectionTable, ConvParams};
use crate::tensors::{Batch, Parameter, Shape3d};
use rand::RngCore;

/// Valid-padding 2D convolution with per-channel-pair filters and an
/// optional connection table.
///
/// Declares spatial input geometry, so edge validation against this
/// layer compares full `(width, height, depth)` triples rather than
/// element counts alone.
pub struct Conv2d {
    params: ConvParams,
    op: Conv2dOp,
    weight: Parameter,
    bias: Option<Parameter>,
    engine: Backend,
    parallelize: bool,
}

impl Conv2d {
    /// Builds a square-window convolution.
    ///
    /// # Errors
    /// [`NnError::Config`] for invalid geometry,
    /// [`NnError::UnsupportedBackend`] when `engine` has no conv kernel.
    pub fn new(
        in_shape: Shape3d,
        window: usize,
        out_depth: usize,
        stride: usize,
        has_bias: bool,
        tbl: ConnectionTable,
        engine: Backend,
    ) -> Result<Self> {
        // Only the internal conv kernel ships; fail at construction, not
        // at first forward.
        if engine != Backend::Internal {
            return Err(NnError::UnsupportedBackend {
                op: "conv2d",
                engine,
            });
        }
        let params = ConvParams::new(
            in_shape, window, window, out_depth, stride, stride, has_bias, tbl,
        )?;
        let weight_len = params.weight.size();
        let bias = params
            .has_bias
            .then(|| Parameter::zeros("bias", out_depth));
        Ok(Self {
            op: Conv2dOp::new(params.clone(), engine),
            params,
            weight: Parameter::zeros("weight", weight_len),
            bias,
            engine,
            parallelize: true,
        })
    }
}

impl Layer for Conv2d {
    fn layer_type(&self) -> &'static str {
        "conv2d"
    }

    fn in_shape(&self) -> Vec<Shape3d> {
        vec![self.params.in_shape]
    }

    fn out_shape(&self) -> Vec<Shape3d> {
        vec![self.params.out_shape]
    }

    fn forward_propagation(&mut self, in_data: &[&Batch], out_data: &mut Batch) -> Result<()> {
        // conv accumulates; rows arrive zeroed from the graph
        self.op.forward(ForwardContext {
            in_data: in_data[0],
            weights: &self.weight.value,
            bias: self.bias.as_ref().map(|b| &b.value),
            out_data,
            parallelize: self.parallelize,
        })
    }

    fn back_propagation(
        &mut self,
        in_data: &[&Batch],
        _out_data: &Batch,
        out_grad: &Batch,
        in_grad: &mut [Batch],
    ) -> Result<()> {
        self.op.backward(BackwardContext {
            prev_out: in_data[0],
            weights: &self.weight.value,
            weight_grads: &mut self.weight.grad,
            bias_grads: self.bias.as_mut().map(|b| &mut b.grad),
            curr_delta: out_grad,
            prev_delta: &mut in_grad[0],
            parallelize: self.parallelize,
        })
    }

    fn params(&self) -> Vec<&Parameter> {
        let mut out = vec![&self.weight];
        if let Some(b) = &self.bias {
            out.push(b);
        }
        out
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        let mut out = vec![&mut self.weight];
        if let Some(b) = &mut self.bias {
            out.push(b);
        }
        out
    }

    fn set_parallelize(&mut self, parallelize: bool) {
        self.parallelize = parallelize;
    }

    fn parallelize(&self) -> bool {
        self.parallelize
    }

    fn engine(&self) -> Backend {
        self.engine
    }

    fn set_backend_type(&mut self, engine: Backend) -> Result<()> {
        if engine != Backend::Internal {
            return Err(NnError::UnsupportedBackend {
                op: "conv2d",
                engine,
            });
        }
        self.engine = engine;
        Ok(())
    }

    fn init_weights(&mut self, rng: &mut dyn RngCore) {
        let window = self.params.weight.width * self.params.weight.height;
        let fan_in = window * self.params.in_shape.depth;
        let fan_out = window * self.params.out_shape.depth;
        xavier_uniform(rng, fan_in, fan_out, &mut self.weight.value);
        if let Some(b) = &mut self.bias {
            constant(0.0, &mut b.value);
        }
    }
}
