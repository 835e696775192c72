//! Quantized fully-connected layer.

use crate::backend::Backend;
use crate::error::{NnError, Result};
use crate::init::{constant, xavier_uniform};
use crate::kernels::quantized_fully_connected::RangeSource;
use crate::layer::Layer;
use crate::op_kernel::{BackwardContext, ForwardContext, QuantizedFullyConnectedOp};
use crate::params::FullyParams;
use crate::quantize::QRange;
use crate::tensors::{Batch, Parameter, Shape3d};
use rand::RngCore;

/// Dense layer whose arithmetic runs through 8-bit fixed point.
///
/// The float contract matches [`super::FullyConnected`] to within
/// quantization error. After each forward pass the layer retains the
/// realized output range per sample, exposed through
/// [`QuantizedFullyConnected::output_ranges`] so a downstream quantized
/// layer can be constructed with [`RangeSource::Supplied`] instead of
/// rescanning buffers.
pub struct QuantizedFullyConnected {
    params: FullyParams,
    op: QuantizedFullyConnectedOp,
    weight: Parameter,
    bias: Option<Parameter>,
    output_ranges: Vec<QRange>,
    parallelize: bool,
}

impl QuantizedFullyConnected {
    /// Builds the layer with dynamically computed operand ranges.
    ///
    /// # Errors
    /// [`crate::NnError::Config`] for zero dimensions.
    pub fn new(in_size: usize, out_size: usize, has_bias: bool) -> Result<Self> {
        Self::with_range_source(in_size, out_size, has_bias, RangeSource::Computed)
    }

    /// Builds the layer with an explicit range policy.
    ///
    /// # Errors
    /// [`crate::NnError::Config`] for zero dimensions.
    pub fn with_range_source(
        in_size: usize,
        out_size: usize,
        has_bias: bool,
        ranges: RangeSource,
    ) -> Result<Self> {
        let params = FullyParams::new(in_size, out_size, has_bias)?;
        Ok(Self {
            params,
            op: QuantizedFullyConnectedOp::new(params, Backend::Internal, ranges),
            weight: Parameter::zeros("weight", params.weight_len()),
            bias: has_bias.then(|| Parameter::zeros("bias", out_size)),
            output_ranges: Vec::new(),
            parallelize: true,
        })
    }

    /// Realized output range of each sample of the most recent forward
    /// pass; empty before the first forward.
    #[must_use]
    pub fn output_ranges(&self) -> &[QRange] {
        &self.output_ranges
    }
}

impl Layer for QuantizedFullyConnected {
    fn layer_type(&self) -> &'static str {
        "quantized-fully-connected"
    }

    fn in_shape(&self) -> Vec<Shape3d> {
        vec![Shape3d::flat(self.params.in_size)]
    }

    fn out_shape(&self) -> Vec<Shape3d> {
        vec![Shape3d::flat(self.params.out_size)]
    }

    fn forward_propagation(&mut self, in_data: &[&Batch], out_data: &mut Batch) -> Result<()> {
        self.output_ranges = self.op.forward(ForwardContext {
            in_data: in_data[0],
            weights: &self.weight.value,
            bias: self.bias.as_ref().map(|b| &b.value),
            out_data,
            parallelize: self.parallelize,
        })?;
        Ok(())
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

    fn set_backend_type(&mut self, engine: Backend) -> Result<()> {
        // Only the internal fixed-point kernel exists.
        if engine != Backend::Internal {
            return Err(NnError::UnsupportedBackend {
                op: "quantized-fully-connected",
                engine,
            });
        }
        Ok(())
    }

    fn init_weights(&mut self, rng: &mut dyn RngCore) {
        xavier_uniform(
            rng,
            self.params.in_size,
            self.params.out_size,
            &mut self.weight.value,
        );
        if let Some(b) = &mut self.bias {
            constant(0.0, &mut b.value);
        }
    }
}
