//! Fully-connected (dense) layer.

use crate::backend::Backend;
use crate::error::{NnError, Result};
use crate::init::{constant, xavier_uniform};
use crate::layer::Layer;
use crate::op_kernel::{BackwardContext, ForwardContext, FullyConnectedOp};
use crate::params::FullyParams;
use crate::tensors::{Batch, Parameter, Shape3d};
use rand::RngCore;

/// Affine transform `out = W^T in + b` with owned weight and optional
/// bias parameters.
///
/// The engine is fixed at construction and validated there: requesting a
/// backend with no compiled-in kernel fails fast instead of at the first
/// forward call.
///
/// # Example
/// ```rust
/// use edgegrad::layers::FullyConnected;
/// use edgegrad::backend::Backend;
/// use edgegrad::layer::Layer;
///
/// let fc = FullyConnected::new(4, 3, true, Backend::Internal).unwrap();
/// assert_eq!(fc.in_shape()[0].size(), 4);
/// ```
#[derive(Debug)]
pub struct FullyConnected {
    params: FullyParams,
    op: FullyConnectedOp,
    weight: Parameter,
    bias: Option<Parameter>,
    engine: Backend,
    parallelize: bool,
}

impl FullyConnected {
    /// Builds the layer and its op-kernel.
    ///
    /// # Errors
    /// [`NnError::Config`] for zero dimensions,
    /// [`NnError::UnsupportedBackend`] when `engine` has no kernel in
    /// this build.
    pub fn new(in_size: usize, out_size: usize, has_bias: bool, engine: Backend) -> Result<Self> {
        if !engine.available() {
            return Err(NnError::UnsupportedBackend {
                op: "fully-connected",
                engine,
            });
        }
        let params = FullyParams::new(in_size, out_size, has_bias)?;
        Ok(Self {
            params,
            op: FullyConnectedOp::new(params, engine),
            weight: Parameter::zeros("weight", params.weight_len()),
            bias: has_bias.then(|| Parameter::zeros("bias", out_size)),
            engine,
            parallelize: true,
        })
    }
}

impl Layer for FullyConnected {
    fn layer_type(&self) -> &'static str {
        "fully-connected"
    }

    fn in_shape(&self) -> Vec<Shape3d> {
        vec![Shape3d::flat(self.params.in_size)]
    }

    fn out_shape(&self) -> Vec<Shape3d> {
        vec![Shape3d::flat(self.params.out_size)]
    }

    fn forward_propagation(&mut self, in_data: &[&Batch], out_data: &mut Batch) -> Result<()> {
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
        if !engine.available() {
            return Err(NnError::UnsupportedBackend {
                op: "fully-connected",
                engine,
            });
        }
        self.engine = engine;
        self.op = FullyConnectedOp::new(self.params, engine);
        Ok(())
    }

    fn init_weights(&mut self, rng: &mut dyn RngCore) {
        let (fan_in, fan_out) = (self.params.in_size, self.params.out_size);
        xavier_uniform(rng, fan_in, fan_out, &mut self.weight.value);
        if let Some(b) = &mut self.bias {
            constant(0.0, &mut b.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_engine_fails_at_construction() {
        let err = FullyConnected::new(4, 2, true, Backend::Cblas).unwrap_err();
        assert!(matches!(err, NnError::UnsupportedBackend { .. }));
    }

    #[test]
    fn switching_to_missing_engine_is_rejected() {
        let mut fc = FullyConnected::new(4, 2, true, Backend::Internal).unwrap();
        let err = fc.set_backend_type(Backend::Cblas).unwrap_err();
        assert!(matches!(err, NnError::UnsupportedBackend { .. }));
        // a failed switch leaves the layer on its original engine
        assert_eq!(fc.engine(), Backend::Internal);

        fc.set_backend_type(Backend::Internal).unwrap();
        let input = vec![vec![1.0, 0.0, -1.0, 2.0]];
        let mut out = vec![vec![0.0; 2]];
        fc.forward_propagation(&[&input], &mut out).unwrap();
    }
}
