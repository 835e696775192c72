//! Operation contexts and engine dispatch.
//!
//! An op object decouples *which mathematical operation* runs from *which
//! numeric backend computes it*. It is constructed once per layer with
//! the operation's static parameters and an engine identifier, then
//! invoked through a single `forward`/`backward` entry point carrying a
//! context of borrowed tensors. Dispatch selects exactly one kernel
//! matching the engine; an engine with no compiled-in kernel yields
//! [`NnError::UnsupportedBackend`], never a silent substitute.
//!
//! Ops are stateless across calls: nothing but the immutable parameters
//! bound at construction persists between `compute` invocations.

use crate::backend::Backend;
use crate::error::{NnError, Result};
use crate::kernels;
use crate::kernels::quantized_fully_connected::RangeSource;
use crate::params::{ConvParams, FullyParams};
use crate::quantize::QRange;
use crate::tensors::{Batch, Vect};

/// Borrowed tensors for one forward call of an affine-style operation.
pub struct ForwardContext<'a> {
    pub in_data: &'a Batch,
    pub weights: &'a Vect,
    pub bias: Option<&'a Vect>,
    pub out_data: &'a mut Batch,
    pub parallelize: bool,
}

/// Borrowed tensors for one backward call of an affine-style operation.
///
/// `weight_grads`, `bias_grads` and `prev_delta` are accumulated into
/// (`+=`); the caller zeroes them once per pass.
pub struct BackwardContext<'a> {
    pub prev_out: &'a Batch,
    pub weights: &'a Vect,
    pub weight_grads: &'a mut Vect,
    pub bias_grads: Option<&'a mut Vect>,
    pub curr_delta: &'a Batch,
    pub prev_delta: &'a mut Batch,
    pub parallelize: bool,
}

/// Fully-connected operation bound to an engine.
#[derive(Debug, Clone)]
pub struct FullyConnectedOp {
    params: FullyParams,
    engine: Backend,
}

impl FullyConnectedOp {
    /// Binds static parameters to an engine. Availability is checked at
    /// `compute` time so a hand-built op reports the same explicit error
    /// a layer construction would.
    #[must_use]
    pub fn new(params: FullyParams, engine: Backend) -> Self {
        Self { params, engine }
    }

    /// Static parameters bound at construction.
    #[must_use]
    pub fn params(&self) -> &FullyParams {
        &self.params
    }

    /// Runs the forward kernel matching the bound engine.
    ///
    /// # Errors
    /// [`NnError::UnsupportedBackend`] when the engine's kernel is not in
    /// this build.
    pub fn forward(&self, ctx: ForwardContext<'_>) -> Result<()> {
        match self.engine {
            Backend::Internal => {
                kernels::fully_connected::forward(
                    &self.params,
                    ctx.in_data,
                    ctx.weights,
                    ctx.bias,
                    ctx.out_data,
                    ctx.parallelize,
                );
                Ok(())
            }
            #[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
            Backend::Avx => {
                kernels::fully_connected_avx::forward(
                    &self.params,
                    ctx.in_data,
                    ctx.weights,
                    ctx.bias,
                    ctx.out_data,
                    ctx.parallelize,
                );
                Ok(())
            }
            engine => Err(NnError::UnsupportedBackend {
                op: "fully-connected forward",
                engine,
            }),
        }
    }

    /// Runs the backward kernel matching the bound engine.
    ///
    /// # Errors
    /// [`NnError::UnsupportedBackend`] when the engine's kernel is not in
    /// this build.
    pub fn backward(&self, ctx: BackwardContext<'_>) -> Result<()> {
        match self.engine {
            Backend::Internal => {
                kernels::fully_connected::backward(
                    &self.params,
                    ctx.prev_out,
                    ctx.weights,
                    ctx.weight_grads,
                    ctx.bias_grads,
                    ctx.curr_delta,
                    ctx.prev_delta,
                    ctx.parallelize,
                );
                Ok(())
            }
            #[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
            Backend::Avx => {
                kernels::fully_connected_avx::backward(
                    &self.params,
                    ctx.prev_out,
                    ctx.weights,
                    ctx.weight_grads,
                    ctx.bias_grads,
                    ctx.curr_delta,
                    ctx.prev_delta,
                    ctx.parallelize,
                );
                Ok(())
            }
            engine => Err(NnError::UnsupportedBackend {
                op: "fully-connected backward",
                engine,
            }),
        }
    }
}

/// Quantized fully-connected operation.
///
/// Only the internal engine carries quantized kernels; the op also binds
/// the [`RangeSource`] policy chosen at layer construction.
#[derive(Debug, Clone)]
pub struct QuantizedFullyConnectedOp {
    params: FullyParams,
    engine: Backend,
    ranges: RangeSource,
}

impl QuantizedFullyConnectedOp {
    #[must_use]
    pub fn new(params: FullyParams, engine: Backend, ranges: RangeSource) -> Self {
        Self {
            params,
            engine,
            ranges,
        }
    }

    /// Runs the quantized forward kernel, returning each sample's
    /// realized output range for chaining.
    ///
    /// # Errors
    /// [`NnError::UnsupportedBackend`] for any engine other than
    /// `Internal`.
    pub fn forward(&self, ctx: ForwardContext<'_>) -> Result<Vec<QRange>> {
        match self.engine {
            Backend::Internal => Ok(kernels::quantized_fully_connected::forward(
                &self.params,
                ctx.in_data,
                ctx.weights,
                ctx.bias,
                self.ranges,
                ctx.out_data,
                ctx.parallelize,
            )),
            engine => Err(NnError::UnsupportedBackend {
                op: "quantized fully-connected forward",
                engine,
            }),
        }
    }

    /// Runs the quantized backward kernel.
    ///
    /// # Errors
    /// [`NnError::UnsupportedBackend`] for any engine other than
    /// `Internal`.
    pub fn backward(&self, ctx: BackwardContext<'_>) -> Result<()> {
        match self.engine {
            Backend::Internal => {
                kernels::quantized_fully_connected::backward(
                    &self.params,
                    ctx.prev_out,
                    ctx.weights,
                    ctx.weight_grads,
                    ctx.bias_grads,
                    ctx.curr_delta,
                    ctx.prev_delta,
                    ctx.parallelize,
                );
                Ok(())
            }
            engine => Err(NnError::UnsupportedBackend {
                op: "quantized fully-connected backward",
                engine,
            }),
        }
    }
}

/// 2D-convolution operation bound to an engine.
#[derive(Debug, Clone)]
pub struct Conv2dOp {
    params: ConvParams,
    engine: Backend,
}

impl Conv2dOp {
    #[must_use]
    pub fn new(params: ConvParams, engine: Backend) -> Self {
        Self { params, engine }
    }

    #[must_use]
    pub fn params(&self) -> &ConvParams {
        &self.params
    }

    /// Runs the forward convolution kernel.
    ///
    /// # Errors
    /// [`NnError::UnsupportedBackend`] when no kernel matches the engine.
    pub fn forward(&self, ctx: ForwardContext<'_>) -> Result<()> {
        match self.engine {
            Backend::Internal => {
                kernels::conv2d::forward(
                    &self.params,
                    ctx.in_data,
                    ctx.weights,
                    ctx.bias,
                    ctx.out_data,
                    ctx.parallelize,
                );
                Ok(())
            }
            engine => Err(NnError::UnsupportedBackend {
                op: "conv2d forward",
                engine,
            }),
        }
    }

    /// Runs the backward convolution kernel.
    ///
    /// # Errors
    /// [`NnError::UnsupportedBackend`] when no kernel matches the engine.
    pub fn backward(&self, ctx: BackwardContext<'_>) -> Result<()> {
        match self.engine {
            Backend::Internal => {
                kernels::conv2d::backward(
                    &self.params,
                    ctx.prev_out,
                    ctx.weights,
                    ctx.weight_grads,
                    ctx.bias_grads,
                    ctx.curr_delta,
                    ctx.prev_delta,
                    ctx.parallelize,
                );
                Ok(())
            }
            engine => Err(NnError::UnsupportedBackend {
                op: "conv2d backward",
                engine,
            }),
        }
    }
}
