//! The layer abstraction: the polymorphic unit of the graph.
//!
//! A layer declares its port geometry, owns its trainable parameters,
//! and forwards `forward_propagation`/`back_propagation` calls into an
//! op-kernel configured at construction. Concrete operations (dense,
//! convolution, activation, dropout, quantized variants) are separate
//! implementing types composed from a params struct plus a dispatch
//! object; there is no inheritance chain.
//!
//! # Contract
//!
//! - `in_shape`/`out_shape` are fixed after construction; the graph uses
//!   them to validate edges and size tensors before the first forward.
//! - `forward_propagation` must be callable once per minibatch without
//!   reallocation; output buffers arrive pre-sized.
//! - `back_propagation` receives the retained forward tensors plus the
//!   downstream gradient and *accumulates* into `in_grad` rows and its
//!   own parameter gradients.
//! - `set_parallelize` only changes execution strategy, never numerics.
//! - A layer whose engine has no compiled-in kernel fails at
//!   construction, not at first forward.

use crate::backend::Backend;
use crate::error::{NnError, Result};
use crate::tensors::{Batch, Parameter, Shape3d};
use rand::RngCore;

/// Whether the network is currently training or testing.
///
/// Phase-dependent layers (dropout, batch-normalization style) consult
/// this at forward-call time, never at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Train,
    Test,
}

/// A node in the computation graph.
///
/// Multi-port layers receive one batch per input port in declaration
/// order; single-input layers read `in_data[0]`.
pub trait Layer: Send {
    /// Stable type tag, exposed for external serializers and
    /// diagnostics.
    fn layer_type(&self) -> &'static str;

    /// Geometry of each input port, in order.
    fn in_shape(&self) -> Vec<Shape3d>;

    /// Geometry of each output port, in order.
    fn out_shape(&self) -> Vec<Shape3d>;

    /// Populates `out_data` from the input batches.
    fn forward_propagation(&mut self, in_data: &[&Batch], out_data: &mut Batch) -> Result<()>;

    /// Computes gradients w.r.t. inputs (accumulated into `in_grad`, one
    /// batch per input port) and w.r.t. owned parameters (accumulated
    /// into the layer's [`Parameter`] buffers).
    fn back_propagation(
        &mut self,
        in_data: &[&Batch],
        out_data: &Batch,
        out_grad: &Batch,
        in_grad: &mut [Batch],
    ) -> Result<()>;

    /// Owned trainable parameters; empty for activations and the like.
    fn params(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    /// Mutable access to the owned parameters, in the same order as
    /// [`Layer::params`].
    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }

    /// Splits kernel outer loops across the worker pool when `true`.
    fn set_parallelize(&mut self, parallelize: bool);

    /// Current parallelize flag.
    fn parallelize(&self) -> bool;

    /// Engine the layer currently dispatches to.
    fn engine(&self) -> Backend {
        Backend::Internal
    }

    /// Reconfigures the engine, valid between construction and the first
    /// forward call.
    ///
    /// Implementations re-validate availability and rebuild their op, so
    /// the fail-fast contract of the constructor carries over to the
    /// mutator. Layers without an engine reject the call.
    ///
    /// # Errors
    /// [`NnError::UnsupportedBackend`] when `engine` has no kernel for
    /// this layer in the current build, [`NnError::Config`] for layers
    /// with no engine at all.
    fn set_backend_type(&mut self, engine: Backend) -> Result<()> {
        let _ = engine;
        Err(NnError::Config(format!(
            "{} has no configurable engine",
            self.layer_type()
        )))
    }

    /// Switches train/test behavior; a no-op for phase-independent
    /// layers.
    fn set_phase(&mut self, _phase: Phase) {}

    /// Initializes trainable parameters from an explicitly passed RNG.
    ///
    /// Layers without parameters ignore the call. The RNG is owned by
    /// the caller so runs are reproducible without hidden global state.
    fn init_weights(&mut self, _rng: &mut dyn RngCore) {}
}
