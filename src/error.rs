//! Error taxonomy for graph assembly and kernel dispatch.
//!
//! Two failure families exist and both are fatal to the call that raised
//! them:
//!
//! - **Configuration errors** (shape mismatch between connected layers,
//!   invalid layer parameters, cyclic graphs) surface at construction or
//!   assembly time, before any propagation runs.
//! - **Unsupported-operation errors** (an engine whose kernel was not
//!   compiled into this build) surface on the first `compute` call that
//!   requests the missing kernel. There is never a silent fallback to
//!   another backend; cross-backend compatibility is a correctness
//!   property, not a performance one.
//!
//! Degenerate quantization ranges (min == max) are *not* errors; they are
//! widened by a small epsilon inside [`crate::quantize`] because constant
//! buffers arise naturally from legitimate data.

use crate::backend::Backend;
use thiserror::Error;

/// Errors produced by layer construction, graph assembly and kernel
/// dispatch.
#[derive(Debug, Error)]
pub enum NnError {
    /// The requested engine has no kernel for this operation in the
    /// current build.
    #[error("engine {engine} has no {op} kernel compiled into this build")]
    UnsupportedBackend {
        /// Operation that was dispatched.
        op: &'static str,
        /// Engine that was requested.
        engine: Backend,
    },

    /// Two connected layers declared incompatible port geometries.
    #[error(
        "shape mismatch: `{from}` produces {from_shape} but `{to}` expects {to_shape}"
    )]
    ShapeMismatch {
        /// Producing layer's type tag.
        from: &'static str,
        /// Producer's declared output shape, rendered `WxHxD`.
        from_shape: String,
        /// Consuming layer's type tag.
        to: &'static str,
        /// Consumer's declared input shape, rendered `WxHxD`.
        to_shape: String,
    },

    /// A layer or graph was configured with invalid static parameters.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The edge set does not admit a topological order.
    #[error("graph contains a cycle through node {0}")]
    Cycle(usize),
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, NnError>;
