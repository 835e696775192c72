//! edgegrad: a lightweight neural-network graph engine in Rust.
//!
//! Designed for embedded/edge-scale model deployment where a small,
//! dependency-light runtime is preferred over a full ML framework. The
//! crate wires gradients by hand through explicit forward/backward kernel
//! pairs instead of building a tape; every layer owns its parameters and
//! the network drives propagation in topological order.
//!
//! # Features
//!
//! - Polymorphic [`layer::Layer`] trait covering dense, convolutional,
//!   max-pooling, activation, dropout and quantized variants.
//! - Per-layer backend dispatch (reference, AVX2, quantized-8-bit) with an
//!   explicit unsupported-engine error instead of silent fallback.
//! - Sequential or DAG composition with fan-out gradient summing.
//! - Numerically explicit 8-bit quantization arithmetic with range
//!   tracking and re-quantization for layer chaining.
//!
//! # Goals
//!
//! - Prioritize correctness, explicitness, and extensibility over
//!   black-box abstraction.
//! - Keep parallelism strictly fork-join and data-parallel, so the
//!   `parallelize` flag changes latency, never numerics.
//! - Provide a solid base for resource-constrained training and inference.
//!
//! # Modules
//!
//! - [`tensors`] — core buffer types, shape descriptors, parameters.
//! - [`kernels`] — stateless numeric kernels (forward/backward pairs).
//! - [`op_kernel`] — engine dispatch binding static params to kernels.
//! - [`layer`] / [`layers`] — the layer abstraction and concrete layers.
//! - [`network`] — graph composition and the training step.
//! - [`quantize`] — fixed-point conversion arithmetic.
//! - [`optimizers`] / [`loss`] — boundary collaborators for training.
//!
//! # Example
//!
//! ```rust
//! use edgegrad::layers::FullyConnected;
//! use edgegrad::backend::Backend;
//! use edgegrad::network::Network;
//!
//! let net = Network::sequential(vec![
//!     Box::new(FullyConnected::new(4, 3, true, Backend::Internal).unwrap()),
//!     Box::new(FullyConnected::new(3, 2, true, Backend::Internal).unwrap()),
//! ]).unwrap();
//! assert_eq!(net.len(), 2);
//! ```

pub mod backend;
pub mod error;
pub mod init;
pub mod kernels;
pub mod layer;
pub mod layers;
pub mod loss;
pub mod network;
pub mod op_kernel;
pub mod optimizers;
pub mod parallel;
pub mod params;
pub mod quantize;
pub mod tensors;

pub use error::{NnError, Result};
pub use tensors::{Batch, Float, Shape3d, Vect};
