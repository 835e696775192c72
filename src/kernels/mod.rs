//! Stateless numeric kernels.
//!
//! Every kernel is a free function computing the forward or backward math
//! of one operation against raw buffers. Kernels exist in interchangeable
//! variants (reference "internal", AVX2, quantized-8-bit) that all honor
//! the same input/output contract:
//!
//! - forward overwrites the output buffer;
//! - backward **accumulates** (`+=`) into `prev_delta`, `dW` and `db`,
//!   because a layer's output may feed multiple downstream consumers and
//!   the graph sums their contributions. Callers zero gradient buffers
//!   once per pass and rely on accumulation thereafter.
//!
//! Variant selection happens one level up, in [`crate::op_kernel`].

pub mod conv2d;
pub mod fully_connected;
#[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
pub mod fully_connected_avx;
pub mod quantized_fully_connected;
