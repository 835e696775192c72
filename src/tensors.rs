//! Core buffer types, shape descriptors and trainable parameters.
//!
//! # Data Model
//!
//! Two tensor roles flow through the graph:
//!
//! - [`Vect`] — a flat per-sample vector of scalars.
//! - [`Batch`] — a minibatch, one `Vect` per sample. Every sample in a
//!   batch has identical length for a given tensor role.
//!
//! A [`Shape3d`] describes one port of a layer as `(width, height,
//! depth)`; flat layers use `(n, 1, 1)`. [`Parameter`] pairs an owned
//! value buffer with a gradient accumulator of identical length, the same
//! value/grad pairing the rest of the crate relies on for in-place
//! updates.
//!
//! ## Design Highlights
//! - Buffers are plain `Vec<Float>`; no hidden strides, row-major only.
//! - Tensors at graph edges are produced once by the upstream layer and
//!   consumed read-only downstream; gradients flowing the other way are
//!   summed by the graph, never shared mutable.
//!
//! ## Limitations
//! - No broadcasting, slicing, or shape inference.

/// Scalar element type used by every kernel.
pub type Float = f32;

/// Flat per-sample vector.
pub type Vect = Vec<Float>;

/// Minibatch of per-sample vectors.
pub type Batch = Vec<Vect>;

/// Geometry of one layer port: `(width, height, depth)`.
///
/// The element count is `width * height * depth`. Flat (non-spatial)
/// ports use [`Shape3d::flat`], which sets height and depth to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape3d {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Shape3d {
    /// Creates a shape from explicit spatial dimensions.
    #[must_use]
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Creates a flat shape of `n` elements.
    #[must_use]
    pub fn flat(n: usize) -> Self {
        Self::new(n, 1, 1)
    }

    /// Total element count of the port.
    #[must_use]
    pub fn size(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// Row-major index of `(x, y, channel)` within a buffer of this shape.
    ///
    /// # Panics
    /// Panics in debug builds if the coordinate is out of range.
    #[must_use]
    pub fn index(&self, x: usize, y: usize, channel: usize) -> usize {
        debug_assert!(x < self.width && y < self.height && channel < self.depth);
        (channel * self.height + y) * self.width + x
    }

    /// Renders the shape as `WxHxD` for diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// A named, owned trainable buffer plus its gradient accumulator.
///
/// Created at layer-construction time, sized from the layer's static
/// dimensions. The gradient is accumulated (`+=`) during backward passes
/// and consumed by the optimizer; [`Parameter::zero_grad`] resets it at
/// the start of each backward pass.
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Role tag, e.g. `"weight"` or `"bias"`. Exposed for external
    /// serializers.
    pub name: &'static str,
    /// Current value.
    pub value: Vect,
    /// Gradient accumulator, always the same length as `value`.
    pub grad: Vect,
}

impl Parameter {
    /// Creates a zero-initialized parameter of `len` elements.
    #[must_use]
    pub fn zeros(name: &'static str, len: usize) -> Self {
        Self {
            name,
            value: vec![0.0; len],
            grad: vec![0.0; len],
        }
    }

    /// Number of scalar elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// `true` when the parameter holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Resets the gradient accumulator to zero.
    pub fn zero_grad(&mut self) {
        for g in &mut self.grad {
            *g = 0.0;
        }
    }
}

/// Resizes `batch` to `samples` rows of `len` zeros each.
///
/// Reuses existing row allocations where possible so repeated minibatches
/// of the same geometry do not reallocate.
pub fn resize_batch(batch: &mut Batch, samples: usize, len: usize) {
    batch.resize_with(samples, || vec![0.0; len]);
    for row in batch.iter_mut() {
        if row.len() != len {
            row.resize(len, 0.0);
        }
        for v in row.iter_mut() {
            *v = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_size_and_index() {
        let s = Shape3d::new(4, 3, 2);
        assert_eq!(s.size(), 24);
        assert_eq!(s.index(0, 0, 0), 0);
        assert_eq!(s.index(3, 2, 1), 23);
        assert_eq!(s.index(1, 0, 1), 13);
    }

    #[test]
    fn test_parameter_zero_grad() {
        let mut p = Parameter::zeros("weight", 3);
        p.grad.copy_from_slice(&[1.0, 2.0, 3.0]);
        p.zero_grad();
        assert_eq!(p.grad, vec![0.0; 3]);
    }

    #[test]
    fn test_resize_batch_reuses_rows() {
        let mut b: Batch = vec![vec![1.0, 2.0]];
        resize_batch(&mut b, 2, 3);
        assert_eq!(b.len(), 2);
        assert!(b.iter().all(|r| r.len() == 3 && r.iter().all(|&v| v == 0.0)));
    }
}
