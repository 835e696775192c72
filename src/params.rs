//! Static per-operation parameter blocks.
//!
//! A params struct captures everything about an operation that is fixed
//! at layer-construction time: dimensions, bias flag, strides, channel
//! connectivity. Kernels receive a borrowed params block alongside the
//! tensors for one call and keep no state of their own.

use crate::error::{NnError, Result};
use crate::tensors::Shape3d;

/// Static parameters of the fully-connected (affine) operation.
#[derive(Debug, Clone, Copy)]
pub struct FullyParams {
    /// Elements per input sample.
    pub in_size: usize,
    /// Elements per output sample.
    pub out_size: usize,
    /// Whether a bias vector participates.
    pub has_bias: bool,
}

impl FullyParams {
    /// Validates and builds the parameter block.
    ///
    /// # Errors
    /// Returns [`NnError::Config`] when either dimension is zero.
    pub fn new(in_size: usize, out_size: usize, has_bias: bool) -> Result<Self> {
        if in_size == 0 || out_size == 0 {
            return Err(NnError::Config(format!(
                "fully-connected dimensions must be nonzero (got {in_size}x{out_size})"
            )));
        }
        Ok(Self {
            in_size,
            out_size,
            has_bias,
        })
    }

    /// Length of the flat weight buffer, row-major by input index:
    /// `W[c * out_size + i]`.
    #[must_use]
    pub fn weight_len(&self) -> usize {
        self.in_size * self.out_size
    }
}

/// Boolean adjacency mask restricting which (in-channel, out-channel)
/// pairs participate in a convolution-like inner loop.
///
/// An empty table means fully connected: every pair participates.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTable {
    /// Row-major `in_depth x out_depth` mask; empty when fully connected.
    connected: Vec<bool>,
    in_depth: usize,
    out_depth: usize,
}

impl ConnectionTable {
    /// The empty (fully-connected) table.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Builds a table from a row-major mask.
    ///
    /// # Errors
    /// Returns [`NnError::Config`] when the mask length is not
    /// `in_depth * out_depth`.
    pub fn new(mask: Vec<bool>, in_depth: usize, out_depth: usize) -> Result<Self> {
        if mask.len() != in_depth * out_depth {
            return Err(NnError::Config(format!(
                "connection table holds {} entries but {}x{} channels need {}",
                mask.len(),
                in_depth,
                out_depth,
                in_depth * out_depth
            )));
        }
        Ok(Self {
            connected: mask,
            in_depth,
            out_depth,
        })
    }

    /// Whether the `(in_channel, out_channel)` pair participates.
    #[must_use]
    pub fn is_connected(&self, in_channel: usize, out_channel: usize) -> bool {
        if self.connected.is_empty() {
            return true;
        }
        debug_assert!(in_channel < self.in_depth && out_channel < self.out_depth);
        self.connected[in_channel * self.out_depth + out_channel]
    }

    /// `true` when the table carries no mask (fully connected).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
    }
}

/// Static parameters of the 2D convolution operation.
///
/// Valid padding only: `out = (in - window) / stride + 1` per axis.
/// Weights are laid out as one `window x window` filter per
/// `(out_channel, in_channel)` pair, pair index `out * in_depth + in`.
#[derive(Debug, Clone)]
pub struct ConvParams {
    pub in_shape: Shape3d,
    pub out_shape: Shape3d,
    /// Filter geometry; depth is `in_depth * out_depth`.
    pub weight: Shape3d,
    pub has_bias: bool,
    pub w_stride: usize,
    pub h_stride: usize,
    pub tbl: ConnectionTable,
}

impl ConvParams {
    /// Derives output geometry and validates the configuration.
    ///
    /// # Errors
    /// Returns [`NnError::Config`] for zero strides, a window larger than
    /// the input, or a connection table sized for different channel
    /// counts.
    pub fn new(
        in_shape: Shape3d,
        window_width: usize,
        window_height: usize,
        out_depth: usize,
        w_stride: usize,
        h_stride: usize,
        has_bias: bool,
        tbl: ConnectionTable,
    ) -> Result<Self> {
        if w_stride == 0 || h_stride == 0 {
            return Err(NnError::Config("convolution stride must be nonzero".into()));
        }
        if window_width > in_shape.width || window_height > in_shape.height {
            return Err(NnError::Config(format!(
                "convolution window {}x{} exceeds input {}",
                window_width,
                window_height,
                in_shape.describe()
            )));
        }
        if !tbl.is_empty() && (tbl.in_depth != in_shape.depth || tbl.out_depth != out_depth) {
            return Err(NnError::Config(format!(
                "connection table is {}x{} but layer has {}x{} channels",
                tbl.in_depth, tbl.out_depth, in_shape.depth, out_depth
            )));
        }
        let out_shape = Shape3d::new(
            (in_shape.width - window_width) / w_stride + 1,
            (in_shape.height - window_height) / h_stride + 1,
            out_depth,
        );
        Ok(Self {
            in_shape,
            out_shape,
            weight: Shape3d::new(window_width, window_height, in_shape.depth * out_depth),
            has_bias,
            w_stride,
            h_stride,
            tbl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_is_fully_connected() {
        let tbl = ConnectionTable::all();
        assert!(tbl.is_connected(0, 0));
        assert!(tbl.is_connected(7, 3));
    }

    #[test]
    fn table_rejects_bad_dimensions() {
        assert!(ConnectionTable::new(vec![true; 5], 2, 3).is_err());
        let tbl = ConnectionTable::new(vec![true, false, false, true], 2, 2).unwrap();
        assert!(tbl.is_connected(0, 0));
        assert!(!tbl.is_connected(0, 1));
    }

    #[test]
    fn conv_params_derive_output_shape() {
        let p = ConvParams::new(
            Shape3d::new(5, 5, 1),
            3,
            3,
            2,
            1,
            1,
            true,
            ConnectionTable::all(),
        )
        .unwrap();
        assert_eq!(p.out_shape, Shape3d::new(3, 3, 2));
        assert_eq!(p.weight.size(), 3 * 3 * 2);
    }
}
