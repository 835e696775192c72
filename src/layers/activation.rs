//! Parameterless elementwise activation layers.

use crate::error::Result;
use crate::layer::Layer;
use crate::parallel::zip_for_each;
use crate::tensors::{Batch, Float, Shape3d};

/// Supported activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    ReLU,
    Sigmoid,
    TanH,
}

impl ActivationKind {
    fn apply(self, x: Float) -> Float {
        match self {
            Self::ReLU => x.max(0.0),
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::TanH => x.tanh(),
        }
    }

    /// Derivative expressed in terms of input `x` and output `y`,
    /// whichever the function makes cheap.
    fn derive(self, x: Float, y: Float) -> Float {
        match self {
            Self::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Sigmoid => y * (1.0 - y),
            Self::TanH => 1.0 - y * y,
        }
    }
}

/// Elementwise activation over a flat port of `size` elements.
pub struct Activation {
    kind: ActivationKind,
    size: usize,
    parallelize: bool,
}

impl Activation {
    #[must_use]
    pub fn new(kind: ActivationKind, size: usize) -> Self {
        Self {
            kind,
            size,
            parallelize: true,
        }
    }
}

impl Layer for Activation {
    fn layer_type(&self) -> &'static str {
        match self.kind {
            ActivationKind::ReLU => "relu",
            ActivationKind::Sigmoid => "sigmoid",
            ActivationKind::TanH => "tanh",
        }
    }

    fn in_shape(&self) -> Vec<Shape3d> {
        vec![Shape3d::flat(self.size)]
    }

    fn out_shape(&self) -> Vec<Shape3d> {
        vec![Shape3d::flat(self.size)]
    }

    fn forward_propagation(&mut self, in_data: &[&Batch], out_data: &mut Batch) -> Result<()> {
        let kind = self.kind;
        zip_for_each(self.parallelize, out_data, in_data[0], |out, inp| {
            for (o, &x) in out.iter_mut().zip(inp.iter()) {
                *o = kind.apply(x);
            }
        });
        Ok(())
    }

    fn back_propagation(
        &mut self,
        in_data: &[&Batch],
        out_data: &Batch,
        out_grad: &Batch,
        in_grad: &mut [Batch],
    ) -> Result<()> {
        let kind = self.kind;
        let inputs = in_data[0];
        for (sample, pd) in in_grad[0].iter_mut().enumerate() {
            let (x_row, y_row, d_row) = (&inputs[sample], &out_data[sample], &out_grad[sample]);
            for c in 0..pd.len() {
                pd[c] += d_row[c] * kind.derive(x_row[c], y_row[c]);
            }
        }
        Ok(())
    }

    fn set_parallelize(&mut self, parallelize: bool) {
        self.parallelize = parallelize;
    }

    fn parallelize(&self) -> bool {
        self.parallelize
    }
}
