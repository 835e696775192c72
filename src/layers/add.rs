//! Elementwise addition over two input ports.

use crate::error::Result;
use crate::layer::Layer;
use crate::tensors::{Batch, Shape3d};

/// Sums two equally shaped inputs, `out = a + b`.
///
/// The gradient of addition is identity, so backward accumulates the
/// downstream gradient into both input-gradient ports unchanged. This is
/// the simplest layer with more than one input port and makes DAG fan-in
/// expressible.
pub struct ElementwiseAdd {
    size: usize,
    parallelize: bool,
}

impl ElementwiseAdd {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            parallelize: false,
        }
    }
}

impl Layer for ElementwiseAdd {
    fn layer_type(&self) -> &'static str {
        "elementwise-add"
    }

    fn in_shape(&self) -> Vec<Shape3d> {
        vec![Shape3d::flat(self.size); 2]
    }

    fn out_shape(&self) -> Vec<Shape3d> {
        vec![Shape3d::flat(self.size)]
    }

    fn forward_propagation(&mut self, in_data: &[&Batch], out_data: &mut Batch) -> Result<()> {
        let (a, b) = (in_data[0], in_data[1]);
        for (sample, out) in out_data.iter_mut().enumerate() {
            for (c, o) in out.iter_mut().enumerate() {
                *o = a[sample][c] + b[sample][c];
            }
        }
        Ok(())
    }

    fn back_propagation(
        &mut self,
        _in_data: &[&Batch],
        _out_data: &Batch,
        out_grad: &Batch,
        in_grad: &mut [Batch],
    ) -> Result<()> {
        for port in in_grad.iter_mut() {
            for (sample, pd) in port.iter_mut().enumerate() {
                for (c, g) in pd.iter_mut().enumerate() {
                    *g += out_grad[sample][c];
                }
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
