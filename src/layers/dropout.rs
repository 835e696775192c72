//! Dropout layer with phase-dependent behavior.

use crate::error::{NnError, Result};
use crate::layer::{Layer, Phase};
use crate::tensors::{Batch, Float, Shape3d};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Randomly zeroes activations at train time.
///
/// At train phase each element is kept with probability `1 - ratio` and
/// the mask is retained for backward (gradient flows only through kept
/// positions). At test phase the output is the input scaled by
/// `1 - ratio`. The phase is consulted on every forward call.
///
/// The mask RNG is owned by the layer and seeded by the caller, so runs
/// are reproducible without process-global RNG state.
pub struct Dropout {
    size: usize,
    ratio: Float,
    phase: Phase,
    mask: Vec<Vec<bool>>,
    rng: StdRng,
    parallelize: bool,
}

impl Dropout {
    /// Builds a dropout layer over a flat port of `size` elements.
    ///
    /// # Errors
    /// [`NnError::Config`] when `ratio` is outside `[0, 1)`.
    pub fn new(size: usize, ratio: Float, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&ratio) {
            return Err(NnError::Config(format!(
                "dropout ratio must be in [0, 1), got {ratio}"
            )));
        }
        Ok(Self {
            size,
            ratio,
            phase: Phase::Train,
            mask: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            parallelize: false,
        })
    }
}

impl Layer for Dropout {
    fn layer_type(&self) -> &'static str {
        "dropout"
    }

    fn in_shape(&self) -> Vec<Shape3d> {
        vec![Shape3d::flat(self.size)]
    }

    fn out_shape(&self) -> Vec<Shape3d> {
        vec![Shape3d::flat(self.size)]
    }

    fn forward_propagation(&mut self, in_data: &[&Batch], out_data: &mut Batch) -> Result<()> {
        let inputs = in_data[0];
        match self.phase {
            Phase::Train => {
                self.mask.resize_with(inputs.len(), Vec::new);
                for (sample, inp) in inputs.iter().enumerate() {
                    let mask = &mut self.mask[sample];
                    mask.clear();
                    mask.extend(inp.iter().map(|_| self.rng.random::<Float>() >= self.ratio));
                    for (o, (&x, &keep)) in
                        out_data[sample].iter_mut().zip(inp.iter().zip(mask.iter()))
                    {
                        *o = if keep { x } else { 0.0 };
                    }
                }
            }
            Phase::Test => {
                let scale = 1.0 - self.ratio;
                for (out, inp) in out_data.iter_mut().zip(inputs.iter()) {
                    for (o, &x) in out.iter_mut().zip(inp.iter()) {
                        *o = x * scale;
                    }
                }
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
        for (sample, pd) in in_grad[0].iter_mut().enumerate() {
            let mask = &self.mask[sample];
            for (c, g) in pd.iter_mut().enumerate() {
                if mask[c] {
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

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    fn init_weights(&mut self, _rng: &mut dyn RngCore) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_scales_output() {
        let mut layer = Dropout::new(4, 0.25, 42).unwrap();
        layer.set_phase(Phase::Test);
        let input = vec![vec![1.0, 2.0, 3.0, 4.0]];
        let mut out = vec![vec![0.0; 4]];
        layer.forward_propagation(&[&input], &mut out).unwrap();
        assert_eq!(out[0], vec![0.75, 1.5, 2.25, 3.0]);
    }

    #[test]
    fn train_gradient_respects_mask() {
        let mut layer = Dropout::new(64, 0.5, 7).unwrap();
        let input = vec![vec![1.0; 64]];
        let mut out = vec![vec![0.0; 64]];
        layer.forward_propagation(&[&input], &mut out).unwrap();

        let grad_out = vec![vec![1.0; 64]];
        let mut grad_in = vec![vec![vec![0.0; 64]]];
        layer
            .back_propagation(&[&input], &out, &grad_out, &mut grad_in)
            .unwrap();
        for (y, g) in out[0].iter().zip(grad_in[0][0].iter()) {
            // gradient flows exactly where the activation survived
            assert_eq!(*y != 0.0, *g != 0.0);
        }
    }
}
