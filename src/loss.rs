//! Loss functions as external collaborators of the graph.
//!
//! A [`Loss`] never lives inside the network; the training step asks it
//! for a scalar loss and for the gradient of that loss with respect to
//! the sink's output, and that gradient alone seeds the backward pass.

use crate::tensors::{Batch, Float};

/// Scalar loss over a minibatch plus its gradient at the prediction.
pub trait Loss {
    /// Mean loss over the batch.
    fn loss(&self, prediction: &Batch, target: &Batch) -> Float;

    /// Gradient of [`Loss::loss`] with respect to `prediction`, same
    /// batch geometry as `prediction`.
    fn gradient(&self, prediction: &Batch, target: &Batch) -> Batch;
}

/// Mean squared error averaged over every element of the batch.
pub struct Mse;

impl Loss for Mse {
    fn loss(&self, prediction: &Batch, target: &Batch) -> Float {
        let count = (prediction.len() * prediction.first().map_or(0, Vec::len)).max(1);
        let sum: Float = prediction
            .iter()
            .zip(target.iter())
            .flat_map(|(p, t)| p.iter().zip(t.iter()))
            .map(|(&y, &t)| (y - t) * (y - t))
            .sum();
        sum / count as Float
    }

    fn gradient(&self, prediction: &Batch, target: &Batch) -> Batch {
        let count = (prediction.len() * prediction.first().map_or(0, Vec::len)).max(1);
        let scale = 2.0 / count as Float;
        prediction
            .iter()
            .zip(target.iter())
            .map(|(p, t)| {
                p.iter()
                    .zip(t.iter())
                    .map(|(&y, &t)| scale * (y - t))
                    .collect()
            })
            .collect()
    }
}

/// Softmax cross-entropy against one-hot (or soft) targets.
///
/// The softmax is folded into the loss so the gradient is the numerically
/// stable `softmax(y) - t`, averaged over samples.
pub struct CrossEntropy;

fn softmax(row: &[Float]) -> Vec<Float> {
    let max = row.iter().copied().fold(Float::NEG_INFINITY, Float::max);
    let exps: Vec<Float> = row.iter().map(|&v| (v - max).exp()).collect();
    let denom: Float = exps.iter().sum();
    exps.into_iter().map(|e| e / denom).collect()
}

impl Loss for CrossEntropy {
    fn loss(&self, prediction: &Batch, target: &Batch) -> Float {
        let samples = prediction.len().max(1);
        let sum: Float = prediction
            .iter()
            .zip(target.iter())
            .map(|(p, t)| {
                softmax(p)
                    .iter()
                    .zip(t.iter())
                    .map(|(&q, &t)| -t * q.max(Float::MIN_POSITIVE).ln())
                    .sum::<Float>()
            })
            .sum();
        sum / samples as Float
    }

    fn gradient(&self, prediction: &Batch, target: &Batch) -> Batch {
        let samples = prediction.len().max(1);
        let scale = 1.0 / samples as Float;
        prediction
            .iter()
            .zip(target.iter())
            .map(|(p, t)| {
                softmax(p)
                    .iter()
                    .zip(t.iter())
                    .map(|(&q, &t)| scale * (q - t))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mse_matches_closed_form() {
        let pred = vec![vec![1.0, 2.0], vec![0.0, 0.0]];
        let tgt = vec![vec![0.0, 2.0], vec![0.0, -1.0]];
        let l = Mse.loss(&pred, &tgt);
        assert!((l - (1.0 + 0.0 + 0.0 + 1.0) / 4.0).abs() < 1e-6);

        let g = Mse.gradient(&pred, &tgt);
        assert!((g[0][0] - 0.5).abs() < 1e-6);
        assert!((g[1][1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn cross_entropy_gradient_sums_to_zero() {
        // softmax(q) sums to 1 and a one-hot target sums to 1, so the
        // per-sample gradient must sum to zero
        let pred = vec![vec![2.0, -1.0, 0.5]];
        let tgt = vec![vec![0.0, 1.0, 0.0]];
        let g = CrossEntropy.gradient(&pred, &tgt);
        let total: Float = g[0].iter().sum();
        assert!(total.abs() < 1e-6);
        // gradient is negative only at the hot class
        assert!(g[0][1] < 0.0 && g[0][0] > 0.0 && g[0][2] > 0.0);
    }

    #[test]
    fn cross_entropy_prefers_correct_prediction() {
        let tgt = vec![vec![1.0, 0.0]];
        let good = CrossEntropy.loss(&vec![vec![4.0, -4.0]], &tgt);
        let bad = CrossEntropy.loss(&vec![vec![-4.0, 4.0]], &tgt);
        assert!(good < bad);
    }
}
