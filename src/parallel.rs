//! Fork-join helpers for data-parallel kernel loops.
//!
//! Parallelism in this crate is strictly fork-join over independent batch
//! samples: a kernel call either runs its outer loop on the calling
//! thread or splits it across the rayon pool and waits for every worker
//! before returning. Nothing here suspends, blocks on I/O, or cancels.
//!
//! # Disjoint-write contract
//!
//! Every helper in this module partitions work so that **no two workers
//! ever write to the same element**:
//!
//! - [`for_each_sample`] and [`zip_for_each`] hand each worker exactly one
//!   `&mut` row (per-sample slices never overlap).
//! - [`for_each_indexed`] hands each worker one `&mut` element.
//! - [`accumulate_samples`] gives workers private partial buffers and
//!   merges them on the calling thread *in sample order*, so enabling
//!   parallelism never reorders floating-point accumulation.
//!
//! Callers rely on this partitioning instead of locks; a change that lets
//! write ranges overlap is a correctness bug, not a tuning choice.

use rayon::prelude::*;

/// Runs `f(index, &mut item)` for every item, parallel when asked.
///
/// Each invocation owns its element exclusively (see module docs).
pub fn for_each_sample<T, F>(parallelize: bool, items: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync,
{
    if parallelize {
        items
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, item)| f(i, item));
    } else {
        for (i, item) in items.iter_mut().enumerate() {
            f(i, item);
        }
    }
}

/// Runs `f(&mut out_row, &in_row)` over paired rows of two batches.
///
/// # Panics
/// Panics if the two slices differ in length.
pub fn zip_for_each<T, U, F>(parallelize: bool, outs: &mut [T], ins: &[U], f: F)
where
    T: Send,
    U: Sync,
    F: Fn(&mut T, &U) + Sync,
{
    assert_eq!(outs.len(), ins.len(), "batch length mismatch");
    if parallelize {
        outs.par_iter_mut()
            .zip(ins.par_iter())
            .for_each(|(o, i)| f(o, i));
    } else {
        for (o, i) in outs.iter_mut().zip(ins.iter()) {
            f(o, i);
        }
    }
}

/// Elementwise variant of [`for_each_sample`]: each worker owns one
/// scalar slot.
pub fn for_each_indexed<T, F>(parallelize: bool, items: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync,
{
    for_each_sample(parallelize, items, f);
}

/// Computes one partial result per sample and merges them in index order.
///
/// The merge always happens on the calling thread, `0..samples` in
/// ascending order, so the result is bit-identical whether or not the
/// work was parallelized. Used for parameter-gradient accumulation where
/// samples would otherwise race on a shared `dW`/`db` buffer.
pub fn accumulate_samples<R, P, M>(parallelize: bool, samples: usize, per_sample: P, mut merge: M)
where
    R: Send,
    P: Fn(usize) -> R + Sync,
    M: FnMut(R),
{
    if parallelize && samples > 1 {
        let partials: Vec<R> = (0..samples).into_par_iter().map(&per_sample).collect();
        for partial in partials {
            merge(partial);
        }
    } else {
        for sample in 0..samples {
            merge(per_sample(sample));
        }
    }
}
