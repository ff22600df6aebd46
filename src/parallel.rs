//! Rayon or sequential execution, selected by the `parallel` feature.
//!
//! With the feature enabled this re-exports rayon's prelude. Without it a
//! sequential stand-in provides `into_par_iter()` so chunk loops read the
//! same either way.

#[cfg(feature = "parallel")]
pub use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
mod sequential {
    /// Sequential stand-in for `rayon::prelude::IntoParallelIterator`.
    pub trait IntoParallelIterator {
        type Iter;
        type Item;
        fn into_par_iter(self) -> Self::Iter;
    }

    impl<I: IntoIterator> IntoParallelIterator for I {
        type Iter = I::IntoIter;
        type Item = I::Item;
        fn into_par_iter(self) -> Self::Iter {
            self.into_iter()
        }
    }
}

#[cfg(not(feature = "parallel"))]
pub use sequential::*;

/// Split `total` rows into contiguous `(start, len)` chunks of at most `chunk_rows`.
pub fn row_chunks(total: usize, chunk_rows: usize) -> Vec<(usize, usize)> {
    let step = chunk_rows.max(1);
    (0..total)
        .step_by(step)
        .map(|start| (start, step.min(total - start)))
        .collect()
}
