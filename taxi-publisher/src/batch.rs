use std::num::NonZeroUsize;

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("batch size must be a positive integer")]
pub struct BatchSizeError;

/// Lazily splits rows into contiguous, non-overlapping windows of `size` items; the
/// last window may be shorter. Cloning a `Batches` over a cloneable iterator gives
/// an independent pass over the same rows.
#[derive(Clone, Debug)]
pub struct Batches<I> {
    rows: I,
    size: NonZeroUsize,
}

/// Rejects a zero `size` up front, before any row is pulled.
pub fn make_batches<T>(
    rows: T,
    size: usize,
) -> Result<Batches<T::IntoIter>, BatchSizeError>
where
    T: IntoIterator,
{
    let size = NonZeroUsize::new(size).ok_or(BatchSizeError)?;
    Ok(Batches::new(rows, size))
}

/// Number of batches `rows` items split into.
pub fn batch_count(rows: usize, size: NonZeroUsize) -> usize {
    rows.div_ceil(size.get())
}

impl<I: Iterator> Batches<I> {
    pub fn new<T: IntoIterator<IntoIter = I>>(rows: T, size: NonZeroUsize) -> Self {
        Self {
            rows: rows.into_iter(),
            size,
        }
    }
}

impl<I: Iterator> Iterator for Batches<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<_> = self.rows.by_ref().take(self.size.get()).collect();
        (!batch.is_empty()).then_some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lower, upper) = self.rows.size_hint();
        (
            batch_count(lower, self.size),
            upper.map(|upper| batch_count(upper, self.size)),
        )
    }
}

impl<I: ExactSizeIterator> ExactSizeIterator for Batches<I> {}
