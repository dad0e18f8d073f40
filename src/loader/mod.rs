//! Batch loaders.
//!
//! A [`Loader`] hands out sequential, non-overlapping batches of a dataset as
//! `(input, expected)` matrix pairs, one sample per column. Loaders are shared by
//! training workers, so every method takes `&self` and implementations serialize
//! their cursor internally.

mod idx;
mod synthetic;

pub use idx::IdxLoader;
pub use synthetic::{training_batch, SyntheticLoader};

use crate::{Error, Matrix, Result};

/// Shape and size of a dataset, as known after `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetaData {
    /// Rows of every input matrix.
    pub input_size: usize,
    /// Rows of every expected matrix (number of classes).
    pub expected_size: usize,
    pub number_items: usize,
    pub batch_size: usize,
    pub number_batches: usize,
    /// Items returned by the most recent `read_batch` call.
    pub items_read: usize,
}

impl MetaData {
    pub(crate) fn new(
        input_size: usize,
        expected_size: usize,
        number_items: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            input_size,
            expected_size,
            number_items,
            batch_size,
            number_batches: number_items.div_ceil(batch_size.max(1)),
            items_read: 0,
        }
    }
}

/// One batch of a dataset.
#[derive(Debug, Clone)]
pub struct BatchData {
    /// `(input_size, items_read)`.
    pub input: Matrix,
    /// `(expected_size, items_read)`, one-hot per column.
    pub expected: Matrix,
    /// Position of this batch in the dataset, starting at 0.
    pub batch_index: usize,
    /// Equal to the batch size except possibly for the last batch.
    pub items_read: usize,
}

pub trait Loader: Send + Sync {
    /// Opens (or rewinds) the dataset.
    fn open(&self) -> Result<MetaData>;

    /// Returns the next batch. Blocks while another caller is reading.
    ///
    /// Fails once every batch has been handed out, or if the loader is closed.
    fn read_batch(&self) -> Result<BatchData>;

    /// Releases the backing resource.
    fn close(&self) -> Result<()>;

    /// The metadata of the open dataset.
    fn metadata(&self) -> Result<MetaData>;
}

/// Bookkeeping shared by loader implementations.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cursor {
    pub meta: MetaData,
    pub next_item: usize,
    pub next_batch: usize,
}

impl Cursor {
    pub(crate) fn new(meta: MetaData) -> Self {
        Self {
            meta,
            next_item: 0,
            next_batch: 0,
        }
    }

    /// Claims the next slice, returning `(batch_index, first_item, items)`.
    pub(crate) fn advance(&mut self) -> Result<(usize, usize, usize)> {
        if self.next_item >= self.meta.number_items {
            return Err(Error::Loader(format!(
                "all {} batches have been read",
                self.meta.number_batches
            )));
        }
        let items = self
            .meta
            .batch_size
            .min(self.meta.number_items - self.next_item);
        let claimed = (self.next_batch, self.next_item, items);
        self.next_item += items;
        self.next_batch += 1;
        self.meta.items_read = items;
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_hands_out_a_short_last_batch() {
        let mut cursor = Cursor::new(MetaData::new(1, 1, 100, 32));
        assert_eq!(cursor.meta.number_batches, 4);

        let sizes: Vec<_> = (0..4).map(|_| cursor.advance().unwrap().2).collect();
        assert_eq!(sizes, vec![32, 32, 32, 4]);
        assert_eq!(cursor.meta.items_read, 4);
        assert!(cursor.advance().is_err());
    }
}
