use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use super::{BatchData, Cursor, Loader, MetaData};
use crate::{Error, Matrix, Result};

/// Generates one labelled batch.
///
/// Each column is a random direction in `input_rows` dimensions scaled to radius
/// `class + 1`, so the class is recoverable from the input's length. `expected`
/// is the matching one-hot column.
pub fn training_batch<R: Rng + ?Sized>(
    rng: &mut R,
    input_rows: usize,
    output_rows: usize,
    cols: usize,
) -> (Matrix, Matrix) {
    let mut input = Matrix::zeros(input_rows, cols);
    let mut expected = Matrix::zeros(output_rows, cols);
    if output_rows == 0 {
        return (input, expected);
    }

    let mut values = vec![0.0_f64; input_rows];
    for col in 0..cols {
        let class = rng.gen_range(0..output_rows);
        let mut norm = 0.0_f64;
        for v in values.iter_mut() {
            *v = rng.sample(StandardNormal);
            norm += *v * *v;
        }
        let scale = (class + 1) as f64 / norm.sqrt().max(f64::MIN_POSITIVE);
        for (row, v) in values.iter().enumerate() {
            input.set(row, col, v * scale);
        }
        expected.set(class, col, 1.0);
    }
    (input, expected)
}

#[derive(Debug)]
struct State {
    cursor: Cursor,
    rng: StdRng,
}

/// A loader over generated data.
///
/// `open` rewinds and reseeds, so every epoch replays the same items.
#[derive(Debug)]
pub struct SyntheticLoader {
    meta: MetaData,
    seed: u64,
    state: Mutex<Option<State>>,
}

impl SyntheticLoader {
    pub fn new(
        number_items: usize,
        batch_size: usize,
        input_size: usize,
        expected_size: usize,
        seed: u64,
    ) -> Result<Self> {
        if batch_size == 0 || input_size == 0 || expected_size == 0 {
            return Err(Error::InvalidConfig(format!(
                "synthetic loader sizes must be > 0 (batch_size={batch_size} \
                 input_size={input_size} expected_size={expected_size})"
            )));
        }
        Ok(Self {
            meta: MetaData::new(input_size, expected_size, number_items, batch_size),
            seed,
            state: Mutex::new(None),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<State>>> {
        self.state
            .lock()
            .map_err(|_| Error::Concurrency("synthetic loader lock poisoned".to_owned()))
    }
}

impl Loader for SyntheticLoader {
    fn open(&self) -> Result<MetaData> {
        let mut state = self.lock()?;
        *state = Some(State {
            cursor: Cursor::new(self.meta),
            rng: StdRng::seed_from_u64(self.seed),
        });
        Ok(self.meta)
    }

    fn read_batch(&self) -> Result<BatchData> {
        let mut guard = self.lock()?;
        let state = guard
            .as_mut()
            .ok_or_else(|| Error::Loader("synthetic loader is not open".to_owned()))?;

        let (batch_index, _, items) = state.cursor.advance()?;
        let (input, expected) = training_batch(
            &mut state.rng,
            self.meta.input_size,
            self.meta.expected_size,
            items,
        );
        Ok(BatchData {
            input,
            expected,
            batch_index,
            items_read: items,
        })
    }

    fn close(&self) -> Result<()> {
        *self.lock()? = None;
        Ok(())
    }

    fn metadata(&self) -> Result<MetaData> {
        self.lock()?
            .as_ref()
            .map(|s| s.cursor.meta)
            .ok_or_else(|| Error::Loader("synthetic loader is not open".to_owned()))
    }
}
