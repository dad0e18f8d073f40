//! Loss functions.
//!
//! Losses are computed per sample: the result of [`LossFunction::per_sample`] is a
//! `(1, batch)` row with one loss value per column.

use crate::{Error, Matrix, Result};

/// Supported loss functions.
///
/// Cross-entropy is the only loss, and backprop requires it to follow a final
/// softmax stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LossFunction {
    #[default]
    CrossEntropy,
}

impl LossFunction {
    /// Per-sample loss as a `(1, batch)` row.
    pub fn per_sample(self, expected: &Matrix, actual: &Matrix) -> Result<Matrix> {
        match self {
            LossFunction::CrossEntropy => cross_entropy(expected, actual),
        }
    }

    /// Mean per-sample loss over the batch columns.
    pub fn mean(self, expected: &Matrix, actual: &Matrix) -> Result<f64> {
        let per_sample = self.per_sample(expected, actual)?;
        if per_sample.cols() == 0 {
            return Ok(0.0);
        }
        Ok(per_sample.sum() / per_sample.cols() as f64)
    }
}

/// Cross-entropy `-sum_rows(expected * ln(actual))` for each column.
///
/// `actual` must be strictly positive wherever `expected` is nonzero, otherwise the
/// loss for that column is infinite. Entries with `expected == 0` contribute nothing,
/// so a zero probability on a wrong class is fine.
pub fn cross_entropy(expected: &Matrix, actual: &Matrix) -> Result<Matrix> {
    if expected.rows() != actual.rows() || expected.cols() != actual.cols() {
        return Err(Error::DimensionMismatch(format!(
            "cross entropy: expected {} vs actual {}",
            expected.summary(),
            actual.summary()
        )));
    }
    Ok(actual
        .apply(|index, value| {
            let t = expected.get(index);
            if t == 0.0 {
                0.0
            } else {
                -t * value.ln()
            }
        })
        .sum_columns())
}
