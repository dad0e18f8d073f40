//! Finite-difference gradients.
//!
//! These recompute, numerically, what [`crate::Engine::run_backwards`] computes
//! analytically. Each call costs one forward evaluation per element, so they are
//! meant for tests on small matrices, never for training.

use crate::{Error, Matrix, Result};

/// Perturbation added to one element at a time.
pub const INCREMENT: f64 = 1e-7;

/// Estimates `d loss[col] / d input[row, col]` for every element of `input`.
///
/// `transform` maps an input batch to a `(1, input.cols())` row of per-sample
/// losses. Column `col` of the loss may only depend on column `col` of the input.
pub fn gradient<F>(input: &Matrix, mut transform: F) -> Result<Matrix>
where
    F: FnMut(&Matrix) -> Result<Matrix>,
{
    let loss1 = transform(input)?;
    check_loss_row(&loss1, input.cols())?;

    let mut result = Matrix::zeros(input.rows(), input.cols());
    for col in 0..input.cols() {
        for row in 0..input.rows() {
            let loss2 = transform(&input.add_increment(row, col, INCREMENT))?;
            check_loss_row(&loss2, input.cols())?;
            result.set(row, col, (loss2.get(col) - loss1.get(col)) / INCREMENT);
        }
    }
    Ok(result)
}

/// Estimates `d total_loss / d weights[row, col]` for every weight.
///
/// The perturbation scheme matches [`gradient`], but since a weight feeds every
/// sample the per-sample losses returned by `transform` are summed. The result
/// therefore matches `delta * input^T` for the layer that owns `weights`.
pub fn weight_gradient<F>(weights: &Matrix, mut transform: F) -> Result<Matrix>
where
    F: FnMut(&Matrix) -> Result<Matrix>,
{
    let loss1 = transform(weights)?;
    check_loss_row(&loss1, loss1.cols())?;
    let total1 = loss1.sum();

    let mut result = Matrix::zeros(weights.rows(), weights.cols());
    for col in 0..weights.cols() {
        for row in 0..weights.rows() {
            let loss2 = transform(&weights.add_increment(row, col, INCREMENT))?;
            check_loss_row(&loss2, loss1.cols())?;
            result.set(row, col, (loss2.sum() - total1) / INCREMENT);
        }
    }
    Ok(result)
}

fn check_loss_row(loss: &Matrix, cols: usize) -> Result<()> {
    if loss.rows() != 1 || loss.cols() != cols {
        return Err(Error::DimensionMismatch(format!(
            "transform must return a 1x{cols} loss row, got {}",
            loss.summary()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::cross_entropy;

    fn one_hot(rows: usize, classes: &[usize]) -> Matrix {
        Matrix::from_coords(rows, classes.len(), |r, c| {
            if classes[c] == r {
                1.0
            } else {
                0.0
            }
        })
    }

    #[test]
    fn cross_entropy_gradient_is_minus_reciprocal_on_true_class() {
        let input = Matrix::from_fn(4, 5, |i| ((i * 13) % 7) as f64 * 0.4 - 1.0).soft_max();
        let expected = one_hot(4, &[0, 3, 1, 1, 2]);

        let result = gradient(&input, |m| cross_entropy(&expected, m)).unwrap();

        input.for_each(|_, _, index, value| {
            let g = result.get(index);
            if expected.get(index) < 0.5 {
                assert!(g.abs() < 0.01, "g={g}");
            } else {
                assert!((g + 1.0 / value).abs() < 0.01, "g={g} value={value}");
            }
        });
    }

    #[test]
    fn softmax_cross_entropy_gradient_is_output_minus_expected() {
        let input = Matrix::from_fn(4, 5, |i| (i as f64 * 0.7).cos());
        let expected = one_hot(4, &[2, 0, 3, 1, 0]);
        let softmax = input.soft_max();

        let result = gradient(&input, |m| cross_entropy(&expected, &m.soft_max())).unwrap();

        result.for_each(|_, _, index, g| {
            let analytic = softmax.get(index) - expected.get(index);
            assert!((g - analytic).abs() < 1e-3, "g={g} analytic={analytic}");
        });
    }

    #[test]
    fn weight_gradient_matches_outer_product() {
        let weights = Matrix::from_fn(5, 4, |i| ((i * 5) % 9) as f64 * 0.25 - 1.0);
        let input = Matrix::from_fn(4, 1, |i| i as f64 * 0.3 - 0.4);
        let expected = one_hot(5, &[3]);

        let output = weights.multiply(&input).unwrap().soft_max();
        let delta = output.subtract(&expected).unwrap();
        let analytic = delta.multiply_transpose(&input).unwrap().with_tolerance(0.01);

        let approximated = weight_gradient(&weights, |w| {
            cross_entropy(&expected, &w.multiply(&input)?.soft_max())
        })
        .unwrap();

        assert!(analytic.approx_eq(&approximated));
    }

    #[test]
    fn rejects_non_row_loss() {
        let input = Matrix::zeros(2, 3);
        let err = gradient(&input, |m| Ok(m.clone())).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch(_)));
    }
}
