use rand::Rng;
use rand_distr::StandardNormal;

use crate::{Error, Matrix, Result};

/// A fully connected layer: `y = W x + b`, applied to every column of a batch.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    /// Shape `(out_dim, in_dim)`.
    weights: Matrix,
    /// Shape `(out_dim, 1)`, broadcast across batch columns.
    biases: Matrix,
}

impl DenseLayer {
    /// Initializes weights from `scale * N(0, 1)` and biases to zero.
    pub fn new_with_rng<R: Rng + ?Sized>(
        in_dim: usize,
        out_dim: usize,
        scale: f64,
        rng: &mut R,
    ) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "dense layer dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }
        if !scale.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "initial weight scale must be finite, got {scale}"
            )));
        }

        let weights = Matrix::from_fn(out_dim, in_dim, |_| {
            let z: f64 = rng.sample(StandardNormal);
            scale * z
        });
        let biases = Matrix::zeros(out_dim, 1);
        Ok(Self { weights, biases })
    }

    /// Builds a layer from explicit parameters.
    pub fn from_parts(weights: Matrix, biases: Matrix) -> Result<Self> {
        if weights.rows() == 0 || weights.cols() == 0 {
            return Err(Error::DimensionMismatch(format!(
                "dense weights must be non-empty, got {}",
                weights.summary()
            )));
        }
        if biases.rows() != weights.rows() || biases.cols() != 1 {
            return Err(Error::DimensionMismatch(format!(
                "biases {} do not match weights {} (expected {}x1)",
                biases.summary(),
                weights.summary(),
                weights.rows()
            )));
        }
        Ok(Self { weights, biases })
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.weights.cols()
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.weights.rows()
    }

    #[inline]
    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    #[inline]
    pub fn biases(&self) -> &Matrix {
        &self.biases
    }

    /// Replaces the weights, keeping the shape.
    pub fn set_weights(&mut self, weights: Matrix) -> Result<()> {
        if weights.rows() != self.weights.rows() || weights.cols() != self.weights.cols() {
            return Err(Error::DimensionMismatch(format!(
                "replacement weights {} do not match {}",
                weights.summary(),
                self.weights.summary()
            )));
        }
        self.weights = weights;
        Ok(())
    }

    /// Replaces the biases, keeping the shape.
    pub fn set_biases(&mut self, biases: Matrix) -> Result<()> {
        if biases.rows() != self.biases.rows() || biases.cols() != 1 {
            return Err(Error::DimensionMismatch(format!(
                "replacement biases {} do not match {}",
                biases.summary(),
                self.biases.summary()
            )));
        }
        self.biases = biases;
        Ok(())
    }

    /// Computes `W * input + b` for a `(in_dim, batch)` input.
    pub fn forward(&self, input: &Matrix) -> Result<Matrix> {
        if input.rows() != self.in_dim() {
            return Err(Error::DimensionMismatch(format!(
                "dense layer expects {} input rows, got {}",
                self.in_dim(),
                input.rows()
            )));
        }
        let biases = &self.biases;
        Ok(self
            .weights
            .multiply(input)?
            .modify(|row, _, v| v + biases.get(row)))
    }

    /// Propagates a `(out_dim, batch)` error back to the layer input: `W^T * error`.
    pub fn backward(&self, error: &Matrix) -> Result<Matrix> {
        self.weights.transpose_multiply(error)
    }

    /// Gradient descent step from a layer delta and the input the layer saw.
    ///
    /// Both parameter gradients are averaged over the batch columns:
    /// - `W -= lr * (delta * input^T) / batch`
    /// - `b -= lr * mean_cols(delta)`
    pub fn sgd_step(&mut self, delta: &Matrix, input: &Matrix, lr: f64) -> Result<()> {
        if delta.rows() != self.out_dim() || delta.cols() != input.cols() {
            return Err(Error::DimensionMismatch(format!(
                "delta {} does not match layer out_dim {} and input {}",
                delta.summary(),
                self.out_dim(),
                input.summary()
            )));
        }
        let batch = delta.cols();
        if batch == 0 {
            return Ok(());
        }

        let weight_grad = delta.multiply_transpose(input)?;
        let step = lr / batch as f64;
        self.weights = self.weights.zip_with(&weight_grad, |w, g| w - step * g)?;

        let bias_grad = delta.average_columns();
        self.biases = self.biases.zip_with(&bias_grad, |b, g| b - lr * g)?;
        Ok(())
    }
}
