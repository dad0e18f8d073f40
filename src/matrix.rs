//! Dense column-major matrix of `f64`.
//!
//! Every batched computation in the crate is expressed over [`Matrix`]:
//!
//! - each *column* is one sample of a batch
//! - each *row* is one feature / neuron output
//!
//! Storage is column-major: element `(row, col)` lives at linear index
//! `col * rows + row`. Closures that receive an `index` receive this linear index,
//! and [`Matrix::for_each`] visits elements in exactly this order (down each column,
//! column by column).

use std::fmt;

use crate::matmul::{gemm_f64, Strides};
use crate::{Error, Result};

/// Default tolerance used by [`Matrix::approx_eq`].
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    /// Column-major, `rows * cols` values.
    data: Vec<f64>,
    tolerance: f64,
}

impl Matrix {
    /// A `(rows, cols)` matrix of zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Builds a matrix from `f(index)` where `index` is the column-major linear index.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> Self
    where
        F: FnMut(usize) -> f64,
    {
        let data = (0..rows * cols).map(&mut f).collect();
        Self {
            rows,
            cols,
            data,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Builds a matrix from `f(row, col)`.
    pub fn from_coords<F>(rows: usize, cols: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> f64,
    {
        let mut data = Vec::with_capacity(rows * cols);
        for col in 0..cols {
            for row in 0..rows {
                data.push(f(row, col));
            }
        }
        Self {
            rows,
            cols,
            data,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Wraps a column-major buffer.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::DimensionMismatch(format!(
                "buffer length {} does not match {rows}x{cols}",
                data.len()
            )));
        }
        Ok(Self {
            rows,
            cols,
            data,
            tolerance: DEFAULT_TOLERANCE,
        })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The column-major backing buffer.
    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Value at a column-major linear index.
    ///
    /// Panics if `index >= len`.
    #[inline]
    pub fn get(&self, index: usize) -> f64 {
        self.data[index]
    }

    /// Value at `(row, col)`.
    ///
    /// Panics if out of bounds.
    #[inline]
    pub fn at(&self, row: usize, col: usize) -> f64 {
        assert!(row < self.rows && col < self.cols, "({row}, {col}) out of bounds");
        self.data[col * self.rows + row]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        assert!(row < self.rows && col < self.cols, "({row}, {col}) out of bounds");
        self.data[col * self.rows + row] = value;
    }

    #[inline]
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    #[inline]
    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance;
    }

    #[inline]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    #[inline]
    fn shape(&self) -> String {
        format!("{}x{}", self.rows, self.cols)
    }

    fn check_same_shape(&self, other: &Matrix, op: &str) -> Result<()> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(Error::DimensionMismatch(format!(
                "{op}: {} vs {}",
                self.shape(),
                other.shape()
            )));
        }
        Ok(())
    }

    fn product(
        &self,
        other: &Matrix,
        (m, k, sa): (usize, usize, Strides),
        (k2, n, sb): (usize, usize, Strides),
        op: &str,
    ) -> Result<Matrix> {
        if k != k2 {
            return Err(Error::DimensionMismatch(format!(
                "{op}: inner dimensions differ ({}x{} * {}x{})",
                m, k, k2, n
            )));
        }
        let mut out = Matrix::zeros(m, n);
        gemm_f64(
            m,
            n,
            k,
            &self.data,
            sa,
            &other.data,
            sb,
            &mut out.data,
            Strides::col_major(m),
        );
        Ok(out)
    }

    /// Matrix product `self * other`.
    pub fn multiply(&self, other: &Matrix) -> Result<Matrix> {
        self.product(
            other,
            (self.rows, self.cols, Strides::col_major(self.rows)),
            (other.rows, other.cols, Strides::col_major(other.rows)),
            "multiply",
        )
    }

    /// `self^T * other` without materializing the transpose.
    pub fn transpose_multiply(&self, other: &Matrix) -> Result<Matrix> {
        self.product(
            other,
            (self.cols, self.rows, Strides::col_major_transposed(self.rows)),
            (other.rows, other.cols, Strides::col_major(other.rows)),
            "transpose_multiply",
        )
    }

    /// `self * other^T` without materializing the transpose.
    pub fn multiply_transpose(&self, other: &Matrix) -> Result<Matrix> {
        self.product(
            other,
            (self.rows, self.cols, Strides::col_major(self.rows)),
            (other.cols, other.rows, Strides::col_major_transposed(other.rows)),
            "multiply_transpose",
        )
    }

    pub fn transpose(&self) -> Matrix {
        Matrix::from_coords(self.cols, self.rows, |row, col| self.at(col, row))
            .with_tolerance(self.tolerance)
    }

    /// Elementwise map over `(index, value)`, returning a new matrix.
    pub fn apply<F>(&self, mut f: F) -> Matrix
    where
        F: FnMut(usize, f64) -> f64,
    {
        let data = self.data.iter().enumerate().map(|(i, &v)| f(i, v)).collect();
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data,
            tolerance: self.tolerance,
        }
    }

    /// Elementwise map over values, returning a new matrix.
    pub fn map<F>(&self, mut f: F) -> Matrix
    where
        F: FnMut(f64) -> f64,
    {
        self.apply(|_, v| f(v))
    }

    /// In-place elementwise update over `(row, col, value)`.
    pub fn modify<F>(mut self, mut f: F) -> Matrix
    where
        F: FnMut(usize, usize, f64) -> f64,
    {
        let rows = self.rows;
        for (i, v) in self.data.iter_mut().enumerate() {
            *v = f(i % rows, i / rows, *v);
        }
        self
    }

    /// In-place elementwise update over values.
    pub fn modify_values<F>(mut self, mut f: F) -> Matrix
    where
        F: FnMut(f64) -> f64,
    {
        for v in &mut self.data {
            *v = f(*v);
        }
        self
    }

    /// Elementwise combination of two matrices of the same shape.
    pub fn zip_with<F>(&self, other: &Matrix, mut f: F) -> Result<Matrix>
    where
        F: FnMut(f64, f64) -> f64,
    {
        self.check_same_shape(other, "zip_with")?;
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data,
            tolerance: self.tolerance,
        })
    }

    /// Elementwise `self - other`.
    pub fn subtract(&self, other: &Matrix) -> Result<Matrix> {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn scale(&self, factor: f64) -> Matrix {
        self.map(|v| v * factor)
    }

    /// Softmax over each column independently.
    ///
    /// The column max is subtracted before exponentiating, so large scores
    /// never overflow and every output stays strictly positive.
    pub fn soft_max(&self) -> Matrix {
        let mut out = self.clone();
        if self.rows == 0 {
            return out;
        }
        for column in out.data.chunks_mut(self.rows) {
            let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mut sum = 0.0;
            for v in column.iter_mut() {
                *v = (*v - max).exp();
                sum += *v;
            }
            let inv_sum = 1.0 / sum;
            for v in column.iter_mut() {
                *v *= inv_sum;
            }
        }
        out
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Sums each column, returning a `(1, cols)` row vector.
    pub fn sum_columns(&self) -> Matrix {
        let data = if self.rows == 0 {
            vec![0.0; self.cols]
        } else {
            self.data.chunks(self.rows).map(|c| c.iter().sum()).collect()
        };
        Matrix {
            rows: 1,
            cols: self.cols,
            data,
            tolerance: self.tolerance,
        }
    }

    /// Mean of each row across columns, returning a `(rows, 1)` column vector.
    pub fn average_columns(&self) -> Matrix {
        let mut out = Matrix::zeros(self.rows, 1).with_tolerance(self.tolerance);
        if self.cols == 0 {
            return out;
        }
        for column in self.data.chunks(self.rows.max(1)) {
            for (acc, &v) in out.data.iter_mut().zip(column) {
                *acc += v;
            }
        }
        let inv_cols = 1.0 / self.cols as f64;
        for v in &mut out.data {
            *v *= inv_cols;
        }
        out
    }

    /// Row index of the largest value in each column.
    ///
    /// Ties resolve to the lowest row.
    pub fn argmax_columns(&self) -> Vec<usize> {
        if self.rows == 0 {
            return vec![0; self.cols];
        }
        self.data
            .chunks(self.rows)
            .map(|column| {
                let mut best = 0;
                for (row, &v) in column.iter().enumerate().skip(1) {
                    if v > column[best] {
                        best = row;
                    }
                }
                best
            })
            .collect()
    }

    /// Copy of `self` with element `(row, col)` incremented by `delta`.
    pub fn add_increment(&self, row: usize, col: usize, delta: f64) -> Matrix {
        let mut out = self.clone();
        let index = col * self.rows + row;
        out.data[index] += delta;
        out
    }

    /// True if shapes match and every element differs by at most `self.tolerance()`.
    pub fn approx_eq(&self, other: &Matrix) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).abs() <= self.tolerance)
    }

    /// Visits every element as `(row, col, index, value)` in storage order.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(usize, usize, usize, f64),
    {
        let rows = self.rows;
        for (i, &v) in self.data.iter().enumerate() {
            f(i % rows, i / rows, i, v);
        }
    }

    /// One-line shape summary, e.g. `8x5 matrix`.
    pub fn summary(&self) -> String {
        format!("{} matrix", self.shape())
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.rows {
            for col in 0..self.cols {
                if col > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{:+12.5}", self.at(row, col))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
