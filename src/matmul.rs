//! Strided GEMM used by every matrix product in the crate.
//!
//! Strides let callers multiply by a transposed operand without materializing it:
//! a column-major `(rows, cols)` matrix has row stride `1` and column stride `rows`,
//! and its transpose is the same buffer read with the strides swapped.
//!
//! - default: a plain triple loop
//! - optional: the `matrixmultiply` backend via the `matrixmultiply` feature

/// Row/column strides of one GEMM operand.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Strides {
    pub row: usize,
    pub col: usize,
}

impl Strides {
    /// Strides of a column-major buffer with `rows` rows.
    #[inline]
    pub(crate) fn col_major(rows: usize) -> Self {
        Self { row: 1, col: rows }
    }

    /// Strides of the transpose of a column-major buffer with `rows` rows.
    #[inline]
    pub(crate) fn col_major_transposed(rows: usize) -> Self {
        Self { row: rows, col: 1 }
    }
}

/// Computes `c = a * b` where `a` is `(m, k)`, `b` is `(k, n)` and `c` is `(m, n)`.
///
/// `c` is overwritten.
#[allow(clippy::too_many_arguments)]
#[inline]
pub(crate) fn gemm_f64(
    m: usize,
    n: usize,
    k: usize,
    a: &[f64],
    sa: Strides,
    b: &[f64],
    sb: Strides,
    c: &mut [f64],
    sc: Strides,
) {
    if m == 0 || n == 0 {
        return;
    }
    if k == 0 {
        c.fill(0.0);
        return;
    }
    debug_assert!(a.len() >= m * k);
    debug_assert!(b.len() >= k * n);
    debug_assert!(c.len() >= m * n);

    #[cfg(feature = "matrixmultiply")]
    {
        // matrixmultiply supports arbitrary strides.
        unsafe {
            matrixmultiply::dgemm(
                m,
                k,
                n,
                1.0,
                a.as_ptr(),
                sa.row as isize,
                sa.col as isize,
                b.as_ptr(),
                sb.row as isize,
                sb.col as isize,
                0.0,
                c.as_mut_ptr(),
                sc.row as isize,
                sc.col as isize,
            );
        }
    }

    #[cfg(not(feature = "matrixmultiply"))]
    for j in 0..n {
        let b0 = j * sb.col;
        for i in 0..m {
            let a0 = i * sa.row;
            let mut acc = 0.0_f64;
            for p in 0..k {
                acc = a[a0 + p * sa.col].mul_add(b[p * sb.row + b0], acc);
            }
            c[i * sc.row + j * sc.col] = acc;
        }
    }
}
