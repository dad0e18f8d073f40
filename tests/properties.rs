use nn_engine::Matrix;
use proptest::prelude::*;

fn matrix(rows: usize, cols: usize) -> impl Strategy<Value = Matrix> {
    prop::collection::vec(-10.0_f64..10.0, rows * cols)
        .prop_map(move |data| Matrix::from_vec(rows, cols, data).unwrap())
}

/// `(A, B)` with `A: (m, k)` and `B: (k, n)`.
fn multipliable() -> impl Strategy<Value = (Matrix, Matrix)> {
    (1_usize..6, 1_usize..6, 1_usize..6)
        .prop_flat_map(|(m, k, n)| (matrix(m, k), matrix(k, n)))
}

fn any_matrix() -> impl Strategy<Value = Matrix> {
    (1_usize..8, 1_usize..8).prop_flat_map(|(r, c)| matrix(r, c))
}

proptest! {
    #[test]
    fn transpose_of_product((a, b) in multipliable()) {
        let lhs = a.multiply(&b).unwrap().transpose().with_tolerance(1e-9);
        let rhs = b.transpose().multiply(&a.transpose()).unwrap();
        prop_assert!(lhs.approx_eq(&rhs));
    }

    #[test]
    fn strided_products_match_explicit_transpose((a, b) in multipliable()) {
        let at = a.transpose();
        let direct = at.transpose_multiply(&b).unwrap().with_tolerance(1e-9);
        prop_assert!(direct.approx_eq(&a.multiply(&b).unwrap()));

        let bt = b.transpose();
        let direct = a.multiply_transpose(&bt).unwrap().with_tolerance(1e-9);
        prop_assert!(direct.approx_eq(&a.multiply(&b).unwrap()));
    }

    #[test]
    fn soft_max_columns_sum_to_one(m in any_matrix()) {
        let s = m.soft_max();
        for total in s.sum_columns().data() {
            prop_assert!((total - 1.0).abs() < 1e-9);
        }
        prop_assert!(s.data().iter().all(|v| *v > 0.0 && *v <= 1.0));
    }

    #[test]
    fn soft_max_ignores_per_column_shift(m in any_matrix(), shift in -50.0_f64..50.0) {
        let shifted = m.map(|v| v + shift).soft_max().with_tolerance(1e-9);
        prop_assert!(shifted.approx_eq(&m.soft_max()));
    }
}
