//! Singular pivots are reported at the lowest failing column, whatever the
//! number of threads.

use pslu_algo::Factorizer;
use pslu_core::{gallery, ErrorClass, FactorOptions, PsluError, SparseColumns};

/// Tridiagonal matrix with column `k` scaled down to almost nothing.
fn nearly_singular(n: usize, k: usize, scale: f64) -> SparseColumns {
    let a = gallery::tridiagonal(n, -1.0, 4.0, -1.0).unwrap();
    let mut values = Vec::with_capacity(a.nnz());
    for j in 0..n {
        let factor = if j == k { scale } else { 1.0 };
        values.extend(a.column(j).1.iter().map(|v| v * factor));
    }
    a.with_values(values).unwrap()
}

fn factor(a: &SparseColumns, threads: usize) -> PsluError {
    let options = FactorOptions::default().with_pivot_floor(1e-10);
    Factorizer::new(options)
        .with_threads(threads)
        .factor_columns(a)
        .unwrap_err()
}

#[test]
fn test_lowest_failing_column_reported() {
    let n = 200;
    let k = 137;
    let a = nearly_singular(n, k, 1e-14);
    for threads in [1, 2, 4, 8] {
        let err = factor(&a, threads);
        match &err {
            PsluError::SingularPivot {
                original_column,
                last_committed,
                ..
            } => {
                assert_eq!(*original_column, k, "threads={threads}");
                assert!(last_committed.is_some());
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(err.class(), ErrorClass::Numeric);
    }
}

#[test]
fn test_two_failures_report_the_lower() {
    let a = nearly_singular(120, 90, 1e-14);
    let mut values = Vec::with_capacity(a.nnz());
    for j in 0..a.n() {
        let factor = if j == 30 { 1e-14 } else { 1.0 };
        values.extend(a.column(j).1.iter().map(|v| v * factor));
    }
    let a = a.with_values(values).unwrap();

    for threads in [1, 4] {
        let err = factor(&a, threads);
        let code = err.info_code(a.n());
        match err {
            PsluError::SingularPivot {
                column,
                original_column,
                ..
            } => {
                assert_eq!(original_column, 30);
                assert_eq!(code, column as i64 + 1);
            }
            other => panic!("unexpected error {other}"),
        }
    }
}

#[test]
fn test_structurally_zero_column_fails() {
    // Column 2 holds only an explicit zero
    let a = SparseColumns::from_raw(
        3,
        vec![0, 1, 2, 3],
        vec![0, 1, 2],
        vec![2.0, 3.0, 0.0],
    )
    .unwrap();
    let err = Factorizer::default()
        .with_threads(2)
        .factor_columns(&a)
        .unwrap_err();
    match err {
        PsluError::SingularPivot {
            original_column,
            last_committed,
            ..
        } => {
            assert_eq!(original_column, 2);
            assert!(last_committed.is_some());
        }
        other => panic!("unexpected error {other}"),
    }
}
