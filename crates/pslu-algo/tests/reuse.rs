use pslu_algo::Factorizer;
use pslu_core::{gallery, FactorMode, FactorOptions, PsluError};

#[test]
fn test_same_pattern_reuses_order_and_tree() {
    let a = gallery::random_unsymmetric(150, 3, 21).unwrap();
    let first = Factorizer::default().with_threads(2).factor_columns(&a).unwrap();

    let scaled: Vec<f64> = a.values().iter().map(|v| v * 1.5).collect();
    let b = a.with_values(scaled).unwrap();
    let options = FactorOptions::default().with_mode(FactorMode::SamePattern);
    let second = Factorizer::new(options)
        .with_threads(4)
        .refactor_columns(&b, &first.prior())
        .unwrap();

    assert_eq!(second.col_order(), first.col_order());
    assert_eq!(second.etree(), first.etree());
    assert!(second.residual(&b).unwrap() < 1e-10);
}

#[test]
fn test_same_row_perm_keeps_pivots() {
    let a = gallery::random_unsymmetric(150, 3, 22).unwrap();
    let first = Factorizer::default().with_threads(3).factor_columns(&a).unwrap();

    let options = FactorOptions::default().with_mode(FactorMode::SamePatternSameRowPerm);
    let second = Factorizer::new(options)
        .with_threads(3)
        .refactor_columns(&a, &first.prior())
        .unwrap();
    assert_eq!(second.row_perm(), first.row_perm());
    assert!(second.residual(&a).unwrap() < 1e-10);
}

#[test]
fn test_prior_with_wrong_size_rejected() {
    let small = gallery::tridiagonal(10, -1.0, 4.0, -1.0).unwrap();
    let large = gallery::tridiagonal(12, -1.0, 4.0, -1.0).unwrap();
    let prior = Factorizer::default().factor_columns(&small).unwrap().prior();

    let options = FactorOptions::default().with_mode(FactorMode::SamePattern);
    let err = Factorizer::new(options)
        .refactor_columns(&large, &prior)
        .unwrap_err();
    assert!(matches!(err, PsluError::Structural(_)));
}

#[test]
fn test_prior_roundtrips_through_json() {
    let a = gallery::convection_diffusion_2d(5, 2.0).unwrap();
    let prior = Factorizer::default().factor_columns(&a).unwrap().prior();
    let json = serde_json::to_string(&prior).unwrap();
    let back: pslu_algo::PriorFactorization = serde_json::from_str(&json).unwrap();
    assert_eq!(back, prior);
}
