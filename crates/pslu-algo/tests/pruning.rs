use pslu_algo::{Factorizer, SingleColumn};
use pslu_core::gallery;

#[test]
fn test_pruning_happens_on_grid() {
    let a = gallery::convection_diffusion_2d(12, 10.0).unwrap();
    for threads in [1, 4] {
        let lu = Factorizer::default()
            .with_threads(threads)
            .with_split_policy(SingleColumn)
            .factor_columns(&a)
            .unwrap();
        let totals = &lu.report().totals;
        assert!(totals.prunes > 0, "threads={threads}");
        assert!(totals.searches > 0);
        assert!(lu.residual(&a).unwrap() < 1e-10);
    }
}

#[test]
fn test_pruning_does_not_change_factors() {
    // Sequential runs prune at different moments than parallel ones
    let a = gallery::random_unsymmetric(250, 3, 3).unwrap();
    let one = Factorizer::default().with_threads(1).factor_columns(&a).unwrap();
    let many = Factorizer::default().with_threads(6).factor_columns(&a).unwrap();
    assert_eq!(one.l().indices(), many.l().indices());
    assert_eq!(one.u().indices(), many.u().indices());
    let stats = &many.report().totals;
    assert!(stats.prunes_abandoned <= stats.prunes_deferred);
}
