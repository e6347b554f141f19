//! Column ordering collaborator.
//!
//! The engine does not compute fill-reducing orderings. It accepts the
//! natural order or a caller-supplied permutation, then composes it with a
//! postorder of the elimination tree.

use std::ops::Range;

use pslu_core::{PsluError, PsluResult, SparseColumns};
use thiserror::Error;

use crate::etree::{partition_domains, EliminationTree};

/// Error type for ordering input.
#[derive(Debug, Error)]
pub enum OrderingError {
    #[error("Permutation has length {got}, expected {expected}")]
    Length { got: usize, expected: usize },

    #[error("Column {0} is out of range")]
    OutOfRange(usize),

    #[error("Column {0} appears more than once")]
    Duplicate(usize),
}

impl From<OrderingError> for PsluError {
    fn from(err: OrderingError) -> Self {
        PsluError::Structural(err.to_string())
    }
}

/// Supplies the column permutation and the static domain partition.
pub trait ColumnOrdering: Sync {
    /// `order[k]` is the original column placed at position `k`.
    fn column_order(&self, a: &SparseColumns) -> PsluResult<Vec<usize>>;

    /// Subtrees of the (postordered) tree handed whole to one worker.
    fn domains(&self, tree: &EliminationTree, threads: usize, ratio: f64) -> Vec<Range<usize>> {
        partition_domains(tree, threads, ratio)
    }
}

/// Keep the columns where they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrdering;

impl ColumnOrdering for NaturalOrdering {
    fn column_order(&self, a: &SparseColumns) -> PsluResult<Vec<usize>> {
        Ok((0..a.n()).collect())
    }
}

/// A permutation computed elsewhere (e.g. COLAMD or METIS output).
#[derive(Debug, Clone)]
pub struct ExplicitOrdering {
    order: Vec<usize>,
}

impl ExplicitOrdering {
    pub fn new(order: Vec<usize>) -> Self {
        Self { order }
    }
}

impl ColumnOrdering for ExplicitOrdering {
    fn column_order(&self, a: &SparseColumns) -> PsluResult<Vec<usize>> {
        validate_permutation(&self.order, a.n())?;
        Ok(self.order.clone())
    }
}

pub fn validate_permutation(order: &[usize], n: usize) -> Result<(), OrderingError> {
    if order.len() != n {
        return Err(OrderingError::Length {
            got: order.len(),
            expected: n,
        });
    }
    let mut seen = vec![false; n];
    for &col in order {
        if col >= n {
            return Err(OrderingError::OutOfRange(col));
        }
        if std::mem::replace(&mut seen[col], true) {
            return Err(OrderingError::Duplicate(col));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pslu_core::gallery;

    #[test]
    fn test_natural_ordering() {
        let a = gallery::tridiagonal(4, 1.0, 4.0, 1.0).unwrap();
        assert_eq!(NaturalOrdering.column_order(&a).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_explicit_ordering_validation() {
        let a = gallery::tridiagonal(3, 1.0, 4.0, 1.0).unwrap();
        assert_eq!(
            ExplicitOrdering::new(vec![2, 0, 1]).column_order(&a).unwrap(),
            vec![2, 0, 1]
        );

        let err = ExplicitOrdering::new(vec![0, 0, 1]).column_order(&a).unwrap_err();
        assert!(matches!(err, PsluError::Structural(_)));
        assert!(err.to_string().contains("more than once"));

        assert!(matches!(
            validate_permutation(&[0, 1], 3),
            Err(OrderingError::Length { got: 2, expected: 3 })
        ));
        assert!(matches!(
            validate_permutation(&[0, 1, 7], 3),
            Err(OrderingError::OutOfRange(7))
        ));
    }
}
