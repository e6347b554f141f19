//! Supernode split policy.
//!
//! Decides whether a freshly factored column extends the supernode of its
//! predecessor or opens a new one. Decisions must depend only on the column's
//! structure and the static unit layout, never on timing, so the partition
//! is the same for every thread count.

/// Facts about column `column` and the supernode ending at `column - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinCandidate {
    pub column: usize,
    /// `column - 1` belongs to the same panel segment
    pub same_unit: bool,
    /// Dependency search reached the supernode of `column - 1`
    pub predecessor_reached: bool,
    /// Below-diagonal structure equals the predecessor supernode's
    pub structure_matches: bool,
    /// Current width of the predecessor supernode
    pub width: usize,
}

pub trait SupernodeSplitPolicy: Sync {
    fn joins(&self, candidate: &JoinCandidate) -> bool;
}

/// Fundamental supernodes capped at `max_width` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundamentalSplit {
    pub max_width: usize,
}

impl FundamentalSplit {
    pub fn new(max_width: usize) -> Self {
        Self { max_width }
    }
}

impl SupernodeSplitPolicy for FundamentalSplit {
    fn joins(&self, candidate: &JoinCandidate) -> bool {
        candidate.same_unit
            && candidate.predecessor_reached
            && candidate.structure_matches
            && candidate.width < self.max_width
    }
}

/// Every column is its own supernode outside relaxed blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleColumn;

impl SupernodeSplitPolicy for SingleColumn {
    fn joins(&self, _candidate: &JoinCandidate) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> JoinCandidate {
        JoinCandidate {
            column: 5,
            same_unit: true,
            predecessor_reached: true,
            structure_matches: true,
            width: 2,
        }
    }

    #[test]
    fn test_fundamental_split() {
        let policy = FundamentalSplit::new(3);
        assert!(policy.joins(&candidate()));
        assert!(!policy.joins(&JoinCandidate { width: 3, ..candidate() }));
        assert!(!policy.joins(&JoinCandidate { same_unit: false, ..candidate() }));
        assert!(!policy.joins(&JoinCandidate {
            structure_matches: false,
            ..candidate()
        }));
        assert!(!policy.joins(&JoinCandidate {
            predecessor_reached: false,
            ..candidate()
        }));
    }

    #[test]
    fn test_single_column_never_joins() {
        assert!(!SingleColumn.joins(&candidate()));
    }
}
