//! Elimination trees and the static partitions derived from them.
//!
//! Column `j` of the factorization only depends on its descendants in the
//! column elimination tree of `A·Q` (or, with diagonal pivoting, the tree of
//! `Q'(A + A')Q`). After a postorder every subtree is a contiguous column
//! range `first_descendant(j)..=j`, which is what the scheduler and workers
//! rely on.
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`column_etree`] | tree of `A'A` without forming it (union-find over rows) |
//! | [`symmetric_etree`] | tree of `A + A'` (Liu's algorithm) |
//! | [`postorder`] | children before parents, lowest child first |
//! | [`relaxed_supernodes`] | small leaf subtrees factored as dense blocks |
//! | [`partition_domains`] | maximal subtrees handed to one worker |

use std::ops::Range;

use pslu_core::{PsluError, PsluResult, SparseColumns, EMPTY};

/// A postordered elimination forest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EliminationTree {
    parent: Vec<usize>,
    first_descendant: Vec<usize>,
}

impl EliminationTree {
    /// Wrap a parent array in which every parent is larger than its child.
    pub fn from_postordered(parent: Vec<usize>) -> PsluResult<Self> {
        let n = parent.len();
        let mut first_descendant: Vec<usize> = (0..n).collect();
        for j in 0..n {
            let p = parent[j];
            if p == EMPTY {
                continue;
            }
            if p <= j || p >= n {
                return Err(PsluError::Structural(format!(
                    "elimination tree is not postordered: parent of {j} is {p}"
                )));
            }
            first_descendant[p] = first_descendant[p].min(first_descendant[j]);
        }
        // Subtrees of a postorder are contiguous.
        let mut size = vec![1usize; n];
        for j in 0..n {
            if j + 1 - first_descendant[j] != size[j] {
                return Err(PsluError::Structural(format!(
                    "subtree of column {j} is not contiguous"
                )));
            }
            if parent[j] != EMPTY {
                size[parent[j]] += size[j];
            }
        }
        Ok(Self {
            parent,
            first_descendant,
        })
    }

    pub fn n(&self) -> usize {
        self.parent.len()
    }

    pub fn parent(&self, j: usize) -> Option<usize> {
        match self.parent[j] {
            EMPTY => None,
            p => Some(p),
        }
    }

    pub fn parents(&self) -> &[usize] {
        &self.parent
    }

    pub fn first_descendant(&self, j: usize) -> usize {
        self.first_descendant[j]
    }

    /// Columns of the subtree rooted at `j`.
    pub fn subtree(&self, j: usize) -> Range<usize> {
        self.first_descendant[j]..j + 1
    }

    pub fn subtree_size(&self, j: usize) -> usize {
        j + 1 - self.first_descendant[j]
    }
}

fn find(set: &mut [usize], mut i: usize) -> usize {
    while set[i] != i {
        set[i] = set[set[i]];
        i = set[i];
    }
    i
}

/// Column elimination tree of `A·Q` where `order[k]` is the original column
/// placed at position `k`. Returns parents in the `order` numbering.
pub fn column_etree(a: &SparseColumns, order: &[usize]) -> Vec<usize> {
    let n = a.n();
    let mut first_col = vec![n; n];
    for (pos, &col) in order.iter().enumerate() {
        for &row in a.column_rows(col) {
            first_col[row] = first_col[row].min(pos);
        }
    }

    let mut parent = vec![EMPTY; n];
    let mut set: Vec<usize> = (0..n).collect();
    let mut root: Vec<usize> = (0..n).collect();
    for col in 0..n {
        let mut cset = col;
        root[cset] = col;
        for &row in a.column_rows(order[col]) {
            let k = first_col[row];
            if k >= col {
                continue;
            }
            let rset = find(&mut set, k);
            let rroot = root[rset];
            if rroot != col {
                parent[rroot] = col;
                set[cset] = rset;
                cset = rset;
                root[cset] = col;
            }
        }
    }
    parent
}

/// Elimination tree of `Q'(A + A')Q`, parents in the `order` numbering.
pub fn symmetric_etree(a: &SparseColumns, order: &[usize]) -> Vec<usize> {
    let n = a.n();
    let mut position = vec![0; n];
    for (pos, &col) in order.iter().enumerate() {
        position[col] = pos;
    }

    // Lower neighbours of each column in the symmetric pattern.
    let mut lower: Vec<Vec<usize>> = vec![Vec::new(); n];
    for col in 0..n {
        let pc = position[col];
        for &row in a.column_rows(col) {
            let pr = position[row];
            match pr.cmp(&pc) {
                std::cmp::Ordering::Less => lower[pc].push(pr),
                std::cmp::Ordering::Greater => lower[pr].push(pc),
                std::cmp::Ordering::Equal => {}
            }
        }
    }

    let mut parent = vec![EMPTY; n];
    let mut ancestor = vec![EMPTY; n];
    for j in 0..n {
        for &i in &lower[j] {
            let mut r = i;
            while ancestor[r] != EMPTY && ancestor[r] != j {
                let next = ancestor[r];
                ancestor[r] = j;
                r = next;
            }
            if ancestor[r] == EMPTY {
                ancestor[r] = j;
                parent[r] = j;
            }
        }
    }
    parent
}

/// Postorder of a forest: `post[k]` is the node visited `k`-th.
pub fn postorder(parent: &[usize]) -> Vec<usize> {
    let n = parent.len();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut roots = Vec::new();
    for (j, &p) in parent.iter().enumerate() {
        if p == EMPTY {
            roots.push(j);
        } else {
            children[p].push(j);
        }
    }

    let mut post = Vec::with_capacity(n);
    let mut stack: Vec<(usize, usize)> = Vec::new();
    for root in roots {
        stack.push((root, 0));
        while let Some(top) = stack.last_mut() {
            let node = top.0;
            if let Some(&child) = children[node].get(top.1) {
                top.1 += 1;
                stack.push((child, 0));
            } else {
                post.push(node);
                stack.pop();
            }
        }
    }
    post
}

/// Relabel a parent array through a postorder.
pub fn relabel(parent: &[usize], post: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0; post.len()];
    for (k, &node) in post.iter().enumerate() {
        inverse[node] = k;
    }
    post.iter()
        .map(|&node| match parent[node] {
            EMPTY => EMPTY,
            p => inverse[p],
        })
        .collect()
}

/// Leaf subtrees with fewer than `relax` descendants, as column ranges.
///
/// Every leaf of the tree belongs to exactly one range; a range is always a
/// complete subtree.
pub fn relaxed_supernodes(tree: &EliminationTree, relax: usize) -> Vec<Range<usize>> {
    let n = tree.n();
    let mut descendants = vec![0usize; n];
    for j in 0..n {
        if let Some(p) = tree.parent(j) {
            descendants[p] += descendants[j] + 1;
        }
    }

    let mut ranges = Vec::new();
    let mut j = 0;
    while j < n {
        let start = j;
        while let Some(p) = tree.parent(j) {
            if descendants[p] >= relax {
                break;
            }
            j = p;
        }
        ranges.push(start..j + 1);
        j += 1;
        while j < n && descendants[j] != 0 {
            j += 1;
        }
    }
    ranges
}

/// Maximal subtrees with at most `n / (threads * ratio)` columns.
pub fn partition_domains(tree: &EliminationTree, threads: usize, ratio: f64) -> Vec<Range<usize>> {
    let n = tree.n();
    let target = (n as f64 / (threads.max(1) as f64 * ratio)).floor() as usize;
    if target < 2 {
        return Vec::new();
    }
    (0..n)
        .filter(|&j| {
            tree.subtree_size(j) <= target
                && tree.parent(j).map_or(true, |p| tree.subtree_size(p) > target)
        })
        .map(|j| tree.subtree(j))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pslu_core::gallery;

    fn identity(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    #[test]
    fn test_tridiagonal_tree_is_chain() {
        let a = gallery::tridiagonal(5, -1.0, 2.0, -1.0).unwrap();
        assert_eq!(column_etree(&a, &identity(5)), vec![1, 2, 3, 4, EMPTY]);
        assert_eq!(symmetric_etree(&a, &identity(5)), vec![1, 2, 3, 4, EMPTY]);
    }

    #[test]
    fn test_diagonal_is_forest_of_roots() {
        let a = SparseColumns::from_raw(3, vec![0, 1, 2, 3], vec![0, 1, 2], vec![1.0; 3]).unwrap();
        assert_eq!(column_etree(&a, &identity(3)), vec![EMPTY; 3]);
        assert_eq!(postorder(&[EMPTY; 3]), vec![0, 1, 2]);
    }

    #[test]
    fn test_arrow_tree() {
        let a = gallery::arrow(4).unwrap();
        let parent = column_etree(&a, &identity(4));
        assert_eq!(parent, vec![1, 2, 3, EMPTY]);
        let sym = symmetric_etree(&a, &identity(4));
        assert_eq!(sym, vec![3, 3, 3, EMPTY]);
    }

    #[test]
    fn test_postorder_children_first() {
        // 0 -> 2, 1 -> 2, 3 -> 4, 2 -> 4
        let parent = vec![2, 2, 4, 4, EMPTY];
        let post = postorder(&parent);
        assert_eq!(post, vec![0, 1, 2, 3, 4]);

        // 3 -> 0, 2 -> 0, 1 -> 2
        let parent = vec![EMPTY, 2, 0, 0];
        let post = postorder(&parent);
        assert_eq!(post, vec![1, 2, 3, 0]);
        let relabeled = relabel(&parent, &post);
        let tree = EliminationTree::from_postordered(relabeled).unwrap();
        assert_eq!(tree.subtree(3), 0..4);
        assert_eq!(tree.first_descendant(1), 0);
    }

    #[test]
    fn test_rejects_unordered_tree() {
        assert!(EliminationTree::from_postordered(vec![EMPTY, 0]).is_err());
        assert!(EliminationTree::from_postordered(vec![3, 2, 3, EMPTY]).is_ok());
        // Column 1 sits inside the range of column 2's subtree without belonging to it
        assert!(EliminationTree::from_postordered(vec![2, 3, 3, EMPTY]).is_err());
    }

    #[test]
    fn test_relaxed_supernodes_cover_leaves() {
        // Two chains of length 3 joined under a root: 0-1-2, 3-4-5, root 6
        let parent = vec![1, 2, 6, 4, 5, 6, EMPTY];
        let tree = EliminationTree::from_postordered(parent).unwrap();
        let relaxed = relaxed_supernodes(&tree, 3);
        assert_eq!(relaxed, vec![0..3, 3..6]);

        let singletons = relaxed_supernodes(&tree, 1);
        assert_eq!(singletons, vec![0..1, 3..4]);
    }

    #[test]
    fn test_partition_domains_maximal() {
        let parent = vec![1, 2, 6, 4, 5, 6, EMPTY];
        let tree = EliminationTree::from_postordered(parent).unwrap();
        // target = 7 / (1 * 2) = 3
        assert_eq!(partition_domains(&tree, 1, 2.0), vec![0..3, 3..6]);
        // target below 2 gives no domains
        assert!(partition_domains(&tree, 4, 4.0).is_empty());
    }

    #[test]
    fn test_convection_diffusion_tree_is_postordered_after_relabel() {
        let a = gallery::convection_diffusion_2d(5, 10.0).unwrap();
        let parent = column_etree(&a, &identity(a.n()));
        let post = postorder(&parent);
        let tree = EliminationTree::from_postordered(relabel(&parent, &post)).unwrap();
        assert_eq!(tree.n(), 25);
        assert!((0..25).all(|j| tree.parent(j).map_or(true, |p| p > j)));
    }
}
