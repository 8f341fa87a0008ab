// This file defines the bookkeeping for one K-tuple of tree nodes during a multi-tree
// traversal. Pairwise distance ranges between the K slots live in a flattened
// triangular array addressed by `pair_index`. Two sorted views of those ranges (by
// lower and by upper bound) give the kernels constant-time access to extremal bounds.

use smallvec::SmallVec;

use crate::shared::{AABB, DistanceRange, Float, NodeIndex, TreeNode, TupleTree, total_cmp};

/// Position of the unordered slot pair `{i, j}` in the flattened range array.
///
/// Pairs `(i, j)` with `i < j` are laid out row by row over the strict upper
/// triangle, so `pair_index(k, i, j) = i·(k−1) − i·(i−1)/2 + (j − i − 1)`.
pub fn pair_index(tuple_size: usize, i: usize, j: usize) -> usize {
    assert!(i != j, "no pair index for slot {i} with itself");
    assert!(
        i < tuple_size && j < tuple_size,
        "slot pair ({i}, {j}) out of range for a {tuple_size}-tuple"
    );
    let (row, col) = if i < j { (i, j) } else { (j, i) };
    row * (tuple_size - 1) - row * row.saturating_sub(1) / 2 + (col - row - 1)
}

pub fn num_pairs(tuple_size: usize) -> usize {
    tuple_size * (tuple_size - 1) / 2
}

/// The `tuple_size - 1` pair indices involving `slot`, ordered by the other slot.
///
/// The first `slot` entries walk `(0, slot), (1, slot), ...` with a stride that
/// shrinks by one per row; the rest walk `(slot, slot + 1), ...` with unit stride.
pub fn invalid_indices_for(tuple_size: usize, slot: usize) -> SmallVec<[usize; 8]> {
    assert!(slot < tuple_size, "slot {slot} out of range");
    let mut inds = SmallVec::new();
    if tuple_size == 2 {
        inds.push(0);
        return inds;
    }

    let mut row_ind = slot.saturating_sub(1);
    let mut col_ind = 0;
    for i in 0..slot {
        inds.push(row_ind);
        row_ind += tuple_size - 2 - i;
        col_ind += tuple_size - 1 - i;
    }
    for _ in slot + 1..tuple_size {
        inds.push(col_ind);
        col_ind += 1;
    }
    inds
}

fn sort_bounds<F: Float>(list: &mut [(F, usize)]) {
    list.sort_by(|a, b| total_cmp(a.0, b.0).then(a.1.cmp(&b.1)));
}

#[derive(Clone, Debug)]
pub struct NodeTuple<F: Float> {
    tuple_size: usize,
    node_list: SmallVec<[NodeIndex; 4]>,
    ranges: Vec<DistanceRange<F>>,
    sorted_upper: Vec<(F, usize)>,
    sorted_lower: Vec<(F, usize)>,
    input_to_upper: Vec<usize>,
    input_to_lower: Vec<usize>,
    ind_to_split: Option<usize>,
    all_leaves: bool,
}

impl<F: Float> NodeTuple<F> {
    /// Builds a tuple from scratch, computing every pairwise range.
    pub fn new<const D: usize, T: TupleTree<F, D>>(tree: &T, nodes: &[NodeIndex]) -> Self {
        let tuple_size = nodes.len();
        assert!(tuple_size >= 2, "a node tuple needs at least two slots");

        let mut ranges = Vec::with_capacity(num_pairs(tuple_size));
        for i in 0..tuple_size {
            let bound_i = tree.node(nodes[i]).bound();
            for j in i + 1..tuple_size {
                let bound_j = tree.node(nodes[j]).bound();
                ranges.push(DistanceRange::new(
                    bound_i.min_distance_sq(bound_j),
                    bound_i.max_distance_sq(bound_j),
                ));
            }
        }

        let mut tuple = Self {
            tuple_size,
            node_list: nodes.iter().copied().collect(),
            sorted_upper: Vec::with_capacity(ranges.len()),
            sorted_lower: Vec::with_capacity(ranges.len()),
            input_to_upper: vec![0; ranges.len()],
            input_to_lower: vec![0; ranges.len()],
            ranges,
            ind_to_split: None,
            all_leaves: true,
        };
        tuple.find_split_candidate(tree);
        tuple.resort();
        tuple
    }

    fn find_split_candidate<const D: usize, T: TupleTree<F, D>>(&mut self, tree: &T) {
        let mut split_size = 0;
        self.ind_to_split = None;
        self.all_leaves = true;
        for (i, &index) in self.node_list.iter().enumerate() {
            let node = tree.node(index);
            if !node.is_leaf() {
                self.all_leaves = false;
                if self.ind_to_split.is_none() || node.count() > split_size {
                    split_size = node.count();
                    self.ind_to_split = Some(i);
                }
            }
        }
    }

    fn resort(&mut self) {
        self.sorted_upper.clear();
        self.sorted_lower.clear();
        for (i, range) in self.ranges.iter().enumerate() {
            self.sorted_upper.push((range.max, i));
            self.sorted_lower.push((range.min, i));
        }

        // TODO: only tuple_size - 1 entries change per update; a bounded
        // insertion pass would avoid the full sort.
        sort_bounds(&mut self.sorted_upper);
        sort_bounds(&mut self.sorted_lower);

        for i in 0..self.sorted_upper.len() {
            self.input_to_upper[self.sorted_upper[i].1] = i;
            self.input_to_lower[self.sorted_lower[i].1] = i;
        }
    }

    /// Checks whether replacing slot `split_ind` by its left or right child keeps
    /// the slots in canonical order, so that no unordered combination of points
    /// is produced by two different tuples.
    pub fn check_symmetry<const D: usize, T: TupleTree<F, D>>(
        &self,
        tree: &T,
        split_ind: usize,
        is_left: bool,
    ) -> bool {
        let Some(child) = tree.child(self.node_list[split_ind], is_left) else {
            return false;
        };
        let child = tree.node(child);

        for i in 0..split_ind {
            if child.end() <= tree.node(self.node_list[i]).begin() {
                return false;
            }
        }
        for i in split_ind + 1..self.tuple_size {
            if tree.node(self.node_list[i]).end() <= child.begin() {
                return false;
            }
        }
        true
    }

    /// Pair indices made stale by replacing the node at the current split candidate.
    pub fn find_invalid_indices(&self) -> SmallVec<[usize; 8]> {
        let split = self
            .ind_to_split
            .expect("tuple of leaves has no slot to split");
        invalid_indices_for(self.tuple_size, split)
    }

    /// Refreshes the ranges touching `split_ind` after its node was replaced.
    ///
    /// `invalid_indices` must be the `tuple_size - 1` stale pair indices in the
    /// order produced by [`invalid_indices_for`]. The split candidate and the
    /// leaf flag are recomputed in the same pass, then both sorted views are
    /// rebuilt.
    pub fn update_indices<const D: usize, T: TupleTree<F, D>>(
        &mut self,
        tree: &T,
        split_ind: usize,
        invalid_indices: &[usize],
    ) {
        assert_eq!(
            invalid_indices.len(),
            self.tuple_size - 1,
            "expected one stale range per other slot"
        );

        let new_bound = tree.node(self.node_list[split_ind]).bound();
        let mut invalid_ind = 0;
        let mut split_size = 0;
        self.ind_to_split = None;
        self.all_leaves = true;

        for i in 0..self.tuple_size {
            let node_i = tree.node(self.node_list[i]);

            if !node_i.is_leaf() {
                self.all_leaves = false;
                if self.ind_to_split.is_none() || node_i.count() > split_size {
                    split_size = node_i.count();
                    self.ind_to_split = Some(i);
                }
            }

            if i != split_ind {
                let bad_ind = invalid_indices[invalid_ind];
                invalid_ind += 1;
                assert!(bad_ind < self.ranges.len(), "pair index {bad_ind} out of range");
                self.ranges[bad_ind] = DistanceRange::new(
                    node_i.bound().min_distance_sq(new_bound),
                    node_i.bound().max_distance_sq(new_bound),
                );
            }
        }

        self.resort();
    }

    /// Child tuple obtained by replacing the current split candidate with its
    /// left or right child, or `None` if there is nothing to split or the
    /// replacement breaks the canonical order.
    pub fn split<const D: usize, T: TupleTree<F, D>>(&self, tree: &T, is_left: bool) -> Option<Self> {
        let split_ind = self.ind_to_split?;
        if !self.check_symmetry(tree, split_ind, is_left) {
            return None;
        }
        let child = tree.child(self.node_list[split_ind], is_left)?;

        let invalid_indices = self.find_invalid_indices();
        let mut next = self.clone();
        next.node_list[split_ind] = child;
        next.update_indices(tree, split_ind, &invalid_indices);
        Some(next)
    }

    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    pub fn node_list(&self) -> &[NodeIndex] {
        &self.node_list
    }

    pub fn ranges(&self) -> &[DistanceRange<F>] {
        &self.ranges
    }

    pub fn range(&self, i: usize, j: usize) -> &DistanceRange<F> {
        &self.ranges[pair_index(self.tuple_size, i, j)]
    }

    pub fn sorted_upper(&self) -> &[(F, usize)] {
        &self.sorted_upper
    }

    pub fn sorted_lower(&self) -> &[(F, usize)] {
        &self.sorted_lower
    }

    pub fn input_to_upper(&self) -> &[usize] {
        &self.input_to_upper
    }

    pub fn input_to_lower(&self) -> &[usize] {
        &self.input_to_lower
    }

    pub fn split_candidate_index(&self) -> Option<usize> {
        self.ind_to_split
    }

    pub fn all_leaves(&self) -> bool {
        self.all_leaves
    }

    pub fn min_lower_bound(&self) -> F {
        self.sorted_lower[0].0
    }

    pub fn max_lower_bound(&self) -> F {
        self.sorted_lower[self.sorted_lower.len() - 1].0
    }

    pub fn max_upper_bound(&self) -> F {
        self.sorted_upper[self.sorted_upper.len() - 1].0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{Bounds, MultibodyStat};
    use nalgebra::{SVector, Vector3};

    struct TestNode {
        begin: usize,
        count: usize,
        children: Option<(usize, usize)>,
        bound: Bounds<f64, 3>,
        stat: MultibodyStat<f64, 3>,
    }

    impl TreeNode<f64, 3> for TestNode {
        fn is_leaf(&self) -> bool {
            self.children.is_none()
        }
        fn count(&self) -> usize {
            self.count
        }
        fn begin(&self) -> usize {
            self.begin
        }
        fn left(&self) -> Option<NodeIndex> {
            self.children.map(|c| c.0)
        }
        fn right(&self) -> Option<NodeIndex> {
            self.children.map(|c| c.1)
        }
        fn bound(&self) -> &Bounds<f64, 3> {
            &self.bound
        }
        fn stat(&self) -> &MultibodyStat<f64, 3> {
            &self.stat
        }
    }

    struct TestTree(Vec<TestNode>);

    impl TupleTree<f64, 3> for TestTree {
        type Node = TestNode;
        fn node(&self, index: NodeIndex) -> &TestNode {
            &self.0[index]
        }
    }

    fn node(begin: usize, count: usize, children: Option<(usize, usize)>, lo: f64, hi: f64) -> TestNode {
        TestNode {
            begin,
            count,
            children,
            bound: Bounds::new(Vector3::new(lo, 0.0, 0.0), Vector3::new(hi, 1.0, 1.0)),
            stat: MultibodyStat::from_points(&[SVector::<f64, 3>::zeros()]),
        }
    }

    /// Points 0..8 spread along x: root [0, 8), left [0, 4), right [4, 8) and
    /// four leaves of two points each below them.
    fn line_tree() -> TestTree {
        TestTree(vec![
            node(0, 8, Some((1, 2)), 0.0, 8.0),
            node(0, 4, Some((3, 4)), 0.0, 4.0),
            node(4, 4, Some((5, 6)), 4.0, 8.0),
            node(0, 2, None, 0.0, 2.0),
            node(2, 2, None, 2.0, 4.0),
            node(4, 2, None, 4.0, 6.0),
            node(6, 2, None, 6.0, 8.0),
        ])
    }

    fn assert_consistent(tuple: &NodeTuple<f64>) {
        let k = tuple.tuple_size();
        assert_eq!(tuple.ranges().len(), k * (k - 1) / 2);
        assert!(tuple.ranges().iter().all(|r| r.min <= r.max));
        for w in tuple.sorted_upper().windows(2) {
            assert!(w[0].0 <= w[1].0);
        }
        for w in tuple.sorted_lower().windows(2) {
            assert!(w[0].0 <= w[1].0);
        }
        for p in 0..tuple.ranges().len() {
            assert_eq!(tuple.sorted_upper()[tuple.input_to_upper()[p]].1, p);
            assert_eq!(tuple.sorted_lower()[tuple.input_to_lower()[p]].1, p);
            assert_eq!(tuple.sorted_upper()[tuple.input_to_upper()[p]].0, tuple.ranges()[p].max);
            assert_eq!(tuple.sorted_lower()[tuple.input_to_lower()[p]].0, tuple.ranges()[p].min);
        }
    }

    #[test]
    fn pair_index_layout() {
        assert_eq!(pair_index(2, 0, 1), 0);
        assert_eq!(pair_index(4, 0, 1), 0);
        assert_eq!(pair_index(4, 0, 3), 2);
        assert_eq!(pair_index(4, 1, 2), 3);
        assert_eq!(pair_index(4, 2, 3), 5);
        assert_eq!(pair_index(4, 3, 2), 5);
        for k in 2..7 {
            let mut seen = vec![false; num_pairs(k)];
            for i in 0..k {
                for j in i + 1..k {
                    let p = pair_index(k, i, j);
                    assert!(!seen[p]);
                    seen[p] = true;
                }
            }
            assert!(seen.iter().all(|s| *s));
        }
    }

    #[test]
    #[should_panic]
    fn pair_index_rejects_diagonal() {
        pair_index(3, 1, 1);
    }

    #[test]
    fn invalid_indices_match_hand_table() {
        assert_eq!(invalid_indices_for(2, 0).as_slice(), &[0]);
        assert_eq!(invalid_indices_for(2, 1).as_slice(), &[0]);
        assert_eq!(invalid_indices_for(3, 0).as_slice(), &[0, 1]);
        assert_eq!(invalid_indices_for(3, 1).as_slice(), &[0, 2]);
        assert_eq!(invalid_indices_for(3, 2).as_slice(), &[1, 2]);
        assert_eq!(invalid_indices_for(4, 0).as_slice(), &[0, 1, 2]);
        assert_eq!(invalid_indices_for(4, 2).as_slice(), &[1, 3, 5]);
        assert_eq!(invalid_indices_for(5, 2).as_slice(), &[1, 4, 7, 8]);
        assert_eq!(invalid_indices_for(5, 4).as_slice(), &[3, 6, 8, 9]);
    }

    #[test]
    fn invalid_indices_agree_with_pair_index() {
        for k in 2..8 {
            for s in 0..k {
                let expected: Vec<usize> = (0..k).filter(|&i| i != s).map(|i| pair_index(k, i, s)).collect();
                assert_eq!(invalid_indices_for(k, s).to_vec(), expected, "k = {k}, s = {s}");
            }
        }
    }

    #[test]
    fn root_tuple_is_consistent() {
        let tree = line_tree();
        let tuple = NodeTuple::new(&tree, &[0, 0, 0, 0]);
        assert_consistent(&tuple);
        assert_eq!(tuple.split_candidate_index(), Some(0));
        assert!(!tuple.all_leaves());
        assert!(tuple.ranges().iter().all(|r| r.min == 0.0 && r.max == 66.0));
    }

    #[test]
    fn split_candidate_prefers_largest_then_earliest() {
        let tree = line_tree();
        let tuple = NodeTuple::new(&tree, &[3, 1, 2, 0]);
        assert_eq!(tuple.split_candidate_index(), Some(3));
        let tuple = NodeTuple::new(&tree, &[3, 1, 2]);
        assert_eq!(tuple.split_candidate_index(), Some(1));
        let tuple = NodeTuple::new(&tree, &[3, 4, 5]);
        assert_eq!(tuple.split_candidate_index(), None);
        assert!(tuple.all_leaves());
    }

    #[test]
    fn symmetry_accepts_exactly_one_child() {
        let tree = line_tree();
        let tuple = NodeTuple::new(&tree, &[2, 0, 0]);
        assert_eq!(tuple.split_candidate_index(), Some(1));
        assert!(!tuple.check_symmetry(&tree, 1, true));
        assert!(tuple.check_symmetry(&tree, 1, false));
        assert!(tuple.split(&tree, true).is_none());
        let child = tuple.split(&tree, false).unwrap();
        assert_eq!(child.node_list(), &[2, 2, 0]);
    }

    #[test]
    fn symmetry_checks_later_slots() {
        let tree = line_tree();
        // Splitting slot 0 of (root, left): the right child starts after `left` ends.
        let tuple = NodeTuple::new(&tree, &[0, 1]);
        assert!(tuple.check_symmetry(&tree, 0, true));
        assert!(!tuple.check_symmetry(&tree, 0, false));
        // Leaves cannot be split.
        let leaves = NodeTuple::new(&tree, &[3, 4]);
        assert!(!leaves.check_symmetry(&tree, 0, true));
    }

    #[test]
    fn incremental_update_matches_full_rebuild() {
        let tree = line_tree();
        let mut tuple = NodeTuple::new(&tree, &[0, 0, 0, 0]);
        while let Some(next) = tuple
            .split(&tree, true)
            .or_else(|| tuple.split(&tree, false))
        {
            assert_consistent(&next);
            let rebuilt = NodeTuple::new(&tree, next.node_list());
            assert_eq!(next.ranges(), rebuilt.ranges());
            assert_eq!(next.sorted_upper(), rebuilt.sorted_upper());
            assert_eq!(next.sorted_lower(), rebuilt.sorted_lower());
            assert_eq!(next.split_candidate_index(), rebuilt.split_candidate_index());
            assert_eq!(next.all_leaves(), rebuilt.all_leaves());
            tuple = next;
        }
        assert!(tuple.all_leaves());
    }

    #[test]
    fn update_indices_refreshes_only_touched_pairs() {
        let tree = line_tree();
        let mut tuple = NodeTuple::new(&tree, &[1, 1, 2]);
        let before = tuple.ranges().to_vec();
        let invalid = invalid_indices_for(3, 1);
        tuple.node_list[1] = 4;
        tuple.update_indices(&tree, 1, &invalid);
        assert_eq!(tuple.range(0, 2), &before[pair_index(3, 0, 2)]);
        // [0, 4) against [2, 4): overlapping.
        assert_eq!(tuple.range(0, 1).min, 0.0);
        // [2, 4) against [4, 8): touching boxes.
        assert_eq!(tuple.range(1, 2).min, 0.0);
        assert_eq!(tuple.range(1, 2).max, 36.0 + 2.0);
        assert_consistent(&tuple);
        assert_eq!(tuple.split_candidate_index(), Some(0));
        assert_eq!(tuple.min_lower_bound(), 0.0);
        assert_eq!(tuple.max_upper_bound(), 66.0);
    }

    #[test]
    #[should_panic(expected = "one stale range per other slot")]
    fn update_indices_rejects_wrong_count() {
        let tree = line_tree();
        let mut tuple = NodeTuple::new(&tree, &[0, 0, 0]);
        tuple.update_indices(&tree, 0, &[0]);
    }

    #[test]
    #[should_panic]
    fn find_invalid_indices_needs_split_candidate() {
        let tree = line_tree();
        let tuple = NodeTuple::new(&tree, &[3, 4, 5]);
        tuple.find_invalid_indices();
    }

    #[test]
    fn sorting_survives_nan_ranges() {
        let mut list = vec![(3.0, 0), (f64::NAN, 1), (1.0, 2), (1.0, 3)];
        sort_bounds(&mut list);
        assert_eq!(list[0], (1.0, 2));
        assert_eq!(list[1], (1.0, 3));
        assert_eq!(list[2], (3.0, 0));
        assert_eq!(list[3].1, 1);
    }
}
