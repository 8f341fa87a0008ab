mod axilrod_teller;

pub use axilrod_teller::*;

use nalgebra::{DMatrix, SVector};
use smallvec::SmallVec;

use crate::shared::{Float, ForceAccumulator, TreeNode};

/// Postponed updates for the members of one tuple, in slot order.
pub type Contributions<F, const D: usize> = SmallVec<[ForceAccumulator<F, D>; 4]>;

/// An order-K interaction whose contribution over a tuple of tree nodes can be
/// bounded from the pairwise distance ranges between the nodes.
///
/// Implementations keep only scratch state: every evaluation re-derives the
/// working distance matrix from the nodes or points it is handed.
pub trait InteractionKernel<F: Float, const D: usize> {
    /// Interval bounds on the interaction terms of one tuple.
    type Gradients: Clone + std::fmt::Debug;

    /// Number of bodies taking part in one interaction.
    fn order(&self) -> usize;

    /// Working matrix filled by the last `eval_min_max_squared_distances*` call:
    /// `(i, j)` with `i < j` holds the minimum and `(j, i)` the maximum squared
    /// distance between members `i` and `j`.
    fn pairwise_squared_distances(&self) -> &DMatrix<F>;

    fn eval_min_max_squared_distances<N: TreeNode<F, D>>(&mut self, nodes: &[&N]);

    /// Exact variant for points; both triangles hold the same distance.
    fn eval_min_max_squared_distances_points(
        &mut self,
        points: &[SVector<F, D>],
        indices: &[usize],
    );

    fn eval_gradients(&self, distmat: &DMatrix<F>) -> Self::Gradients;

    /// Returns the gradient bounds when the tuple's contribution may be
    /// summarised within the error budget, `None` when the driver must recurse.
    fn prune<N: TreeNode<F, D>>(
        &mut self,
        nodes: &[&N],
        relative_error: F,
        total_n_minus_one_num_tuples: F,
    ) -> Option<Self::Gradients>;

    fn is_prunable<N: TreeNode<F, D>>(
        &mut self,
        nodes: &[&N],
        relative_error: F,
        total_n_minus_one_num_tuples: F,
    ) -> bool {
        self.prune(nodes, relative_error, total_n_minus_one_num_tuples)
            .is_some()
    }

    /// Postponed updates summarising a pruned tuple, one per node.
    fn commit_contribution<N: TreeNode<F, D>>(
        &self,
        nodes: &[&N],
        gradients: &Self::Gradients,
    ) -> Contributions<F, D>;

    /// Exact updates for one tuple of points, one per point.
    fn point_contributions(
        &self,
        points: &[SVector<F, D>],
        indices: &[usize],
        gradients: &Self::Gradients,
    ) -> Contributions<F, D>;
}
