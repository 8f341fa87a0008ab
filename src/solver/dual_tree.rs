use nalgebra::SVector;

use crate::error::{Error, Result};
use crate::kernel::{AxilrodTellerKernel, InteractionKernel};
use crate::shared::{
    AABB, Bounds, Float, ForceAccumulator, MultibodySettings, NodeIndex, TreeNode, TupleTree,
    lit,
};
use crate::tree::{KdTree, ensure_finite};
use crate::tuple::NodeTuple;

/// Counters collected during one traversal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub frames_visited: usize,
    pub tuples_pruned: usize,
    /// Point triples summarised by pruned tuples.
    pub pruned_point_triples: usize,
    /// All-leaf tuples evaluated point by point.
    pub leaf_tuples_evaluated: usize,
    pub point_triples_evaluated: usize,
    pub symmetry_rejections: usize,
}

#[derive(Clone, Debug)]
pub struct DualTreeResult<F: Float, const D: usize> {
    /// One force per input point, in input order.
    pub forces: Vec<SVector<F, D>>,
    /// The summed force decomposition behind every force, in input order.
    pub accumulators: Vec<ForceAccumulator<F, D>>,
    pub stats: TraversalStats,
}

/// Approximates Axilrod-Teller forces by a depth-first traversal over node
/// triples, summarising well separated triples with interval bounds.
///
/// A tuple is summarised when its interval errors are small next to what its
/// nodes have already received. Those running bounds grow as tuples are
/// committed and leaves are evaluated exactly, so the budget of a tuple depends
/// on the work done before it.
pub struct DualTreeSolver<F: Float, const D: usize> {
    settings: MultibodySettings<F>,
    kernel: AxilrodTellerKernel<F, D>,
}

impl<F: Float, const D: usize> DualTreeSolver<F, D> {
    pub fn new(settings: MultibodySettings<F>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            kernel: AxilrodTellerKernel::new(settings.coefficient),
            settings,
        })
    }

    pub fn settings(&self) -> &MultibodySettings<F> {
        &self.settings
    }

    pub fn solve(&mut self, points: &[SVector<F, D>]) -> Result<DualTreeResult<F, D>> {
        let order = self.kernel.order();
        let Some(extent) = Bounds::from_points(points) else {
            return Err(Error::EmptyInput);
        };
        if points.len() < order {
            return Err(Error::TooFewPoints {
                order,
                found: points.len(),
            });
        }
        ensure_finite(points)?;

        // Measured from the lower corner every coordinate is non-negative, so
        // each vector sum keeps one sign and its bounds can be compared
        // component by component.
        let origin = *extent.min();
        let shifted = points.iter().map(|p| p - origin).collect();
        let mut tree = KdTree::new(shifted, self.settings.leaf_size)?;

        let n = tree.len();
        let mut accumulators = vec![ForceAccumulator::<F, D>::default(); n];
        let mut stats = TraversalStats::default();

        let root = tree.root();
        let mut stack = vec![NodeTuple::new(&tree, &[root; 3])];
        while let Some(tuple) = stack.pop() {
            stats.frames_visited += 1;
            self.visit(&mut tree, tuple, &mut accumulators, &mut stack, &mut stats);
        }

        push_down(&mut tree, &mut accumulators);

        let mut forces = vec![SVector::<F, D>::zeros(); n];
        let mut sums = vec![ForceAccumulator::<F, D>::default(); n];
        for (new, acc) in accumulators.iter().enumerate() {
            let old = tree.old_from_new()[new];
            forces[old] = acc.force(&tree.points()[new]);
            sums[old] = acc.translated(&origin);
        }

        log::info!(
            "dual-tree traversal over {} points: {} frames, {} pruned tuples ({} triples), {} leaf tuples ({} triples), {} symmetry rejections",
            n,
            stats.frames_visited,
            stats.tuples_pruned,
            stats.pruned_point_triples,
            stats.leaf_tuples_evaluated,
            stats.point_triples_evaluated,
            stats.symmetry_rejections
        );
        Ok(DualTreeResult {
            forces,
            accumulators: sums,
            stats,
        })
    }

    fn visit(
        &mut self,
        tree: &mut KdTree<F, D>,
        tuple: NodeTuple<F>,
        accumulators: &mut [ForceAccumulator<F, D>],
        stack: &mut Vec<NodeTuple<F>>,
        stats: &mut TraversalStats,
    ) {
        let n = lit::<F>(tree.len() as f64);
        let total_n_minus_one_num_tuples =
            (n - F::one()) * (n - lit::<F>(2.0)) / lit::<F>(2.0);
        let node_list = tuple.node_list();

        let committed = {
            let nodes: Vec<_> = node_list.iter().map(|&i| tree.node(i)).collect();
            self.kernel
                .prune(&nodes, self.settings.relative_error, total_n_minus_one_num_tuples)
                .map(|gradients| {
                    stats.pruned_point_triples +=
                        nodes.iter().map(|node| node.count()).product::<usize>();
                    self.kernel.commit_contribution(&nodes, &gradients)
                })
        };
        if let Some(updates) = committed {
            stats.tuples_pruned += 1;
            for (&idx, update) in node_list.iter().zip(&updates) {
                tree.stat_mut(idx).postponed += update;
                raise_subtree_bounds(tree, idx, update);
                refine_ancestors(tree, idx);
            }
            return;
        }

        if tuple.all_leaves() {
            stats.leaf_tuples_evaluated += 1;
            self.evaluate_leaves(tree, node_list, accumulators, stats);
            for &leaf in node_list {
                refresh_leaf_bound(tree, leaf, accumulators);
            }
            return;
        }

        // Right first so the left child is visited next.
        for is_left in [false, true] {
            match tuple.split(&*tree, is_left) {
                Some(child) => stack.push(child),
                None => stats.symmetry_rejections += 1,
            }
        }
    }

    /// Exact evaluation of every increasing point triple spanned by three leaves.
    fn evaluate_leaves(
        &mut self,
        tree: &KdTree<F, D>,
        node_list: &[NodeIndex],
        accumulators: &mut [ForceAccumulator<F, D>],
        stats: &mut TraversalStats,
    ) {
        let [a, b, c] = [0, 1, 2].map(|s| {
            let node = tree.node(node_list[s]);
            (node.begin(), node.end())
        });
        let points = tree.points();

        for i in a.0..a.1 {
            for j in b.0.max(i + 1)..b.1 {
                for k in c.0.max(j + 1)..c.1 {
                    let indices = [i, j, k];
                    self.kernel
                        .eval_min_max_squared_distances_points(points, &indices);
                    let gradients = self
                        .kernel
                        .eval_gradients(self.kernel.pairwise_squared_distances());
                    let updates = self.kernel.point_contributions(points, &indices, &gradients);
                    for (&p, update) in indices.iter().zip(&updates) {
                        accumulators[p] += update;
                    }
                    stats.point_triples_evaluated += 1;
                }
            }
        }
    }
}

/// Every point below `idx` receives a contribution committed to `idx`.
fn raise_subtree_bounds<F: Float, const D: usize>(
    tree: &mut KdTree<F, D>,
    idx: NodeIndex,
    update: &ForceAccumulator<F, D>,
) {
    let below: Vec<NodeIndex> = tree.subtree(idx).collect();
    for i in below {
        tree.stat_mut(i).bound.add_bounds(update);
    }
}

/// Tightens each ancestor of `idx` by what both of its children are known to
/// have received.
fn refine_ancestors<F: Float, const D: usize>(tree: &mut KdTree<F, D>, idx: NodeIndex) {
    let mut current = tree.node(idx).parent();
    while let Some(parent) = current {
        let node = tree.node(parent);
        if let Some((left, right)) = node.children() {
            let shared = tree
                .node(left)
                .stat()
                .bound
                .weaker_bounds(&tree.node(right).stat().bound);
            tree.stat_mut(parent).bound.tighten_bounds(&shared);
        }
        current = tree.node(parent).parent();
    }
}

/// Tightens a leaf's bound by the exact sums held by its points plus every
/// contribution committed to the leaf or its ancestors.
fn refresh_leaf_bound<F: Float, const D: usize>(
    tree: &mut KdTree<F, D>,
    leaf: NodeIndex,
    accumulators: &[ForceAccumulator<F, D>],
) {
    let node = tree.node(leaf);
    let Some(mut received) = accumulators[node.begin()..node.end()]
        .iter()
        .map(|acc| acc.weaker_bounds(acc))
        .reduce(|a, b| a.weaker_bounds(&b))
    else {
        return;
    };

    let mut current = Some(leaf);
    while let Some(idx) = current {
        received.add_bounds(&tree.node(idx).stat().postponed);
        current = tree.node(idx).parent();
    }
    tree.stat_mut(leaf).bound.tighten_bounds(&received);
    refine_ancestors(tree, leaf);
}

/// Moves postponed accumulators from every node to its children and finally to
/// the points of each leaf.
fn push_down<F: Float, const D: usize>(
    tree: &mut KdTree<F, D>,
    accumulators: &mut [ForceAccumulator<F, D>],
) {
    let order: Vec<NodeIndex> = tree.depth_first().collect();
    for idx in order {
        let postponed = std::mem::take(&mut tree.stat_mut(idx).postponed);
        if postponed.is_zero() {
            continue;
        }
        let node = tree.node(idx);
        let (begin, end) = (node.begin(), node.end());
        match node.children() {
            Some((left, right)) => {
                tree.stat_mut(left).postponed += &postponed;
                tree.stat_mut(right).postponed += &postponed;
            }
            None => {
                for acc in &mut accumulators[begin..end] {
                    *acc += &postponed;
                }
            }
        }
    }
}
