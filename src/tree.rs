// This file defines the kd-tree the multi-tree traversals run over. Nodes live in an
// arena and are referred to by index; every node owns a contiguous range of the
// permuted point array.

use nalgebra::SVector;

use crate::error::{Error, Result};
use crate::shared::{
    AABB, Bounds, Float, MultibodyStat, NodeIndex, TreeNode, TupleTree, total_cmp,
};

#[derive(Clone, Debug)]
pub struct KdNode<F: Float, const D: usize> {
    begin: usize,
    count: usize,
    bounds: Bounds<F, D>,
    // (left, right) indices into the arena
    children: Option<(NodeIndex, NodeIndex)>,
    parent: Option<NodeIndex>,
    stat: MultibodyStat<F, D>,
}

impl<F: Float, const D: usize> KdNode<F, D> {
    pub fn stat_mut(&mut self) -> &mut MultibodyStat<F, D> {
        &mut self.stat
    }

    pub fn children(&self) -> Option<(NodeIndex, NodeIndex)> {
        self.children
    }

    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }
}

impl<F: Float, const D: usize> TreeNode<F, D> for KdNode<F, D> {
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
        self.children.map(|(left, _)| left)
    }

    fn right(&self) -> Option<NodeIndex> {
        self.children.map(|(_, right)| right)
    }

    fn bound(&self) -> &Bounds<F, D> {
        &self.bounds
    }

    fn stat(&self) -> &MultibodyStat<F, D> {
        &self.stat
    }
}

/// Binary space partitioning tree with median splits along the widest dimension.
#[derive(Clone, Debug)]
pub struct KdTree<F: Float, const D: usize> {
    nodes: Vec<KdNode<F, D>>,
    points: Vec<SVector<F, D>>,
    old_from_new: Vec<usize>,
    leaf_size: usize,
}

/// Fails on the first point with a NaN or infinite coordinate.
pub fn ensure_finite<F: Float, const D: usize>(points: &[SVector<F, D>]) -> Result<()> {
    match points
        .iter()
        .position(|p| !p.iter().all(|c| num_traits::Float::is_finite(*c)))
    {
        Some(index) => Err(Error::NonFiniteCoordinate { index }),
        None => Ok(()),
    }
}

impl<F: Float, const D: usize> KdTree<F, D> {
    /// Builds the tree, reordering `points` so that every node covers a
    /// contiguous range. Node 0 is the root.
    pub fn new(points: Vec<SVector<F, D>>, leaf_size: usize) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::EmptyInput);
        }
        if leaf_size == 0 {
            return Err(Error::InvalidSettings("leaf size must be positive".into()));
        }
        ensure_finite(&points)?;

        let n = points.len();
        let mut tree = Self {
            nodes: Vec::with_capacity(2 * n.div_ceil(leaf_size)),
            old_from_new: (0..n).collect(),
            points,
            leaf_size,
        };
        tree.build(0, n, None);
        log::debug!(
            "built kd-tree over {} points: {} nodes, leaf size {}",
            n,
            tree.nodes.len(),
            leaf_size
        );
        Ok(tree)
    }

    fn build(&mut self, begin: usize, count: usize, parent: Option<NodeIndex>) -> NodeIndex {
        let end = begin + count;
        let slice = &self.points[begin..end];
        let bounds = match Bounds::from_points(slice) {
            Some(bounds) => bounds,
            None => unreachable!("kd-tree nodes are never empty"),
        };
        let idx = self.nodes.len();
        self.nodes.push(KdNode {
            begin,
            count,
            stat: MultibodyStat::from_points(slice),
            bounds,
            children: None,
            parent,
        });

        if count <= self.leaf_size {
            return idx;
        }

        self.partition(idx);
        let left_count = count / 2;
        let left = self.build(begin, left_count, Some(idx));
        let right = self.build(begin + left_count, count - left_count, Some(idx));
        self.nodes[idx].children = Some((left, right));
        idx
    }

    /// Orders the node's points along its widest dimension. The sort is stable so
    /// equal coordinates keep their input order.
    fn partition(&mut self, idx: NodeIndex) {
        let node = &self.nodes[idx];
        let (begin, end) = (node.begin, node.end());
        let dim = node.bounds.widest_dimension();

        let mut order: Vec<usize> = (begin..end).collect();
        order.sort_by(|&a, &b| total_cmp(self.points[a][dim], self.points[b][dim]));

        let points: Vec<_> = order.iter().map(|&i| self.points[i]).collect();
        let old: Vec<_> = order.iter().map(|&i| self.old_from_new[i]).collect();
        self.points[begin..end].copy_from_slice(&points);
        self.old_from_new[begin..end].copy_from_slice(&old);
    }

    pub fn root(&self) -> NodeIndex {
        0
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points in tree order.
    pub fn points(&self) -> &[SVector<F, D>] {
        &self.points
    }

    /// `old_from_new()[i]` is the input position of the point stored at `i`.
    pub fn old_from_new(&self) -> &[usize] {
        &self.old_from_new
    }

    pub fn stat_mut(&mut self, index: NodeIndex) -> &mut MultibodyStat<F, D> {
        self.nodes[index].stat_mut()
    }

    /// Node indices in depth-first pre-order; parents come before children.
    pub fn depth_first(&self) -> DepthFirst<'_, F, D> {
        self.subtree(self.root())
    }

    /// Pre-order walk over `index` and its descendants.
    pub fn subtree(&self, index: NodeIndex) -> DepthFirst<'_, F, D> {
        DepthFirst {
            tree: self,
            stack: vec![index],
        }
    }

    /// Leaves from left to right, i.e. by increasing point range.
    pub fn leaves(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.depth_first().filter(|&i| self.nodes[i].is_leaf())
    }

    /// Bounding box of the whole point set.
    pub fn bounds(&self) -> &Bounds<F, D> {
        &self.nodes[self.root()].bounds
    }

    /// Largest squared distance between two points of the set, bounded by the root box.
    pub fn diameter_sq(&self) -> F {
        let bounds = self.bounds();
        bounds.max_distance_sq(bounds)
    }
}

impl<F: Float, const D: usize> TupleTree<F, D> for KdTree<F, D> {
    type Node = KdNode<F, D>;

    fn node(&self, index: NodeIndex) -> &KdNode<F, D> {
        &self.nodes[index]
    }
}

pub struct DepthFirst<'a, F: Float, const D: usize> {
    tree: &'a KdTree<F, D>,
    stack: Vec<NodeIndex>,
}

impl<F: Float, const D: usize> Iterator for DepthFirst<'_, F, D> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<NodeIndex> {
        let idx = self.stack.pop()?;
        if let Some((left, right)) = self.tree.nodes[idx].children {
            self.stack.push(right);
            self.stack.push(left);
        }
        Some(idx)
    }
}
