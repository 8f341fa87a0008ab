// This file defines n-point range counting over the same tuple traversal the force
// solver uses.

use nalgebra::SVector;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::shared::{Float, NodeIndex, TreeNode, TupleTree};
use crate::tree::KdTree;
use crate::tuple::NodeTuple;

/// Counts K-tuples of distinct points whose pairwise distances are all within
/// a radius.
#[derive(Clone, Debug)]
pub struct NPointCounter<F: Float> {
    order: usize,
    radius_sq: F,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NPointStats {
    pub frames_visited: usize,
    pub tuples_excluded: usize,
    pub tuples_included: usize,
    pub leaf_tuples_evaluated: usize,
}

fn check_order(order: usize) -> Result<()> {
    if order < 2 {
        return Err(Error::InvalidSettings(format!(
            "n-point order must be at least 2, got {order}"
        )));
    }
    Ok(())
}

fn binomial(n: usize, k: usize) -> usize {
    if k > n {
        return 0;
    }
    (0..k).fold(1, |acc, i| acc * (n - i) / (i + 1))
}

impl<F: Float> NPointCounter<F> {
    pub fn new(order: usize, radius: F) -> Result<Self> {
        check_order(order)?;
        if !num_traits::Float::is_finite(radius) || radius < F::zero() {
            return Err(Error::InvalidSettings(format!(
                "radius must be finite and non-negative, got {radius:?}"
            )));
        }
        Ok(Self {
            order,
            radius_sq: radius * radius,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Builds a kd-tree over `points` and counts the matching tuples.
    pub fn count_points<const D: usize>(
        &self,
        points: &[SVector<F, D>],
        leaf_size: usize,
    ) -> Result<usize> {
        if points.len() < self.order {
            return Err(Error::TooFewPoints {
                order: self.order,
                found: points.len(),
            });
        }
        let tree = KdTree::new(points.to_vec(), leaf_size)?;
        Ok(self.count(&tree).0)
    }

    pub fn count<const D: usize>(&self, tree: &KdTree<F, D>) -> (usize, NPointStats) {
        let mut stats = NPointStats::default();
        let mut total = 0;

        let root: SmallVec<[NodeIndex; 4]> = SmallVec::from_elem(tree.root(), self.order);
        let mut stack = vec![NodeTuple::new(tree, &root)];
        while let Some(tuple) = stack.pop() {
            stats.frames_visited += 1;

            if tuple.max_lower_bound() > self.radius_sq {
                stats.tuples_excluded += 1;
                continue;
            }
            if tuple.max_upper_bound() <= self.radius_sq {
                if let Some(count) = wholesale_count(tree, tuple.node_list()) {
                    stats.tuples_included += 1;
                    total += count;
                    continue;
                }
            }
            if tuple.all_leaves() {
                stats.leaf_tuples_evaluated += 1;
                total += self.count_leaves(tree, tuple.node_list());
                continue;
            }
            stack.extend(tuple.split(tree, false));
            stack.extend(tuple.split(tree, true));
        }

        log::debug!("{}-point count within r^2 = {:?}: {} ({:?})", self.order, self.radius_sq, total, stats);
        (total, stats)
    }

    fn count_leaves<const D: usize>(&self, tree: &KdTree<F, D>, node_list: &[NodeIndex]) -> usize {
        let ranges: SmallVec<[(usize, usize); 4]> = node_list
            .iter()
            .map(|&i| {
                let node = tree.node(i);
                (node.begin(), node.end())
            })
            .collect();
        let mut chosen = SmallVec::<[usize; 4]>::new();
        self.extend_tuple(tree.points(), &ranges, &mut chosen)
    }

    /// Counts completions of `chosen` with strictly increasing indices, one per
    /// remaining slot range.
    fn extend_tuple<const D: usize>(
        &self,
        points: &[SVector<F, D>],
        ranges: &[(usize, usize)],
        chosen: &mut SmallVec<[usize; 4]>,
    ) -> usize {
        let slot = chosen.len();
        if slot == ranges.len() {
            return 1;
        }
        let (begin, end) = ranges[slot];
        let start = chosen.last().map_or(begin, |&prev| begin.max(prev + 1));

        let mut count = 0;
        for p in start..end {
            let within = chosen
                .iter()
                .all(|&q| (points[p] - points[q]).norm_squared() <= self.radius_sq);
            if within {
                chosen.push(p);
                count += self.extend_tuple(points, ranges, chosen);
                chosen.pop();
            }
        }
        count
    }
}

/// Number of increasing tuples covered by `node_list` when every pair of slots
/// holds the same node or disjoint nodes; `None` otherwise.
fn wholesale_count<F: Float, const D: usize>(
    tree: &KdTree<F, D>,
    node_list: &[NodeIndex],
) -> Option<usize> {
    for i in 0..node_list.len() {
        let a = tree.node(node_list[i]);
        for &other in &node_list[i + 1..] {
            let b = tree.node(other);
            let disjoint = a.end() <= b.begin() || b.end() <= a.begin();
            if node_list[i] != other && !disjoint {
                return None;
            }
        }
    }

    // Identical nodes are adjacent in a canonically ordered tuple.
    let mut count = 1;
    let mut i = 0;
    while i < node_list.len() {
        let mut multiplicity = 1;
        while i + multiplicity < node_list.len() && node_list[i + multiplicity] == node_list[i] {
            multiplicity += 1;
        }
        count *= binomial(tree.node(node_list[i]).count(), multiplicity);
        i += multiplicity;
    }
    Some(count)
}

/// Exact reference: tests every increasing index tuple.
pub fn brute_force_count<F: Float, const D: usize>(
    points: &[SVector<F, D>],
    order: usize,
    radius: F,
) -> Result<usize> {
    let counter = NPointCounter::new(order, radius)?;
    if points.len() < order {
        return Err(Error::TooFewPoints {
            order,
            found: points.len(),
        });
    }
    let ranges: SmallVec<[(usize, usize); 4]> = SmallVec::from_elem((0, points.len()), order);
    let mut chosen = SmallVec::new();
    Ok(counter.extend_tuple(points, &ranges, &mut chosen))
}
