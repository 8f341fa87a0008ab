// This file defines the geometry, statistics and tree interfaces shared by the tuple
// bookkeeping, the kernels and the solvers.

use std::cmp::Ordering;
use std::ops::AddAssign;

use nalgebra::SVector;

use crate::error::{Error, Result};

/// Scalar type used throughout the crate.
pub trait Float: nalgebra::RealField + num_traits::Float + Copy + Send + Sync {}

impl<T> Float for T where T: nalgebra::RealField + num_traits::Float + Copy + Send + Sync {}

/// Converts an `f64` literal or count into `F`.
#[inline]
pub fn lit<F: Float>(value: f64) -> F {
    nalgebra::convert(value)
}

/// Orders floats totally, with NaN after every number.
pub fn total_cmp<F: Float>(a: F, b: F) -> Ordering {
    match a.partial_cmp(&b) {
        Some(ordering) => ordering,
        None => num_traits::Float::is_nan(a).cmp(&num_traits::Float::is_nan(b)),
    }
}

/// Index of a node inside the arena that owns it.
pub type NodeIndex = usize;

/// A closed interval `[min, max]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interval<F: Float> {
    pub min: F,
    pub max: F,
}

/// Interval of squared distance between two bounding volumes.
pub type DistanceRange<F> = Interval<F>;

impl<F: Float> Interval<F> {
    pub fn new(min: F, max: F) -> Self {
        Self { min, max }
    }

    /// Degenerate interval holding a single exact value.
    pub fn exact(value: F) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub fn mid(&self) -> F {
        (self.min + self.max) * lit::<F>(0.5)
    }

    /// Half the width of the interval, i.e. the error made by reporting `mid()`.
    pub fn half_width(&self) -> F {
        (self.max - self.min) * lit::<F>(0.5)
    }

    pub fn is_finite(&self) -> bool {
        num_traits::Float::is_finite(self.min) && num_traits::Float::is_finite(self.max)
    }
}

pub trait AABB<F: Float, const D: usize> {
    fn min(&self) -> &SVector<F, D>;
    fn max(&self) -> &SVector<F, D>;

    fn contains(&self, point: &SVector<F, D>) -> bool {
        (0..D).all(|d| point[d] >= self.min()[d] && point[d] <= self.max()[d])
    }

    /// Smallest squared distance between any point of `self` and any point of `other`.
    fn min_distance_sq(&self, other: &Self) -> F {
        let mut sum = F::zero();
        for d in 0..D {
            let below = other.min()[d] - self.max()[d];
            let above = self.min()[d] - other.max()[d];
            let gap = if below > above { below } else { above };
            if gap > F::zero() {
                sum += gap * gap;
            }
        }
        sum
    }

    /// Largest squared distance between any point of `self` and any point of `other`.
    fn max_distance_sq(&self, other: &Self) -> F {
        let mut sum = F::zero();
        for d in 0..D {
            let a = num_traits::Float::abs(other.max()[d] - self.min()[d]);
            let b = num_traits::Float::abs(self.max()[d] - other.min()[d]);
            let span = if a > b { a } else { b };
            sum += span * span;
        }
        sum
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds<F: Float, const D: usize> {
    min: SVector<F, D>,
    max: SVector<F, D>,
}

impl<F: Float, const D: usize> Bounds<F, D> {
    pub fn new(min: SVector<F, D>, max: SVector<F, D>) -> Self {
        assert!(
            (0..D).all(|d| min[d] <= max[d]),
            "bounding box corners are inverted"
        );
        Self { min, max }
    }

    /// Box enclosing a single point.
    pub fn point(point: SVector<F, D>) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// Tightest box around `points`, or `None` when the slice is empty.
    pub fn from_points(points: &[SVector<F, D>]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bounds = Self::point(*first);
        for p in rest {
            bounds.grow(p);
        }
        Some(bounds)
    }

    pub fn grow(&mut self, point: &SVector<F, D>) {
        for d in 0..D {
            if point[d] < self.min[d] {
                self.min[d] = point[d];
            }
            if point[d] > self.max[d] {
                self.max[d] = point[d];
            }
        }
    }

    pub fn width(&self, dim: usize) -> F {
        self.max[dim] - self.min[dim]
    }

    /// Dimension along which the box is widest; the first one wins ties.
    pub fn widest_dimension(&self) -> usize {
        (1..D).fold(0, |best, d| {
            if self.width(d) > self.width(best) {
                d
            } else {
                best
            }
        })
    }
}

impl<F: Float, const D: usize> AABB<F, D> for Bounds<F, D> {
    fn min(&self) -> &SVector<F, D> {
        &self.min
    }

    fn max(&self) -> &SVector<F, D> {
        &self.max
    }
}

/// Running sums of the negative and positive parts of the force decomposition.
///
/// The scalar part multiplies the receiving point's own position, the vector part
/// collects gradient-weighted partner positions. Suffixes: `_e` estimate,
/// `_u` upper bound, `_l` lower bound.
#[derive(Clone, Debug, PartialEq)]
pub struct ForceAccumulator<F: Float, const D: usize> {
    pub negative_scalar_e: F,
    pub negative_scalar_u: F,
    pub positive_scalar_l: F,
    pub positive_scalar_e: F,
    pub negative_vector_e: SVector<F, D>,
    pub negative_vector_u: SVector<F, D>,
    pub positive_vector_l: SVector<F, D>,
    pub positive_vector_e: SVector<F, D>,
}

impl<F: Float, const D: usize> Default for ForceAccumulator<F, D> {
    fn default() -> Self {
        Self {
            negative_scalar_e: F::zero(),
            negative_scalar_u: F::zero(),
            positive_scalar_l: F::zero(),
            positive_scalar_e: F::zero(),
            negative_vector_e: SVector::<F, D>::zeros(),
            negative_vector_u: SVector::<F, D>::zeros(),
            positive_vector_l: SVector::<F, D>::zeros(),
            positive_vector_e: SVector::<F, D>::zeros(),
        }
    }
}

impl<F: Float, const D: usize> ForceAccumulator<F, D> {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    pub fn is_finite(&self) -> bool {
        let scalars = [
            self.negative_scalar_e,
            self.negative_scalar_u,
            self.positive_scalar_l,
            self.positive_scalar_e,
        ];
        let vectors = [
            &self.negative_vector_e,
            &self.negative_vector_u,
            &self.positive_vector_l,
            &self.positive_vector_e,
        ];
        scalars.iter().all(|s| num_traits::Float::is_finite(*s))
            && vectors
                .iter()
                .all(|v| v.iter().all(|c| num_traits::Float::is_finite(*c)))
    }

    /// Force estimate on a point at `position` whose interactions are summarised here.
    pub fn force(&self, position: &SVector<F, D>) -> SVector<F, D> {
        let scalar = self.negative_scalar_e + self.positive_scalar_e;
        (self.negative_vector_e + self.positive_vector_e) - position * scalar
    }

    /// The same sums after every position has been moved by `offset`.
    pub fn translated(&self, offset: &SVector<F, D>) -> Self {
        Self {
            negative_vector_e: self.negative_vector_e + offset * self.negative_scalar_e,
            negative_vector_u: self.negative_vector_u + offset * self.negative_scalar_u,
            positive_vector_l: self.positive_vector_l + offset * self.positive_scalar_l,
            positive_vector_e: self.positive_vector_e + offset * self.positive_scalar_e,
            ..self.clone()
        }
    }

    /// Adds only the `_u` and `_l` sums of `rhs`.
    pub fn add_bounds(&mut self, rhs: &Self) {
        self.negative_scalar_u += rhs.negative_scalar_u;
        self.positive_scalar_l += rhs.positive_scalar_l;
        self.negative_vector_u += &rhs.negative_vector_u;
        self.positive_vector_l += &rhs.positive_vector_l;
    }

    /// Bounds holding for anything bounded by either `self` or `other`: the
    /// smaller magnitude of every `_u` and `_l` component. Estimates are zero.
    ///
    /// Only meaningful while every component keeps its sign, which holds for
    /// positions in the positive orthant.
    pub fn weaker_bounds(&self, other: &Self) -> Self {
        Self {
            negative_scalar_u: larger(self.negative_scalar_u, other.negative_scalar_u),
            positive_scalar_l: smaller(self.positive_scalar_l, other.positive_scalar_l),
            negative_vector_u: self.negative_vector_u.zip_map(&other.negative_vector_u, larger),
            positive_vector_l: self.positive_vector_l.zip_map(&other.positive_vector_l, smaller),
            ..Self::default()
        }
    }

    /// Keeps the larger magnitude of every `_u` and `_l` component.
    pub fn tighten_bounds(&mut self, other: &Self) {
        self.negative_scalar_u = smaller(self.negative_scalar_u, other.negative_scalar_u);
        self.positive_scalar_l = larger(self.positive_scalar_l, other.positive_scalar_l);
        self.negative_vector_u = self.negative_vector_u.zip_map(&other.negative_vector_u, smaller);
        self.positive_vector_l = self.positive_vector_l.zip_map(&other.positive_vector_l, larger);
    }
}

fn larger<F: Float>(a: F, b: F) -> F {
    if a > b { a } else { b }
}

fn smaller<F: Float>(a: F, b: F) -> F {
    if a < b { a } else { b }
}

impl<F: Float, const D: usize> AddAssign<&ForceAccumulator<F, D>> for ForceAccumulator<F, D> {
    fn add_assign(&mut self, rhs: &ForceAccumulator<F, D>) {
        self.negative_scalar_e += rhs.negative_scalar_e;
        self.negative_scalar_u += rhs.negative_scalar_u;
        self.positive_scalar_l += rhs.positive_scalar_l;
        self.positive_scalar_e += rhs.positive_scalar_e;
        self.negative_vector_e += &rhs.negative_vector_e;
        self.negative_vector_u += &rhs.negative_vector_u;
        self.positive_vector_l += &rhs.positive_vector_l;
        self.positive_vector_e += &rhs.positive_vector_e;
    }
}

/// Per-node statistics read by the kernels and written by the drivers.
#[derive(Clone, Debug)]
pub struct MultibodyStat<F: Float, const D: usize> {
    pub coordinate_sum: SVector<F, D>,
    pub l1_norm_coordinate_sum: F,
    /// What every point of the node has received so far, as `_u`/`_l` sums
    /// only. The prune test measures interval errors against it.
    pub bound: ForceAccumulator<F, D>,
    /// Contributions committed to this node but not yet pushed to its points.
    pub postponed: ForceAccumulator<F, D>,
}

impl<F: Float, const D: usize> MultibodyStat<F, D> {
    pub fn from_points(points: &[SVector<F, D>]) -> Self {
        let coordinate_sum = points
            .iter()
            .fold(SVector::<F, D>::zeros(), |acc, p| acc + p);
        Self {
            l1_norm_coordinate_sum: l1_norm(&coordinate_sum),
            coordinate_sum,
            bound: ForceAccumulator::default(),
            postponed: ForceAccumulator::default(),
        }
    }
}

pub fn l1_norm<F: Float, const D: usize>(v: &SVector<F, D>) -> F {
    v.iter()
        .fold(F::zero(), |acc, c| acc + num_traits::Float::abs(*c))
}

/// A node of a space-partitioning tree whose points occupy the contiguous range
/// `begin()..end()` of the tree's permuted point order.
pub trait TreeNode<F: Float, const D: usize> {
    fn is_leaf(&self) -> bool;
    fn count(&self) -> usize;
    fn begin(&self) -> usize;
    fn end(&self) -> usize {
        self.begin() + self.count()
    }
    fn left(&self) -> Option<NodeIndex>;
    fn right(&self) -> Option<NodeIndex>;
    fn bound(&self) -> &Bounds<F, D>;
    fn stat(&self) -> &MultibodyStat<F, D>;
}

/// Arena owning the nodes that tuples refer to by index.
pub trait TupleTree<F: Float, const D: usize> {
    type Node: TreeNode<F, D>;

    fn node(&self, index: NodeIndex) -> &Self::Node;

    fn child(&self, index: NodeIndex, is_left: bool) -> Option<NodeIndex> {
        let node = self.node(index);
        if is_left { node.left() } else { node.right() }
    }
}

/// The "nu" constant in front of the Axilrod-Teller potential.
pub const AXILROD_TELLER_COEFF: f64 = 1e-18;

#[derive(Clone, Debug)]
pub struct MultibodySettings<F: Float> {
    /// Relative error tolerated on each accumulated part of every point's force.
    pub relative_error: F,
    /// Maximum number of points stored in a tree leaf.
    pub leaf_size: usize,
    /// Strength of the Axilrod-Teller potential.
    pub coefficient: F,
}

impl<F: Float> Default for MultibodySettings<F> {
    fn default() -> Self {
        Self {
            relative_error: lit::<F>(0.1),
            leaf_size: 8,
            coefficient: lit::<F>(AXILROD_TELLER_COEFF),
        }
    }
}

impl<F: Float> MultibodySettings<F> {
    pub fn validate(&self) -> Result<()> {
        if !num_traits::Float::is_finite(self.relative_error) || self.relative_error < F::zero() {
            return Err(Error::InvalidSettings(format!(
                "relative error must be finite and non-negative, got {:?}",
                self.relative_error
            )));
        }
        if self.leaf_size == 0 {
            return Err(Error::InvalidSettings("leaf size must be positive".into()));
        }
        if !num_traits::Float::is_finite(self.coefficient) || self.coefficient <= F::zero() {
            return Err(Error::InvalidSettings(format!(
                "coefficient must be finite and positive, got {:?}",
                self.coefficient
            )));
        }
        Ok(())
    }
}
