use std::marker::PhantomData;

use nalgebra::{DMatrix, SVector};

use super::{Contributions, InteractionKernel};
use crate::shared::{
    AABB, AXILROD_TELLER_COEFF, Float, ForceAccumulator, Interval, TreeNode, l1_norm, lit,
};

/// Member orderings `(i, j, k)` for the gradients along pairs 0-1, 0-2 and 1-2.
const ORDERINGS: [[usize; 3]; 3] = [[0, 1, 2], [0, 2, 1], [1, 2, 0]];

/// For every member: its two gradients as `(gradient, partner, third member)`.
const MEMBER_TERMS: [[(usize, usize, usize); 2]; 3] = [
    [(0, 1, 2), (1, 2, 1)],
    [(0, 0, 2), (2, 2, 0)],
    [(1, 0, 1), (2, 1, 0)],
];

/// Bounds on the negative and positive parts of the three pair gradients
/// `(nu / r) du/dr` of the Axilrod-Teller potential, indexed like [`ORDERINGS`].
#[derive(Clone, Debug, PartialEq)]
pub struct GradientBounds<F: Float> {
    pub negative: [Interval<F>; 3],
    pub positive: [Interval<F>; 3],
}

impl<F: Float> GradientBounds<F> {
    /// False if any of the twelve bounds is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.negative
            .iter()
            .chain(self.positive.iter())
            .all(|i| i.is_finite())
    }

    fn errors(&self) -> ([F; 3], [F; 3]) {
        (
            self.negative.map(|i| i.half_width()),
            self.positive.map(|i| i.half_width()),
        )
    }
}

/// Powers of a distance needed by the gradient formula.
#[derive(Clone, Copy)]
struct Powers<F: Float> {
    sq: F,
    dist: F,
    cub: F,
    qrt: F,
    qui: F,
    six: F,
}

impl<F: Float> Powers<F> {
    fn new(sq: F) -> Self {
        let dist = num_traits::Float::sqrt(sq);
        let cub = sq * dist;
        let qrt = sq * sq;
        Self {
            sq,
            dist,
            cub,
            qrt,
            qui: sq * cub,
            six: sq * qrt,
        }
    }
}

fn negative_terms<F: Float>(d1: &Powers<F>, d2: &Powers<F>, d3: &Powers<F>) -> F {
    let one = F::one();
    -lit::<F>(8.0) / (d1.qrt * d2.cub * d3.cub)
        - one / (d2.qui * d3.qui)
        - one / (d1.sq * d2.cub * d3.qui)
        - one / (d1.sq * d2.qui * d3.cub)
        - lit::<F>(3.0) / (d1.qrt * d2.dist * d3.qui)
        - lit::<F>(3.0) / (d1.qrt * d2.qui * d3.dist)
        - lit::<F>(5.0) / (d1.six * d2.dist * d3.cub)
        - lit::<F>(5.0) / (d1.six * d2.cub * d3.dist)
}

/// Positive part; `near` feeds the numerators, `far` the denominators.
fn positive_terms<F: Float>(
    near2: &Powers<F>,
    near3: &Powers<F>,
    far1: &Powers<F>,
    far2: &Powers<F>,
    far3: &Powers<F>,
) -> F {
    lit::<F>(5.0) * near2.dist / (far1.six * far3.qui)
        + lit::<F>(5.0) * near3.dist / (far1.six * far2.qui)
        + lit::<F>(6.0) / (far1.qrt * far2.cub * far3.cub)
}

fn min_sq<F: Float>(distmat: &DMatrix<F>, i: usize, j: usize) -> F {
    if i < j { distmat[(i, j)] } else { distmat[(j, i)] }
}

fn max_sq<F: Float>(distmat: &DMatrix<F>, i: usize, j: usize) -> F {
    if i < j { distmat[(j, i)] } else { distmat[(i, j)] }
}

/// Axilrod-Teller triple-dipole force kernel.
#[derive(Clone, Debug)]
pub struct AxilrodTellerKernel<F: Float, const D: usize> {
    coefficient: F,
    distmat: DMatrix<F>,
    _dim: PhantomData<SVector<F, D>>,
}

impl<F: Float, const D: usize> Default for AxilrodTellerKernel<F, D> {
    fn default() -> Self {
        Self::new(lit::<F>(AXILROD_TELLER_COEFF))
    }
}

impl<F: Float, const D: usize> AxilrodTellerKernel<F, D> {
    pub fn new(coefficient: F) -> Self {
        Self {
            coefficient,
            distmat: DMatrix::zeros(3, 3),
            _dim: PhantomData,
        }
    }

    fn gradient(&self, distmat: &DMatrix<F>, order: [usize; 3]) -> (Interval<F>, Interval<F>) {
        let [i, j, k] = order;
        let min1 = Powers::new(min_sq(distmat, i, j));
        let max1 = Powers::new(max_sq(distmat, i, j));
        let min2 = Powers::new(min_sq(distmat, i, k));
        let max2 = Powers::new(max_sq(distmat, i, k));
        let min3 = Powers::new(min_sq(distmat, j, k));
        let max3 = Powers::new(max_sq(distmat, j, k));

        let scale = lit::<F>(3.0) * self.coefficient / lit::<F>(8.0);
        let min_common_factor = scale / max1.dist;
        let max_common_factor = scale / min1.dist;

        // Every negative term grows towards zero with distance, every positive
        // term grows with its numerator distance and shrinks with the others.
        let negative = Interval::new(
            max_common_factor * negative_terms(&min1, &min2, &min3),
            min_common_factor * negative_terms(&max1, &max2, &max3),
        );
        let positive = Interval::new(
            min_common_factor * positive_terms(&min2, &min3, &max1, &max2, &max3),
            max_common_factor * positive_terms(&max2, &max3, &min1, &min2, &min3),
        );
        (negative, positive)
    }

    /// Deposits the three gradients onto the members. `counts` are the member
    /// sizes and `coordinates` their coordinate sums (positions for points).
    fn deposit(
        gradients: &GradientBounds<F>,
        counts: [F; 3],
        coordinates: [&SVector<F, D>; 3],
    ) -> Contributions<F, D> {
        let GradientBounds { negative, positive } = gradients;
        (0..3)
            .map(|member| {
                let [(g1, partner1, third1), (g2, partner2, third2)] = MEMBER_TERMS[member];
                let pairs = counts[partner1] * counts[third1];
                let mut acc = ForceAccumulator::<F, D>::default();

                acc.negative_scalar_e = pairs * (negative[g1].mid() + negative[g2].mid());
                acc.negative_scalar_u = pairs * (negative[g1].max + negative[g2].max);
                acc.positive_scalar_l = pairs * (positive[g1].min + positive[g2].min);
                acc.positive_scalar_e = pairs * (positive[g1].mid() + positive[g2].mid());

                for (g, partner, third) in [(g1, partner1, third1), (g2, partner2, third2)] {
                    let sum = coordinates[partner];
                    let weight = counts[third];
                    acc.negative_vector_e += sum * (weight * negative[g].mid());
                    acc.negative_vector_u += sum * (weight * negative[g].max);
                    acc.positive_vector_l += sum * (weight * positive[g].min);
                    acc.positive_vector_e += sum * (weight * positive[g].mid());
                }
                acc
            })
            .collect()
    }
}

impl<F: Float, const D: usize> InteractionKernel<F, D> for AxilrodTellerKernel<F, D> {
    type Gradients = GradientBounds<F>;

    fn order(&self) -> usize {
        3
    }

    fn pairwise_squared_distances(&self) -> &DMatrix<F> {
        &self.distmat
    }

    fn eval_min_max_squared_distances<N: TreeNode<F, D>>(&mut self, nodes: &[&N]) {
        assert_eq!(nodes.len(), 3, "Axilrod-Teller tuples have three members");
        for i in 0..nodes.len() - 1 {
            let bound_i = nodes[i].bound();
            for j in i + 1..nodes.len() {
                let bound_j = nodes[j].bound();
                self.distmat[(i, j)] = bound_i.min_distance_sq(bound_j);
                self.distmat[(j, i)] = bound_i.max_distance_sq(bound_j);
            }
        }
    }

    fn eval_min_max_squared_distances_points(
        &mut self,
        points: &[SVector<F, D>],
        indices: &[usize],
    ) {
        assert_eq!(indices.len(), 3, "Axilrod-Teller tuples have three members");
        for i in 0..indices.len() - 1 {
            let point_i = &points[indices[i]];
            for j in i + 1..indices.len() {
                let squared_distance = (point_i - points[indices[j]]).norm_squared();
                self.distmat[(i, j)] = squared_distance;
                self.distmat[(j, i)] = squared_distance;
            }
        }
    }

    fn eval_gradients(&self, distmat: &DMatrix<F>) -> GradientBounds<F> {
        let [(n1, p1), (n2, p2), (n3, p3)] = ORDERINGS.map(|order| self.gradient(distmat, order));
        GradientBounds {
            negative: [n1, n2, n3],
            positive: [p1, p2, p3],
        }
    }

    fn prune<N: TreeNode<F, D>>(
        &mut self,
        nodes: &[&N],
        relative_error: F,
        total_n_minus_one_num_tuples: F,
    ) -> Option<GradientBounds<F>> {
        self.eval_min_max_squared_distances(nodes);

        // Coincident members make the force law singular.
        for i in 0..2 {
            for j in i + 1..3 {
                if self.distmat[(i, j)] == F::zero() {
                    return None;
                }
            }
        }

        let gradients = self.eval_gradients(&self.distmat);
        if !gradients.is_finite() {
            log::trace!("non-finite gradient bounds for tuple, refusing to approximate");
            return None;
        }

        let (negative_error, positive_error) = gradients.errors();
        let counts = [0, 1, 2].map(|i| lit::<F>(nodes[i].count() as f64));
        let l1_norms = [0, 1, 2].map(|i| nodes[i].stat().l1_norm_coordinate_sum);
        let budget = relative_error / total_n_minus_one_num_tuples;

        let prunable = (0..3).all(|member| {
            let [(g1, partner1, third1), (g2, partner2, third2)] = MEMBER_TERMS[member];
            let bound = &nodes[member].stat().bound;
            let pairs = counts[partner1] * counts[third1];

            let scalar_ok = negative_error[g1] + negative_error[g2]
                <= budget * num_traits::Float::abs(bound.negative_scalar_u)
                && positive_error[g1] + positive_error[g2] <= budget * bound.positive_scalar_l;
            if !scalar_ok {
                return false;
            }

            let weight1 = counts[third1] * l1_norms[partner1];
            let weight2 = counts[third2] * l1_norms[partner2];
            let vector_budget = relative_error * pairs / total_n_minus_one_num_tuples;
            weight1 * negative_error[g1] + weight2 * negative_error[g2]
                <= vector_budget * l1_norm(&bound.negative_vector_u)
                && weight1 * positive_error[g1] + weight2 * positive_error[g2]
                    <= vector_budget * l1_norm(&bound.positive_vector_l)
        });

        prunable.then_some(gradients)
    }

    fn commit_contribution<N: TreeNode<F, D>>(
        &self,
        nodes: &[&N],
        gradients: &GradientBounds<F>,
    ) -> Contributions<F, D> {
        let counts = [0, 1, 2].map(|i| lit::<F>(nodes[i].count() as f64));
        let sums = [0, 1, 2].map(|i| &nodes[i].stat().coordinate_sum);
        Self::deposit(gradients, counts, sums)
    }

    fn point_contributions(
        &self,
        points: &[SVector<F, D>],
        indices: &[usize],
        gradients: &GradientBounds<F>,
    ) -> Contributions<F, D> {
        let positions = [0, 1, 2].map(|i| &points[indices[i]]);
        Self::deposit(gradients, [F::one(); 3], positions)
    }
}
