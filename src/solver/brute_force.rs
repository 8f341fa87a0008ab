use nalgebra::SVector;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::kernel::{AxilrodTellerKernel, InteractionKernel};
use crate::shared::{Float, ForceAccumulator};

/// Exact Axilrod-Teller forces, summing every triple containing each target.
pub fn brute_force_forces<F: Float, const D: usize>(
    points: &[SVector<F, D>],
    coefficient: F,
) -> Result<Vec<SVector<F, D>>> {
    let sums = brute_force_accumulators(points, coefficient)?;
    Ok(sums
        .iter()
        .zip(points)
        .map(|(acc, p)| acc.force(p))
        .collect())
}

/// Exact force decomposition of every point, bounds equal to the estimates.
///
/// Targets are independent, so they are spread over the rayon pool; each task
/// keeps its own kernel scratch matrix.
pub fn brute_force_accumulators<F: Float, const D: usize>(
    points: &[SVector<F, D>],
    coefficient: F,
) -> Result<Vec<ForceAccumulator<F, D>>> {
    let n = points.len();
    if n < 3 {
        return Err(Error::TooFewPoints { order: 3, found: n });
    }

    let sums = (0..n)
        .into_par_iter()
        .map_init(
            || AxilrodTellerKernel::<F, D>::new(coefficient),
            |kernel, i| {
                let mut acc = ForceAccumulator::<F, D>::default();
                for j in (0..n).filter(|&j| j != i) {
                    for k in (j + 1..n).filter(|&k| k != i) {
                        let indices = [i, j, k];
                        kernel.eval_min_max_squared_distances_points(points, &indices);
                        let gradients = kernel.eval_gradients(kernel.pairwise_squared_distances());
                        acc += &kernel.point_contributions(points, &indices, &gradients)[0];
                    }
                }
                acc
            },
        )
        .collect();
    Ok(sums)
}
