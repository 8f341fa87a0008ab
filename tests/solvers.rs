use approx::assert_relative_eq;
use mblib::{
    Error,
    npoint::{NPointCounter, brute_force_count},
    shared::{MultibodySettings, l1_norm},
    solver::{DualTreeSolver, brute_force_accumulators, brute_force_forces},
};
use nalgebra::{SVector, Vector2, Vector3};
use rand::{Rng, SeedableRng, rngs::StdRng};

fn cloud<const D: usize>(n: usize, seed: u64) -> Vec<SVector<f64, D>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| SVector::<f64, D>::from_fn(|_, _| rng.random()))
        .collect()
}

/// Radical inverse of `index` in `base`; consecutive indices fill [0, 1) evenly.
fn halton(mut index: usize, base: usize) -> f64 {
    let mut fraction = 1.0;
    let mut result = 0.0;
    while index > 0 {
        fraction /= base as f64;
        result += fraction * (index % base) as f64;
        index /= base;
    }
    result
}

/// Evenly spread points of the unit cube; the first one is the origin.
fn halton_cloud(n: usize) -> Vec<Vector3<f64>> {
    (0..n)
        .map(|i| Vector3::new(halton(i, 2), halton(i, 3), halton(i, 5)))
        .collect()
}

/// Three tight clumps at the corners of a large triangle.
fn clumps(n: usize) -> Vec<Vector3<f64>> {
    let corners = [
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(50.0, 0.0, 0.0),
        Vector3::new(0.0, 50.0, 0.0),
    ];
    halton_cloud(n)
        .iter()
        .enumerate()
        .map(|(i, jitter)| corners[i % 3] + jitter * 0.1)
        .collect()
}

fn settings(relative_error: f64, leaf_size: usize) -> MultibodySettings<f64> {
    MultibodySettings {
        relative_error,
        leaf_size,
        coefficient: 1.0,
    }
}

#[test]
fn exact_traversal_agrees_with_brute_force_in_3d() {
    let points: Vec<Vector3<f64>> = cloud(64, 42);
    let exact = brute_force_forces(&points, 1.0).unwrap();
    let result = DualTreeSolver::new(settings(0.0, 5))
        .unwrap()
        .solve(&points)
        .unwrap();
    for (f, e) in result.forces.iter().zip(&exact) {
        assert_relative_eq!((f - e).norm(), 0.0, epsilon = 1e-9 * e.norm());
    }
}

#[test]
fn exact_traversal_agrees_with_brute_force_in_2d() {
    let points: Vec<Vector2<f64>> = cloud(30, 3);
    let exact = brute_force_forces(&points, 1.0).unwrap();
    let result = DualTreeSolver::new(settings(0.0, 2))
        .unwrap()
        .solve(&points)
        .unwrap();
    for (f, e) in result.forces.iter().zip(&exact) {
        assert_relative_eq!((f - e).norm(), 0.0, epsilon = 1e-9 * e.norm());
    }
}

#[test]
fn separated_clumps_are_pruned() {
    let points = clumps(42);
    let exact = brute_force_forces(&points, 1.0).unwrap();
    let result = DualTreeSolver::new(settings(0.1, 4))
        .unwrap()
        .solve(&points)
        .unwrap();
    assert!(result.stats.tuples_pruned > 0);
    assert!(result.stats.pruned_point_triples > 0);
    assert_eq!(
        result.stats.pruned_point_triples + result.stats.point_triples_evaluated,
        42 * 41 * 40 / 6
    );
    for (f, e) in result.forces.iter().zip(&exact) {
        assert!((f - e).norm() <= 0.1 * e.norm());
    }
}

#[test]
fn uniform_cloud_prunes_within_tolerance() {
    let relative_error = 0.1;
    let points = halton_cloud(150);
    let exact = brute_force_accumulators(&points, 1.0).unwrap();
    let result = DualTreeSolver::new(settings(relative_error, 8))
        .unwrap()
        .solve(&points)
        .unwrap();
    assert!(result.stats.tuples_pruned > 0);
    assert_eq!(
        result.stats.pruned_point_triples + result.stats.point_triples_evaluated,
        150 * 149 * 148 / 6
    );

    let within = |approx: f64, exact: f64| (approx - exact).abs() <= relative_error * exact.abs();
    let within_l1 = |approx: &Vector3<f64>, exact: &Vector3<f64>| {
        l1_norm(&(approx - exact)) <= relative_error * l1_norm(exact)
    };
    for (((acc, e), f), p) in result
        .accumulators
        .iter()
        .zip(&exact)
        .zip(&result.forces)
        .zip(&points)
    {
        assert!(within(acc.negative_scalar_e, e.negative_scalar_e));
        assert!(within(acc.positive_scalar_e, e.positive_scalar_e));
        assert!(within_l1(&acc.negative_vector_e, &e.negative_vector_e));
        assert!(within_l1(&acc.positive_vector_e, &e.positive_vector_e));

        let force = e.force(p);
        assert!((f - force).norm() <= relative_error * force.norm());
    }
}

#[test]
fn n_point_counts_agree_with_brute_force() {
    let points: Vec<Vector3<f64>> = cloud(45, 17);
    for order in 2..=4 {
        let counter = NPointCounter::new(order, 0.35).unwrap();
        let expected = brute_force_count(&points, order, 0.35).unwrap();
        assert_eq!(counter.count_points(&points, 4).unwrap(), expected);
    }
}

#[test]
fn errors_surface_through_the_crate_result() {
    let points: Vec<Vector3<f64>> = cloud(2, 0);
    assert!(matches!(
        brute_force_forces(&points, 1.0),
        Err(Error::TooFewPoints { .. })
    ));
    assert!(matches!(
        DualTreeSolver::<f64, 3>::new(settings(0.1, 0)),
        Err(Error::InvalidSettings(_))
    ));
    assert!(matches!(
        brute_force_count(&points, 1, 0.5),
        Err(Error::InvalidSettings(_))
    ));

    let mut points: Vec<Vector3<f64>> = cloud(40, 5);
    points[11].y = f64::NAN;
    points[30].x = f64::NAN;
    assert!(matches!(
        DualTreeSolver::new(settings(0.1, 8)).unwrap().solve(&points),
        Err(Error::NonFiniteCoordinate { index: 11 })
    ));
    assert!(matches!(
        NPointCounter::new(3, 0.3).unwrap().count_points(&points, 4),
        Err(Error::NonFiniteCoordinate { index: 11 })
    ));
}
