use clap::Parser;
use mblib::{
    npoint::NPointCounter,
    shared::MultibodySettings,
    solver::{DualTreeSolver, brute_force_forces},
};
use nalgebra::Vector3;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Approximate Axilrod-Teller forces and n-point counts on a random point cloud.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Number of points drawn uniformly from the unit cube
    #[arg(short, long, default_value_t = 1000)]
    num_points: usize,

    /// Maximum number of points per kd-tree leaf
    #[arg(short, long, default_value_t = 8)]
    leaf_size: usize,

    /// Relative error tolerated on each part of the force decomposition
    #[arg(short, long, default_value_t = 0.1)]
    relative_error: f64,

    #[arg(short, long, default_value_t = 0)]
    seed: u64,

    /// Radius of the n-point count; skipped when absent
    #[arg(long)]
    radius: Option<f64>,

    /// Tuple size of the n-point count
    #[arg(long, default_value_t = 3)]
    order: usize,

    /// Also run the O(N^3) brute-force solver and report the deviation
    #[arg(long)]
    compare: bool,
}

fn init_logger() {
    env_logger::init();
}

fn max_relative_deviation(approx: &[Vector3<f64>], exact: &[Vector3<f64>]) -> f64 {
    approx
        .iter()
        .zip(exact)
        .map(|(a, e)| (a - e).norm() / e.norm())
        .filter(|d| d.is_finite())
        .fold(0.0, f64::max)
}

fn main() -> mblib::Result<()> {
    init_logger();
    let args = Args::parse();

    let settings = MultibodySettings::<f64> {
        relative_error: args.relative_error,
        leaf_size: args.leaf_size,
        ..Default::default()
    };

    let mut rng = StdRng::seed_from_u64(args.seed);
    let points: Vec<Vector3<f64>> = (0..args.num_points)
        .map(|_| Vector3::new(rng.random(), rng.random(), rng.random()))
        .collect();
    log::info!("generated {} points with seed {}", points.len(), args.seed);

    let mut solver = DualTreeSolver::new(settings)?;
    let start = std::time::Instant::now();
    let result = solver.solve(&points)?;
    let elapsed = start.elapsed();
    println!("Dual-tree forces: {:?}", elapsed);
    println!("{:#?}", result.stats);

    if args.compare {
        let start = std::time::Instant::now();
        let exact = brute_force_forces(&points, solver.settings().coefficient)?;
        println!("Brute-force forces: {:?}", start.elapsed());
        println!(
            "Max relative deviation: {:e}",
            max_relative_deviation(&result.forces, &exact)
        );
    }

    if let Some(radius) = args.radius {
        let counter = NPointCounter::new(args.order, radius)?;
        let start = std::time::Instant::now();
        let count = counter.count_points(&points, args.leaf_size)?;
        println!(
            "{}-point count within {}: {} ({:?})",
            counter.order(),
            radius,
            count,
            start.elapsed()
        );
    }

    Ok(())
}
