mod brute_force;
mod dual_tree;

pub use brute_force::*;
pub use dual_tree::*;
