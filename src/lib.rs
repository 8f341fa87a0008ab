pub mod error;
pub mod kernel;
pub mod npoint;
pub mod shared;
pub mod solver;
pub mod tree;
pub mod tuple;

pub use error::{Error, Result};
