// This file defines the error type shared by the tree, the solvers and the demo binary.

/// Recoverable input errors. Broken tuple invariants are not represented here:
/// they indicate a driver bug and panic instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("point set is empty")]
    EmptyInput,
    #[error("interaction of order {order} needs at least {order} points, got {found}")]
    TooFewPoints { order: usize, found: usize },
    #[error("point {index} has a non-finite coordinate")]
    NonFiniteCoordinate { index: usize },
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

pub type Result<T> = std::result::Result<T, Error>;
