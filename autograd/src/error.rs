use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used across the engine.
pub type Result<T> = std::result::Result<T, GraphErr>;

/// Errors raised by the graph primitives.
///
/// These are contract violations on the caller's side (incompatible matrix
/// shapes, scalar extraction from a non-scalar node). They are not
/// recoverable at the point of call and are meant to propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphErr {
    /// Two operands with incompatible dimensions were passed to an op.
    ShapeMismatch {
        op: &'static str,
        lhs: (usize, usize),
        rhs: (usize, usize),
    },

    /// A node that is not 1x1 was passed to scalar extraction.
    NotScalar { rows: usize, cols: usize },
}

impl Display for GraphErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphErr::ShapeMismatch { op, lhs, rhs } => write!(
                f,
                "shape mismatch in {op}: left is {}x{}, right is {}x{}",
                lhs.0, lhs.1, rhs.0, rhs.1
            ),
            GraphErr::NotScalar { rows, cols } => {
                write!(f, "expected a 1x1 node, got {rows}x{cols}")
            }
        }
    }
}

impl Error for GraphErr {}
