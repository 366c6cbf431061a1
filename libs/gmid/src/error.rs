//! Error types for table loading and sizing.

use std::path::PathBuf;

use arcstr::ArcStr;

use crate::sizing::Rejection;

/// The result type returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error loading a technology table or sizing a device.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The technology table is missing columns, has non-numeric values,
    /// or does not describe a complete grid.
    #[error("malformed table{}: {reason}", at_line(.line))]
    MalformedTable {
        /// The 1-based line of the offending row, if any.
        line: Option<usize>,
        /// What is wrong with the table.
        reason: String,
    },
    /// A query fell outside the sampled grid.
    #[error("{axis} = {value:e} is outside the sampled range [{min:e}, {max:e}]")]
    OutOfRange {
        /// The axis on which the query was out of range.
        axis: ArcStr,
        /// The queried coordinate.
        value: f64,
        /// The smallest sample on the axis.
        min: f64,
        /// The largest sample on the axis.
        max: f64,
    },
    /// No operating point in the sampled range satisfies the constraints.
    #[error("infeasible constraints: {reason}{}", list(.rejected))]
    InfeasibleConstraint {
        /// A summary of the unsatisfied requirement.
        reason: String,
        /// The candidate channel lengths that were tried and why each was rejected.
        rejected: Vec<Rejection>,
    },
    /// The parasitic-aware refinement loop exhausted its iteration budget.
    #[error(
        "refinement did not converge after {iterations} iterations (last relative GBW error {gbw_error:.3e})"
    )]
    Convergence {
        /// The number of iterations performed.
        iterations: usize,
        /// The signed relative GBW error of the final iteration.
        gbw_error: f64,
    },
    /// The design constraints are not physically meaningful.
    #[error("invalid constraints: {0}")]
    InvalidConstraints(String),
    /// A grid was constructed from inconsistent axes and values.
    #[error("invalid grid: {0}")]
    InvalidGrid(String),
    /// A file could not be read.
    #[error("failed to read {path:?}: {err}")]
    FailedToRead {
        /// The path of the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        err: std::io::Error,
    },
    /// A constraints document is not valid TOML or does not match the schema.
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn malformed(line: Option<usize>, reason: impl Into<String>) -> Self {
        Self::MalformedTable {
            line,
            reason: reason.into(),
        }
    }
}

fn at_line(line: &Option<usize>) -> String {
    line.map(|line| format!(" (line {line})")).unwrap_or_default()
}

fn list(rejected: &[Rejection]) -> String {
    rejected
        .iter()
        .map(|rejection| format!("\n  {rejection}"))
        .collect()
}
