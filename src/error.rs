//! Error taxonomy for the solver core.
//!
//! Each subsystem gets its own `derive_more`-based error enum: a flat enum of
//! `#[display("...")]` variants implementing `std::error::Error` via
//! `derive_more::Error`, rather than a single catch-all error type.

use derive_more::{Display, Error};

/// Errors raised by the sparse linear algebra / basis factorization layer.
#[derive(Debug, Display, Error, PartialEq, Clone)]
pub enum LinAlgError {
    #[display("basis matrix is singular or numerically degenerate")]
    MalformedBasis,

    #[display("symbolic analysis failed")]
    SymbolicFactorization,

    #[display("numeric factorization failed")]
    NumericFactorization,

    #[display("factorization accessed before initialization")]
    Uninitialized,

    #[display("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Outcome of a single pivot attempt in the Tableau.
///
/// A typed result with explicit discriminants, matched by the caller
/// instead of propagated as an exception.
#[derive(Debug, Clone)]
pub enum PivotOutcome {
    /// The pivot was executed and the tableau state is consistent.
    Ok,
    /// The factorization reported [`LinAlgError::MalformedBasis`]; the caller
    /// must pick a fresh basis and retry.
    NeedRefactor,
    /// No basic variable bounds the step in the required direction; the
    /// query is infeasible at the current decision level.
    InfeasibleAtThisLevel,
    /// A non-recoverable error occurred.
    Fatal(EngineError),
}

/// Errors raised by the SMT core, preprocessor, and bound manager.
#[derive(Debug, Display, Error, Clone)]
pub enum EngineError {
    #[display("inconsistent bound for variable {variable}: lb {lb} > ub {ub}")]
    InconsistentBound { variable: usize, lb: f64, ub: f64 },

    #[display("linear algebra failure: {_0}")]
    LinAlg(#[error(source)] LinAlgError),

    #[display("precision restoration failed twice at the same decision level")]
    PrecisionRestorationExhausted,

    #[display("unsupported constraint encountered during preprocessing")]
    UnsupportedConstraint,

    #[display("feature not supported: {feature}")]
    FeatureNotSupported { feature: &'static str },

    #[display("allocation failure")]
    Allocation,
}

impl From<LinAlgError> for EngineError {
    fn from(value: LinAlgError) -> Self {
        EngineError::LinAlg(value)
    }
}

/// Errors raised while constructing or validating a [`crate::query::Query`].
#[derive(Debug, Display, Error, Clone)]
pub enum QueryError {
    #[display("variable {0} is out of range for a query with {1} variables")]
    VariableOutOfRange(usize, usize),

    #[display("equation references unknown variable {0}")]
    UnknownVariable(usize),

    #[display("malformed persistence record: {reason}")]
    MalformedRecord { reason: String },

    #[display("unrecognized constraint tag '{tag}' in persistence record")]
    UnknownConstraintTag { tag: String },
}
