//! Polymorphic constraint objects.
//!
//! Piecewise-linear constraints are represented as a tagged `enum_dispatch`
//! variant rather than a `dyn`-dispatched hierarchy: shared behavior (bound
//! caching, phase state) lives in each variant's own small record, and the
//! trait methods are dispatched through a generated match rather than a
//! vtable. Nonlinear
//! constraints never produce case splits and instead refine themselves by
//! appending piecewise-linear approximations.

pub mod nonlinear;
pub mod pl;

pub use nonlinear::{NonlinearConstraint, NonlinearConstraintVariant};
pub use pl::{CaseSplit, Phase, PiecewiseLinearConstraint, PlConstraint};
