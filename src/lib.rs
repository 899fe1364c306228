//! Hybrid Simplex / SMT decision procedure for the theory of linear real
//! arithmetic extended with piecewise-linear and nonlinear relations.
//!
//! The crate is organized as a layered LP/QP/NLP solver stack: a `linalg`
//! layer of sparse factorizations, a `tableau` holding revised-Simplex
//! state, a `pricing` layer selecting the entering variable, and an
//! `engine` that drives the whole thing to a verdict. On top of that stack
//! sits the SMT wrapper around the Simplex core: piecewise-linear
//! `constraints` that can be case-split on, a `bound_manager` substrate
//! shared by constraints and the tableau, `tightening` passes, a
//! `preprocessor`, a sum-of-infeasibilities search mode (`soi`), and a
//! divide-and-conquer parallel orchestrator (`dnc`).

use std::any::Any;

use dyn_clone::DynClone;
use macros::build_options;

/// Floating point element type used throughout the solver. The design
/// targets double precision with explicit tolerances (see [`constants`])
/// rather than error-free arithmetic.
pub type E = f64;
/// Index type used for variables, rows, and sparse matrix indices.
pub type I = usize;

pub mod bound_manager;
pub mod callback;
pub mod constants;
pub mod constraints;
pub mod dnc;
pub mod engine;
pub mod error;
pub mod linalg;
pub mod model;
pub mod persistence;
pub mod preprocessor;
pub mod pricing;
pub mod query;
pub mod soi;
pub mod tableau;
pub mod terminators;
pub mod tightening;

/// Marker trait for values storable in the runtime [`SolverOptions`] registry.
///
/// Any `'static + Sync + Send + Clone` value can be registered as an option
/// and retrieved by name with a downcast, so new option types (including the
/// `build_option_enum!`-derived strategy enums below) need only this one
/// marker impl.
pub trait OptionTrait: Any + Sync + Send + DynClone {}
impl OptionTrait for &'static str {}
impl OptionTrait for String {}
impl OptionTrait for bool {}
impl OptionTrait for usize {}
impl OptionTrait for u8 {}
impl OptionTrait for u16 {}
impl OptionTrait for u32 {}
impl OptionTrait for u64 {}
impl OptionTrait for i8 {}
impl OptionTrait for i16 {}
impl OptionTrait for i32 {}
impl OptionTrait for i64 {}
impl OptionTrait for f32 {}
impl OptionTrait for f64 {}

impl Clone for Box<dyn OptionTrait> {
    fn clone(&self) -> Self {
        dyn_clone::clone_box(&**self)
    }
}

/// The outcome of a solve, mirroring the external interface's `ExitCode`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum ExitCode {
    #[default]
    InProgress,
    Sat,
    Unsat,
    Timeout,
    Unknown,
    Error,
    QuitRequested,
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitCode::InProgress => "IN_PROGRESS",
            ExitCode::Sat => "SAT",
            ExitCode::Unsat => "UNSAT",
            ExitCode::Timeout => "TIMEOUT",
            ExitCode::Unknown => "UNKNOWN",
            ExitCode::Error => "ERROR",
            ExitCode::QuitRequested => "QUIT_REQUESTED",
        };
        f.write_str(s)
    }
}

// `build_options!` only parses a `registry_name` argument (its own
// doc-comment example uses `name`, which the macro's `OptionBuilder` input
// struct doesn't actually declare) and always names the struct it emits
// `Options`, regardless of any name given at the call site. `SolverOptions`
// is an alias over that fixed name so the rest of the crate can use a
// descriptive type without fighting the macro.
build_options!(registry_name = OPTION_REGISTRY);
pub type SolverOptions = Options;
