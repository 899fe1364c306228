//! Per-iteration hooks into the main SMT loop, for logging, monitoring,
//! or early stopping.

use macros::build_option_enum;

use crate::SolverOptions;

/// Snapshot of engine progress passed to a [`Callback`] once per main-loop
/// iteration. Distinct from [`crate::model::Statistics`], which is the final
/// report handed back with a solution: this is the live, cheaply-updated
/// counter set the engine already tracks for its own degeneracy and
/// progress checks.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub main_loop_iterations: usize,
    pub simplex_pivots: usize,
    pub degenerate_pivots: usize,
    pub stack_depth: usize,
    pub splits_performed: usize,
    pub pops_performed: usize,
    pub tightenings_applied: usize,
    pub constraints_refined: usize,
    pub current_sum_of_infeasibilities: f64,
}

/// Hook invoked once per solver iteration for logging, monitoring, or early stopping.
pub trait Callback {
    /// Creates a new callback from solver options.
    fn new(options: &SolverOptions) -> Self
    where
        Self: Sized;

    /// Called at the end of each main-loop iteration with the current engine statistics.
    fn call(&mut self, stats: &EngineStats);
}

/// A callback that does nothing. Use when no per-iteration output is needed.
pub struct NoOpCallback {}

impl Callback for NoOpCallback {
    fn new(_options: &SolverOptions) -> Self {
        Self {}
    }

    fn call(&mut self, _stats: &EngineStats) {}
}

/// Prints a one-line progress summary to stdout each iteration.
pub struct ProgressOutput {}

impl Callback for ProgressOutput {
    fn new(_options: &SolverOptions) -> Self {
        Self {}
    }

    fn call(&mut self, stats: &EngineStats) {
        let txt = format!(
            "| {:6} | depth {:4} | pivots {:8} | splits {:6} | tightened {:6} | SoI {:<8.2e} |",
            stats.main_loop_iterations,
            stats.stack_depth,
            stats.simplex_pivots,
            stats.splits_performed,
            stats.tightenings_applied,
            stats.current_sum_of_infeasibilities,
        );
        println!("{}", txt);
    }
}

build_option_enum!(
    trait_ = Callback,
    name = "Callbacks",
    variants = (NoOpCallback, ProgressOutput),
    new_arguments = (&SolverOptions,),
    doc_header = "An enum representing different callbacks for the solver's main loop. Each variant corresponds to a specific reporting strategy."
);
