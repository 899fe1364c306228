//! Numeric tolerances and iteration thresholds used throughout the solver.
//!
//! Values mirror a `GlobalConfiguration` struct of tuned defaults; they're
//! carried as fixed magic numbers rather than derived from first principles.

pub const BOUND_COMPARISON_ADDITIVE_TOLERANCE: f64 = 1e-7;

pub const PIVOT_ROW_AND_COLUMN_TOLERANCE: f64 = 0.01;
pub const PIVOT_CHANGE_COLUMN_TOLERANCE: f64 = 1e-9;
pub const ACCEPTABLE_SIMPLEX_PIVOT_THRESHOLD: f64 = 1e-9;
pub const MAX_SIMPLEX_PIVOT_SEARCH_ITERATIONS: usize = 5;

pub const HARRIS_RATIO_ADDITIVE_BASE: f64 = 5e-8;
pub const HARRIS_RATIO_MULTIPLICATIVE_BASE: f64 = 5e-8;

pub const ENTRY_ELIGIBILITY_TOLERANCE: f64 = 1e-8;
pub const COST_FUNCTION_ERROR_THRESHOLD: f64 = 1e-10;

pub const SPARSE_FORREST_TOMLIN_DIAGONAL_ELEMENT_TOLERANCE: f64 = 1e-5;
pub const REFACTORIZATION_THRESHOLD: usize = 100;

pub const PSE_ITERATIONS_BEFORE_RESET: usize = 1000;
pub const PSE_GAMMA_ERROR_THRESHOLD: f64 = 1e-3;
pub const PSE_GAMMA_UPDATE_TOLERANCE: f64 = 1e-9;

pub const DEGRADATION_CHECKING_FREQUENCY: usize = 100;
pub const DEGRADATION_THRESHOLD: f64 = 0.1;

pub const MAX_ITERATIONS_WITHOUT_PROGRESS: usize = 10_000;
pub const BOUND_TIGHTENING_ON_CONSTRAINT_MATRIX_FREQUENCY: usize = 100;
pub const ROW_BOUND_TIGHTENER_SATURATION_ITERATIONS: usize = 20;

pub const RELU_CONSTRAINT_COMPARISON_TOLERANCE: f64 = 1e-3;
pub const ABS_CONSTRAINT_COMPARISON_TOLERANCE: f64 = 1e-3;

pub const PREPROCESSOR_ALMOST_FIXED_THRESHOLD: f64 = 1e-5;
pub const PP_NUM_TIGHTENING_ITERATIONS: usize = 50;

pub const CONSTRAINT_VIOLATION_THRESHOLD: usize = 20;

/// Per-nonlinear-constraint refinement round cap. No per-constraint budget
/// falls out of the global timeout on its own, so this picks a fixed one.
pub const MAX_REFINEMENT_ROUNDS_PER_CONSTRAINT: usize = 5;

pub const DEFAULT_PSE_BETA: f64 = 1.0;

/// How many leading unfixed candidates the `Polarity` split-selection
/// strategy considers before picking the most balanced-around-zero one.
pub const POLARITY_CANDIDATE_WINDOW: usize = 5;

/// Tolerance used by the Engine's own bookkeeping: whether a non-basic sits
/// at its lower bound (vs. its upper bound), and whether the Simplex step
/// made progress against the total infeasibility.
pub const NON_BASIC_AT_LOWER_TOLERANCE: f64 = 1e-9;
pub const PROGRESS_EPSILON: f64 = 1e-9;
pub const DEGENERATE_PIVOT_TOLERANCE: f64 = 1e-9;

/// Default MCMC inverse-temperature for the SoI manager's Metropolis
/// acceptance rule (`exp(-beta * delta_cost)`).
pub const PROBABILITY_DENSITY_PARAMETER: f64 = 4.0;

/// Input-variable count at/above which `Auto` divide strategy prefers
/// Polarity (PL-constraint splitting) over LargestInterval (input bisection).
pub const INTERVAL_SPLITTING_THRESHOLD: usize = 10;

/// `2^INITIAL_DIVIDES` initial subqueries; `2^ONLINE_DIVIDES` children when a
/// subquery times out.
pub const INITIAL_DIVIDES: usize = 0;
pub const ONLINE_DIVIDES: usize = 2;
/// Multiplies a child subquery's timeout relative to its parent's.
pub const TIMEOUT_FACTOR: f64 = 1.5;
