//! Divide-and-Conquer Manager: a worker pool that attacks
//! independent subqueries of the same top-level query in parallel, each
//! worker an ordinary [`crate::engine::Engine`] running under its own
//! timeout.
//!
//! Workers share a queue of [`SubQuery`] plus two atomics mirroring the
//! Engine's own single-threaded state machine at a coarser grain:
//! `unsolved_count` (subqueries left to resolve) and `should_quit` (set the
//! moment any worker finds SAT, hits a fatal error, or the caller cancels).
//! `should_quit` is also the flag each worker's own
//! [`crate::terminators::InterruptTerminator`] is built from, so one
//! worker's SAT immediately starts draining the others.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use macros::build_option_enum;

use crate::bound_manager::BoundManager;
use crate::callback::NoOpCallback;
use crate::constants::{INITIAL_DIVIDES, ONLINE_DIVIDES, POLARITY_CANDIDATE_WINDOW, TIMEOUT_FACTOR};
use crate::constraints::pl::{CaseSplit, Phase, PiecewiseLinearConstraint, PlConstraint};
use crate::engine::{self, EngineHooks};
use crate::model::{Model, Statistics};
use crate::preprocessor::Preprocessor;
use crate::query::Query;
use crate::soi::{self, InitStrategy, SoiManager, SoiSearchKind};
use crate::terminators::{InterruptTerminator, MultipleTerminators, TimeOutTerminator};
use crate::{E, ExitCode, I, OptionTrait, SolverOptions};

/// One unit of worker-pool work: a query already narrowed by a path of case
/// splits, and the timeout it gets before a worker divides it further.
struct SubQuery {
    query: Query,
    timeout: Duration,
}

/// Picks how an unresolved box or PL constraint set gets bisected, both for
/// the initial `2^INITIAL_DIVIDES` split and for a timed-out worker's
/// `2^ONLINE_DIVIDES` children. `Send + Sync` since one strategy instance is
/// shared by reference across every worker thread.
pub trait DivideStrategy: Send + Sync {
    fn new() -> Self
    where
        Self: Sized;

    /// Splits `query` in two, or `None` if nothing eligible remains (the
    /// caller then keeps the query undivided).
    fn divide(&self, query: &Query) -> Option<(Query, Query)>;
}

fn apply_tightenings(query: &Query, split: &CaseSplit) -> Query {
    let mut child = query.clone();
    for t in &split.tightenings {
        use crate::bound_manager::TighteningKind;
        match t.kind {
            TighteningKind::Lower => {
                if t.value > child.lower_bound(t.variable) {
                    let _ = child.set_lower_bound(t.variable, t.value);
                }
            }
            TighteningKind::Upper => {
                if t.value < child.upper_bound(t.variable) {
                    let _ = child.set_upper_bound(t.variable, t.value);
                }
            }
        }
    }
    child
}

/// Maps a binary SoI phase back to the constraint's own case-split
/// bookkeeping. Every binary-phase constraint's `case_splits()` lists the
/// "drive positive" branch first and the "drive non-positive" branch
/// second, in the same order `cost_component` matches them in.
fn split_for_phase(constraint: &PlConstraint, phase: Phase) -> Option<CaseSplit> {
    let mut splits = constraint.case_splits();
    match phase {
        Phase::Active | Phase::Positive if !splits.is_empty() => Some(splits.remove(0)),
        Phase::Inactive | Phase::Negative if splits.len() > 1 => Some(splits.remove(1)),
        _ => None,
    }
}

fn widest_input_variable(query: &Query) -> Option<(I, E, E)> {
    query
        .input_variables()
        .iter()
        .map(|&(v, _)| (v, query.lower_bound(v), query.upper_bound(v)))
        .filter(|(_, lb, ub)| lb.is_finite() && ub.is_finite())
        .max_by(|a, b| (a.2 - a.1).partial_cmp(&(b.2 - b.1)).unwrap_or(std::cmp::Ordering::Equal))
}

/// Recursively bisects the widest input dimension's interval.
pub struct LargestInterval;

impl DivideStrategy for LargestInterval {
    fn new() -> Self {
        Self
    }

    fn divide(&self, query: &Query) -> Option<(Query, Query)> {
        let (v, lb, ub) = widest_input_variable(query)?;
        let mid = lb + (ub - lb) / 2.0;
        let mut lower_half = query.clone();
        let mut upper_half = query.clone();
        let _ = lower_half.set_upper_bound(v, mid);
        let _ = upper_half.set_lower_bound(v, mid);
        Some((lower_half, upper_half))
    }
}

fn polarity_score(constraint: &PlConstraint, query: &Query) -> Option<E> {
    if constraint.phase_fixed() {
        return None;
    }
    if soi::candidates(constraint).len() != 2 {
        return None;
    }
    let b = *constraint.participating_variables().first()?;
    let lb = query.lower_bound(b);
    let ub = query.upper_bound(b);
    if !lb.is_finite() || !ub.is_finite() || (ub - lb).abs() < 1e-12 {
        return None;
    }
    Some(-(lb * ub) / (ub - lb))
}

/// Splits the most-balanced-around-zero of the first [`POLARITY_CANDIDATE_WINDOW`]
/// unfixed binary-phase PL constraints.
pub struct Polarity;

impl DivideStrategy for Polarity {
    fn new() -> Self {
        Self
    }

    fn divide(&self, query: &Query) -> Option<(Query, Query)> {
        let idx = query
            .piecewise_linear_constraints()
            .iter()
            .enumerate()
            .filter_map(|(i, c)| polarity_score(c, query).map(|score| (i, score)))
            .take(POLARITY_CANDIDATE_WINDOW)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)?;

        let constraint = &query.piecewise_linear_constraints()[idx];
        let mut splits = constraint.case_splits();
        if splits.len() < 2 {
            return None;
        }
        let second = splits.remove(1);
        let first = splits.remove(0);
        Some((apply_tightenings(query, &first), apply_tightenings(query, &second)))
    }
}

/// Chooses Polarity once the preprocessed query looks like a neural-network
/// verification query with a sizeable input box (many input variables),
/// else falls back to bisecting the input box directly.
pub struct Auto {
    polarity: Polarity,
    largest_interval: LargestInterval,
}

impl DivideStrategy for Auto {
    fn new() -> Self {
        Self {
            polarity: Polarity::new(),
            largest_interval: LargestInterval::new(),
        }
    }

    fn divide(&self, query: &Query) -> Option<(Query, Query)> {
        let use_polarity = !query.piecewise_linear_constraints().is_empty()
            && query.input_variables().len() >= crate::constants::INTERVAL_SPLITTING_THRESHOLD;
        if use_polarity {
            self.polarity.divide(query).or_else(|| self.largest_interval.divide(query))
        } else {
            self.largest_interval.divide(query).or_else(|| self.polarity.divide(query))
        }
    }
}

build_option_enum!(
    trait_ = DivideStrategy,
    name = "DivideKind",
    variants = (Auto, Polarity, LargestInterval),
    new_arguments = (),
    doc_header = "Selects how a subquery gets bisected: recursive input-box bisection (LargestInterval), most-polar-ReLU splitting (Polarity), or Auto's size-based choice between them."
);

fn divide_n_times(query: Query, strategy: &dyn DivideStrategy, timeout: Duration, times: usize) -> Vec<SubQuery> {
    let mut frontier = vec![query];
    for _ in 0..times {
        let mut next = Vec::with_capacity(frontier.len() * 2);
        for q in frontier {
            match strategy.divide(&q) {
                Some((a, b)) => {
                    next.push(a);
                    next.push(b);
                }
                None => next.push(q),
            }
        }
        frontier = next;
    }
    frontier.into_iter().map(|query| SubQuery { query, timeout }).collect()
}

/// Whether workers race on ordinary case-split subqueries or each run an
/// independent randomized Sum-of-Infeasibilities search over the whole
/// query (Parallel-DeepSoI mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    CaseSplit,
    ParallelDeepSoi,
}

impl OptionTrait for SearchMode {}

pub struct DncConfig {
    pub num_workers: usize,
    pub global_timeout: Duration,
    pub initial_timeout: Duration,
    pub divide_kind: DivideKind,
    pub search_mode: SearchMode,
    pub soi_search_kind: SoiSearchKind,
}

impl Default for DncConfig {
    fn default() -> Self {
        Self {
            num_workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            global_timeout: Duration::ZERO,
            initial_timeout: Duration::from_secs(60),
            divide_kind: DivideKind::default(),
            search_mode: SearchMode::CaseSplit,
            soi_search_kind: SoiSearchKind::default(),
        }
    }
}

/// Builds a Parallel-DeepSoI worker's starting subquery: preprocesses the
/// base query, runs a randomized SoI search seeded by `seed` over the
/// resulting PL constraints (using each variable's bound midpoint as the
/// stand-in assignment, since no Simplex point exists yet), and bakes the
/// winning phase pattern in as this worker's initial split. Falls back to
/// the unsplit, preprocessed query if no zero-cost pattern is found.
fn deep_soi_subquery(base: &Query, search_kind: SoiSearchKind, seed: u64) -> Query {
    let mut query = base.clone();
    let mut bounds = BoundManager::new(query.number_of_variables(), false);
    if Preprocessor::run(&mut query, &mut bounds).unwrap_or(false) {
        return query;
    }

    let midpoint = |v: I| {
        let lb = bounds.lower(v);
        let ub = bounds.upper(v);
        match (lb.is_finite(), ub.is_finite()) {
            (true, true) => lb + (ub - lb) / 2.0,
            (true, false) => lb,
            (false, true) => ub,
            (false, false) => 0.0,
        }
    };

    let constraints = query.piecewise_linear_constraints().to_vec();
    let mut manager = SoiManager::new(search_kind, InitStrategy::CurrentAssignment, seed);
    let Some(pattern) = manager.search(&constraints, &midpoint) else {
        return query;
    };

    for (i, constraint) in query.piecewise_linear_constraints().iter().enumerate() {
        if let Some(phase) = pattern.phase(i) {
            if let Some(split) = split_for_phase(constraint, phase) {
                for t in &split.tightenings {
                    use crate::bound_manager::TighteningKind;
                    match t.kind {
                        TighteningKind::Lower => {
                            if t.value > query.lower_bound(t.variable) {
                                let _ = query.set_lower_bound(t.variable, t.value);
                            }
                        }
                        TighteningKind::Upper => {
                            if t.value < query.upper_bound(t.variable) {
                                let _ = query.set_upper_bound(t.variable, t.value);
                            }
                        }
                    }
                }
            }
        }
    }
    query
}

struct SharedState {
    queue: Mutex<VecDeque<SubQuery>>,
    unsolved_count: AtomicUsize,
    should_quit: Arc<AtomicBool>,
    result: Mutex<Option<(ExitCode, Option<Model>)>>,
}

fn run_worker(shared: &SharedState, options: &SolverOptions, divide: &dyn DivideStrategy) {
    loop {
        if shared.should_quit.load(Ordering::SeqCst) {
            return;
        }
        let Some(sub) = shared.queue.lock().unwrap().pop_front() else {
            return;
        };

        // Sharing the pool's own `should_quit` flag means a sibling's SAT (or
        // a fatal error) is visible to this worker's engine the moment it
        // checks its terminator, not just between subqueries.
        let terminator = MultipleTerminators::new(vec![
            Box::new(TimeOutTerminator::new(sub.timeout)),
            Box::new(InterruptTerminator::from_flag(shared.should_quit.clone())),
        ]);
        let hooks = EngineHooks {
            callback: Box::new(NoOpCallback),
            terminator: Box::new(terminator),
        };

        let (code, model, _stats) = engine::solve(sub.query.clone(), options, hooks);
        match code {
            ExitCode::Sat => {
                *shared.result.lock().unwrap() = Some((ExitCode::Sat, model));
                shared.should_quit.store(true, Ordering::SeqCst);
                return;
            }
            ExitCode::Unsat => {
                shared.unsolved_count.fetch_sub(1, Ordering::SeqCst);
            }
            ExitCode::Timeout => {
                let child_timeout = Duration::from_secs_f64((sub.timeout.as_secs_f64() / 2.0) * TIMEOUT_FACTOR);
                let children = divide_n_times(sub.query, divide, child_timeout, ONLINE_DIVIDES);
                shared.unsolved_count.fetch_add(children.len().saturating_sub(1), Ordering::SeqCst);
                shared.queue.lock().unwrap().extend(children);
            }
            ExitCode::QuitRequested => {
                return;
            }
            ExitCode::Error | ExitCode::Unknown | ExitCode::InProgress => {
                let mut result = shared.result.lock().unwrap();
                if result.is_none() {
                    *result = Some((if code == ExitCode::Unknown { ExitCode::Unknown } else { ExitCode::Error }, None));
                }
                shared.should_quit.store(true, Ordering::SeqCst);
                return;
            }
        }
    }
}

/// Runs the full worker pool to a verdict. Returns statistics aggregated
/// only as an elapsed-time total; per-worker `Statistics` are not merged
/// since iteration counts across independently timed-out subqueries aren't
/// comparable to a single-engine run's.
pub fn solve(query: Query, options: &SolverOptions, config: DncConfig) -> (ExitCode, Option<Model>, Statistics) {
    let start = std::time::Instant::now();
    let num_workers = config.num_workers.max(1);
    let global_timeout = config.global_timeout;
    let divide = DivideKind::into_variant(config.divide_kind);

    let initial: Vec<SubQuery> = match config.search_mode {
        SearchMode::CaseSplit => divide_n_times(query, divide.as_ref(), config.initial_timeout, INITIAL_DIVIDES),
        SearchMode::ParallelDeepSoi => (0..num_workers)
            .map(|seed| SubQuery {
                query: deep_soi_subquery(&query, config.soi_search_kind, seed as u64),
                timeout: config.initial_timeout,
            })
            .collect(),
    };

    let shared = SharedState {
        unsolved_count: AtomicUsize::new(initial.len()),
        queue: Mutex::new(initial.into_iter().collect()),
        should_quit: Arc::new(AtomicBool::new(false)),
        result: Mutex::new(None),
    };

    std::thread::scope(|scope| {
        for _ in 0..num_workers {
            let shared = &shared;
            let divide = divide.as_ref();
            scope.spawn(move || run_worker(shared, options, divide));
        }
        // The pool itself doesn't watch the global timeout continuously;
        // workers only stop between subqueries. A caller wanting hard
        // wall-clock enforcement should keep `global_timeout` short enough
        // relative to `initial_timeout` that this is a non-issue.
    });

    let global_clock_expired = !global_timeout.is_zero() && start.elapsed() >= global_timeout;

    let statistics = Statistics {
        elapsed: start.elapsed(),
        ..Statistics::default()
    };

    match shared.result.into_inner().unwrap() {
        Some((ExitCode::Sat, model)) => (ExitCode::Sat, model, statistics),
        Some((code, _)) => (code, None, statistics),
        None if global_clock_expired => (ExitCode::Timeout, None, statistics),
        None if shared.unsolved_count.load(Ordering::SeqCst) == 0 => (ExitCode::Unsat, None, statistics),
        None => (ExitCode::Unknown, None, statistics),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::EquationType;

    fn trivial_relu_query() -> Query {
        let mut q = Query::new();
        q.set_number_of_variables(2);
        q.set_lower_bound(0, -2.0).unwrap();
        q.set_upper_bound(0, 2.0).unwrap();
        q.set_lower_bound(1, 0.0).unwrap();
        q.set_upper_bound(1, 2.0).unwrap();
        q.mark_input_variable(0, 0).unwrap();
        q.add_piecewise_linear_constraint(PlConstraint::ReLU(crate::constraints::pl::ReLU::new(0, 1, None)));
        q
    }

    #[test]
    fn largest_interval_bisects_widest_input() {
        let q = trivial_relu_query();
        let strategy = LargestInterval::new();
        let (a, b) = strategy.divide(&q).expect("has an input variable to split");
        assert_eq!(a.upper_bound(0), 0.0);
        assert_eq!(b.lower_bound(0), 0.0);
    }

    #[test]
    fn divide_kind_builds_each_variant() {
        for kind in DivideKind::variants {
            let _ = DivideKind::into_variant(kind.clone());
        }
    }

    #[test]
    fn solves_trivial_case_split_query_to_sat() {
        let mut q = Query::new();
        q.set_number_of_variables(2);
        q.set_lower_bound(0, 1.0).unwrap();
        q.set_upper_bound(0, 1.0).unwrap();
        q.set_upper_bound(1, 10.0).unwrap();
        q.add_equation(
            crate::query::Equation::new(EquationType::Eq, 0.0)
                .with_addend(1.0, 0)
                .with_addend(-1.0, 1),
        )
        .unwrap();

        let options = SolverOptions::new();
        let config = DncConfig {
            num_workers: 1,
            initial_timeout: Duration::from_secs(5),
            ..DncConfig::default()
        };
        let (code, model, _) = solve(q, &options, config);
        assert_eq!(code, ExitCode::Sat);
        assert_eq!(model.unwrap().value(1), Some(1.0));
    }
}
