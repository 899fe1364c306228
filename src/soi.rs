//! Sum-of-Infeasibilities phase-pattern search: an alternative to
//! pure Simplex-plus-splitting that maintains a map from constraint to a
//! candidate phase and searches for a zero-cost pattern by local search
//! over that map, rather than case-splitting one constraint at a time.
//!
//! Scoped to the four binary phases (`Active`/`Inactive`/`Positive`/
//! `Negative`: ReLU, LeakyReLU, AbsoluteValue, Sign). `Max`'s `Element(i)`
//! and `Disjunction`'s `Disjunct(i)` need a per-branch index that doesn't
//! fit this pattern's uniform two-candidate flip and are left to ordinary
//! case-splitting instead; since their `cost_component` only ever returns
//! `Some` for those index-carrying phases, they are naturally excluded from
//! the candidate set below rather than special-cased.

use faer::rand::rngs::StdRng;
use faer::rand::{Rng, SeedableRng};
use macros::build_option_enum;

use crate::constants::PROBABILITY_DENSITY_PARAMETER;
use crate::constraints::pl::{Phase, PiecewiseLinearConstraint, PlConstraint};
use crate::{E, I, OptionTrait};

const CANDIDATE_PHASES: [Phase; 4] = [Phase::Active, Phase::Inactive, Phase::Positive, Phase::Negative];
const MAX_ITERATIONS: usize = 1000;
const ZERO_COST_TOLERANCE: E = 1e-9;

/// How the initial phase pattern is seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitStrategy {
    /// Read each constraint's phase directly off the Simplex's current point.
    #[default]
    CurrentAssignment,
    /// Concretize network inputs through a forward pass first. Approximated
    /// here by the same assignment function the caller already has; a
    /// dedicated NLR forward-pass evaluator is out of scope for this module.
    InputAssignment,
}

impl OptionTrait for InitStrategy {}

/// The binary phases a constraint has a SoI cost for. Also used by the
/// Divide-and-Conquer manager's Polarity strategy to find ReLU-like
/// constraints it can score and split on.
pub(crate) fn candidates(constraint: &PlConstraint) -> Vec<Phase> {
    CANDIDATE_PHASES.iter().copied().filter(|&p| constraint.cost_component(p).is_some()).collect()
}

fn phase_cost(constraint: &PlConstraint, phase: Phase, assignment: &dyn Fn(I) -> E) -> E {
    constraint
        .cost_component(phase)
        .map(|terms| terms.iter().map(|&(v, c)| c * assignment(v)).sum())
        .unwrap_or(0.0)
}

/// One candidate phase per constraint with a binary-phase SoI cost; `None`
/// for constraints this search doesn't cover.
#[derive(Debug, Clone)]
pub struct PhasePattern {
    phases: Vec<Option<Phase>>,
}

impl PhasePattern {
    /// Seeds one candidate phase per eligible constraint, preferring
    /// whatever phase `phase_status_in_assignment` reports when it's among
    /// the binary candidates.
    pub fn seed(constraints: &[PlConstraint], assignment: &dyn Fn(I) -> E) -> Self {
        let phases = constraints
            .iter()
            .map(|c| {
                let own = candidates(c);
                if own.is_empty() {
                    return None;
                }
                let natural = c.phase_status_in_assignment(assignment);
                Some(if own.contains(&natural) { natural } else { own[0] })
            })
            .collect();
        Self { phases }
    }

    fn unfixed_indices(&self, constraints: &[PlConstraint]) -> Vec<usize> {
        (0..constraints.len())
            .filter(|&i| self.phases[i].is_some() && !constraints[i].phase_fixed())
            .collect()
    }

    pub fn cost(&self, constraints: &[PlConstraint], assignment: &dyn Fn(I) -> E) -> E {
        self.phases
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.map(|p| phase_cost(&constraints[i], p, assignment)))
            .sum()
    }

    pub fn phase(&self, i: usize) -> Option<Phase> {
        self.phases[i]
    }
}

pub trait SoiSearch {
    fn new() -> Self
    where
        Self: Sized;

    /// Runs local search over `pattern` until it reaches zero cost or
    /// `MAX_ITERATIONS` is exhausted, returning whatever pattern it ends on.
    fn run(&mut self, constraints: &[PlConstraint], assignment: &dyn Fn(I) -> E, pattern: PhasePattern, rng: &mut StdRng) -> PhasePattern;
}

/// Pick a random unfixed constraint, flip to a random other candidate
/// phase, Metropolis-accept with probability `exp(-beta * delta_cost)`.
pub struct Mcmc;

impl SoiSearch for Mcmc {
    fn new() -> Self {
        Self
    }

    fn run(&mut self, constraints: &[PlConstraint], assignment: &dyn Fn(I) -> E, mut pattern: PhasePattern, rng: &mut StdRng) -> PhasePattern {
        let beta = PROBABILITY_DENSITY_PARAMETER;
        for _ in 0..MAX_ITERATIONS {
            if pattern.cost(constraints, assignment).abs() < ZERO_COST_TOLERANCE {
                break;
            }
            let unfixed = pattern.unfixed_indices(constraints);
            if unfixed.is_empty() {
                break;
            }
            let idx = unfixed[rng.gen_range(0..unfixed.len())];
            let current = pattern.phases[idx].unwrap();
            let alternatives: Vec<Phase> = candidates(&constraints[idx]).into_iter().filter(|&p| p != current).collect();
            if alternatives.is_empty() {
                continue;
            }
            let to = alternatives[rng.gen_range(0..alternatives.len())];
            let delta = phase_cost(&constraints[idx], to, assignment) - phase_cost(&constraints[idx], current, assignment);
            if delta <= 0.0 || rng.gen::<E>() < (-beta * delta).exp() {
                pattern.phases[idx] = Some(to);
            }
        }
        pattern
    }
}

/// Flip whichever unfixed constraint's phase change decreases cost the
/// most; fall back to a random flip if no move improves.
pub struct Walksat;

impl SoiSearch for Walksat {
    fn new() -> Self {
        Self
    }

    fn run(&mut self, constraints: &[PlConstraint], assignment: &dyn Fn(I) -> E, mut pattern: PhasePattern, rng: &mut StdRng) -> PhasePattern {
        for _ in 0..MAX_ITERATIONS {
            if pattern.cost(constraints, assignment).abs() < ZERO_COST_TOLERANCE {
                break;
            }
            let unfixed = pattern.unfixed_indices(constraints);
            if unfixed.is_empty() {
                break;
            }

            let mut best: Option<(usize, Phase, E)> = None;
            for &idx in &unfixed {
                let current = pattern.phases[idx].unwrap();
                let current_cost = phase_cost(&constraints[idx], current, assignment);
                for to in candidates(&constraints[idx]) {
                    if to == current {
                        continue;
                    }
                    let delta = phase_cost(&constraints[idx], to, assignment) - current_cost;
                    if best.map_or(true, |(_, _, best_delta)| delta < best_delta) {
                        best = Some((idx, to, delta));
                    }
                }
            }

            match best {
                Some((idx, to, delta)) if delta < 0.0 => {
                    pattern.phases[idx] = Some(to);
                }
                _ => {
                    let idx = unfixed[rng.gen_range(0..unfixed.len())];
                    let current = pattern.phases[idx].unwrap();
                    let alternatives: Vec<Phase> = candidates(&constraints[idx]).into_iter().filter(|&p| p != current).collect();
                    if let Some(&to) = alternatives.first() {
                        pattern.phases[idx] = Some(to);
                    }
                }
            }
        }
        pattern
    }
}

build_option_enum!(
    trait_ = SoiSearch,
    name = "SoiSearchKind",
    variants = (Mcmc, Walksat),
    new_arguments = (),
    doc_header = "Selects the Sum-of-Infeasibilities local-search variant: MCMC (Metropolis-accepted random flips) or Walksat (greedy best-improving flip, falling back to random)."
);

/// Owns the search strategy and RNG for one Divide-and-Conquer worker or
/// main-engine SoI attempt. A worker running Parallel-DeepSoI mode gets its
/// own `SoiManager` seeded independently so its random walk over phase
/// patterns is decorrelated from its siblings'.
pub struct SoiManager {
    search: Box<dyn SoiSearch>,
    init_strategy: InitStrategy,
    rng: StdRng,
}

impl SoiManager {
    pub fn new(search_kind: SoiSearchKind, init_strategy: InitStrategy, seed: u64) -> Self {
        Self {
            search: SoiSearchKind::into_variant(search_kind),
            init_strategy,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Searches for a zero-cost phase pattern. Returns `None` if
    /// `MAX_ITERATIONS` elapses without reaching one; the caller then falls
    /// back to ordinary case-splitting.
    pub fn search(&mut self, constraints: &[PlConstraint], assignment: &dyn Fn(I) -> E) -> Option<PhasePattern> {
        // `InputAssignment` would concretize inputs through a forward pass
        // before seeding; both strategies seed from the same assignment
        // closure here (see `InitStrategy::InputAssignment` doc comment).
        let _ = self.init_strategy;
        let pattern = PhasePattern::seed(constraints, assignment);
        let pattern = self.search.run(constraints, assignment, pattern, &mut self.rng);
        if pattern.cost(constraints, assignment).abs() < ZERO_COST_TOLERANCE {
            Some(pattern)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::pl::ReLU;

    fn relu_pair() -> Vec<PlConstraint> {
        vec![
            PlConstraint::ReLU(ReLU::new(0, 1, None)),
            PlConstraint::ReLU(ReLU::new(2, 3, None)),
        ]
    }

    #[test]
    fn seeds_natural_phase_from_assignment() {
        let constraints = relu_pair();
        let assignment = |v: I| match v {
            0 => 2.0,
            1 => 2.0,
            2 => -1.0,
            3 => 0.0,
            _ => 0.0,
        };
        let pattern = PhasePattern::seed(&constraints, &assignment);
        assert_eq!(pattern.phase(0), Some(Phase::Active));
        assert_eq!(pattern.phase(1), Some(Phase::Inactive));
        assert!(pattern.cost(&constraints, &assignment).abs() < ZERO_COST_TOLERANCE);
    }

    #[test]
    fn mcmc_search_reaches_zero_cost_pattern() {
        let constraints = relu_pair();
        // f already consistent with neither phase for either constraint, so
        // the search must flip at least one of them to reach zero cost.
        let assignment = |v: I| match v {
            0 => 2.0,
            1 => 5.0,
            2 => 3.0,
            3 => 3.0,
            _ => 0.0,
        };
        let mut manager = SoiManager::new(SoiSearchKind::default(), InitStrategy::CurrentAssignment, 7);
        let found = manager.search(&constraints, &assignment);
        assert!(found.is_some());
    }

    #[test]
    fn soi_search_kind_builds_each_variant() {
        for kind in SoiSearchKind::variants {
            let _ = SoiSearchKind::into_variant(kind.clone());
        }
    }
}
