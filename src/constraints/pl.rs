//! Piecewise-linear constraint variants.

use enum_dispatch::enum_dispatch;

use crate::bound_manager::{Tightening, TighteningKind};
use crate::constants::{ABS_CONSTRAINT_COMPARISON_TOLERANCE, RELU_CONSTRAINT_COMPARISON_TOLERANCE};
use crate::query::Equation;
use crate::{E, I};

/// A constraint's current known branch. Only the variants relevant to a
/// given constraint kind are ever produced by it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    NotFixed,
    Active,
    Inactive,
    Positive,
    Negative,
    /// For `Max`: the index (into its element list) attaining the maximum.
    Element(usize),
    /// For `Disjunction`: the chosen disjunct index.
    Disjunct(usize),
}

/// An immutable bundle of tightenings plus zero or more new equations.
/// Applying a split is equivalent to unioning these with the current query.
#[derive(Debug, Clone, Default)]
pub struct CaseSplit {
    pub tightenings: Vec<Tightening>,
    pub equations: Vec<Equation>,
    /// Set for a [`Max`] split: the element index this branch fixes as the
    /// maximum. `None` for splits that are purely bound tightenings.
    pub element: Option<usize>,
}

impl CaseSplit {
    pub fn with_tightenings(tightenings: Vec<Tightening>) -> Self {
        Self {
            tightenings,
            equations: Vec::new(),
            element: None,
        }
    }
}

fn lb_tightening(v: I, x: E) -> Tightening {
    Tightening {
        variable: v,
        value: x,
        kind: TighteningKind::Lower,
    }
}

fn ub_tightening(v: I, x: E) -> Tightening {
    Tightening {
        variable: v,
        value: x,
        kind: TighteningKind::Upper,
    }
}

#[enum_dispatch]
pub trait PiecewiseLinearConstraint {
    fn participating_variables(&self) -> Vec<I>;

    /// Receives a tightened bound; may mark the phase fixed.
    fn notify_lower_bound(&mut self, v: I, x: E);
    fn notify_upper_bound(&mut self, v: I, x: E);

    fn phase_fixed(&self) -> bool;
    fn phase(&self) -> Phase;

    fn case_splits(&self) -> Vec<CaseSplit>;

    /// The single split corresponding to the current phase; `None` unless
    /// `phase_fixed()`.
    fn valid_case_split(&self) -> Option<CaseSplit>;

    fn entailed_tightenings(&self) -> Vec<Tightening>;

    fn satisfied(&self, assignment: &dyn Fn(I) -> E) -> bool;

    /// SoI cost component for the given phase, as a linear expression
    /// `Σ coeff·x`, or `None` if this phase has no natural SoI cost.
    fn cost_component(&self, phase: Phase) -> Option<Vec<(I, E)>>;

    fn phase_status_in_assignment(&self, assignment: &dyn Fn(I) -> E) -> Phase;

    fn constraint_obsolete(&self) -> bool {
        false
    }

    /// Called by the preprocessor when `v` has been eliminated at `value`.
    fn eliminate_variable(&mut self, v: I, value: E);
}

#[derive(Debug, Clone)]
pub struct ReLU {
    pub b: I,
    pub f: I,
    pub aux: Option<I>,
    phase: Phase,
    lb_b: E,
    ub_b: E,
    lb_f: E,
    ub_f: E,
    ub_aux: E,
    lb_aux: E,
    obsolete: bool,
}

impl ReLU {
    pub fn new(b: I, f: I, aux: Option<I>) -> Self {
        Self {
            b,
            f,
            aux,
            phase: Phase::NotFixed,
            lb_b: E::NEG_INFINITY,
            ub_b: E::INFINITY,
            lb_f: E::NEG_INFINITY,
            ub_f: E::INFINITY,
            lb_aux: E::NEG_INFINITY,
            ub_aux: E::INFINITY,
            obsolete: false,
        }
    }

    fn recheck_phase(&mut self) {
        if self.phase != Phase::NotFixed {
            return;
        }
        if self.lb_b >= 0.0 || self.lb_f > 0.0 || self.ub_aux == 0.0 {
            self.phase = Phase::Active;
        } else if self.ub_b <= 0.0 || self.ub_f == 0.0 || self.lb_aux > 0.0 {
            self.phase = Phase::Inactive;
        }
    }
}

impl PiecewiseLinearConstraint for ReLU {
    fn participating_variables(&self) -> Vec<I> {
        let mut vars = vec![self.b, self.f];
        if let Some(aux) = self.aux {
            vars.push(aux);
        }
        vars
    }

    fn notify_lower_bound(&mut self, v: I, x: E) {
        if v == self.b && x > self.lb_b {
            self.lb_b = x;
        } else if v == self.f && x > self.lb_f {
            self.lb_f = x;
        } else if Some(v) == self.aux && x > self.lb_aux {
            self.lb_aux = x;
        }
        self.recheck_phase();
    }

    fn notify_upper_bound(&mut self, v: I, x: E) {
        if v == self.b && x < self.ub_b {
            self.ub_b = x;
        } else if v == self.f && x < self.ub_f {
            self.ub_f = x;
        } else if Some(v) == self.aux && x < self.ub_aux {
            self.ub_aux = x;
        }
        self.recheck_phase();
    }

    fn phase_fixed(&self) -> bool {
        self.phase != Phase::NotFixed
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn case_splits(&self) -> Vec<CaseSplit> {
        vec![
            CaseSplit::with_tightenings(vec![lb_tightening(self.b, 0.0)]),
            CaseSplit::with_tightenings(vec![ub_tightening(self.b, 0.0), ub_tightening(self.f, 0.0)]),
        ]
    }

    fn valid_case_split(&self) -> Option<CaseSplit> {
        match self.phase {
            Phase::Active => Some(CaseSplit::with_tightenings(vec![lb_tightening(self.b, 0.0)])),
            Phase::Inactive => Some(CaseSplit::with_tightenings(vec![
                ub_tightening(self.b, 0.0),
                ub_tightening(self.f, 0.0),
            ])),
            _ => None,
        }
    }

    fn entailed_tightenings(&self) -> Vec<Tightening> {
        let mut out = Vec::new();
        match self.phase {
            Phase::Active => {
                out.push(lb_tightening(self.f, self.lb_b.max(0.0)));
                out.push(ub_tightening(self.f, self.ub_b));
                if let Some(aux) = self.aux {
                    out.push(ub_tightening(aux, 0.0));
                }
            }
            Phase::Inactive => {
                out.push(lb_tightening(self.f, 0.0));
                out.push(ub_tightening(self.f, 0.0));
                if let Some(aux) = self.aux {
                    out.push(lb_tightening(aux, (-self.ub_b).max(0.0)));
                }
            }
            Phase::NotFixed => {
                out.push(ub_tightening(self.f, self.ub_b.max(0.0)));
                out.push(lb_tightening(self.f, 0.0));
            }
            _ => {}
        }
        out
    }

    fn satisfied(&self, assignment: &dyn Fn(I) -> E) -> bool {
        let b = assignment(self.b);
        let f = assignment(self.f);
        (f - b.max(0.0)).abs() <= RELU_CONSTRAINT_COMPARISON_TOLERANCE
    }

    fn cost_component(&self, phase: Phase) -> Option<Vec<(I, E)>> {
        match phase {
            Phase::Active => Some(vec![(self.f, 1.0), (self.b, -1.0)]),
            Phase::Inactive => Some(vec![(self.f, 1.0)]),
            _ => None,
        }
    }

    fn phase_status_in_assignment(&self, assignment: &dyn Fn(I) -> E) -> Phase {
        if assignment(self.b) >= 0.0 {
            Phase::Active
        } else {
            Phase::Inactive
        }
    }

    fn constraint_obsolete(&self) -> bool {
        self.obsolete
    }

    fn eliminate_variable(&mut self, v: I, value: E) {
        if v == self.b {
            if value >= 0.0 {
                self.phase = Phase::Active;
            } else {
                self.phase = Phase::Inactive;
            }
            self.obsolete = true;
        } else if v == self.f || Some(v) == self.aux {
            self.obsolete = true;
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeakyReLU {
    pub b: I,
    pub f: I,
    pub slope: E,
    phase: Phase,
    lb_b: E,
    ub_b: E,
    obsolete: bool,
}

impl LeakyReLU {
    pub fn new(b: I, f: I, slope: E) -> Self {
        Self {
            b,
            f,
            slope,
            phase: Phase::NotFixed,
            lb_b: E::NEG_INFINITY,
            ub_b: E::INFINITY,
            obsolete: false,
        }
    }
}

impl PiecewiseLinearConstraint for LeakyReLU {
    fn participating_variables(&self) -> Vec<I> {
        vec![self.b, self.f]
    }

    fn notify_lower_bound(&mut self, v: I, x: E) {
        if v == self.b && x > self.lb_b {
            self.lb_b = x;
        }
        if self.phase == Phase::NotFixed && self.lb_b >= 0.0 {
            self.phase = Phase::Active;
        }
    }

    fn notify_upper_bound(&mut self, v: I, x: E) {
        if v == self.b && x < self.ub_b {
            self.ub_b = x;
        }
        if self.phase == Phase::NotFixed && self.ub_b <= 0.0 {
            self.phase = Phase::Inactive;
        }
    }

    fn phase_fixed(&self) -> bool {
        self.phase != Phase::NotFixed
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn case_splits(&self) -> Vec<CaseSplit> {
        vec![
            CaseSplit::with_tightenings(vec![lb_tightening(self.b, 0.0)]),
            CaseSplit::with_tightenings(vec![ub_tightening(self.b, 0.0)]),
        ]
    }

    fn valid_case_split(&self) -> Option<CaseSplit> {
        match self.phase {
            Phase::Active => Some(CaseSplit::with_tightenings(vec![lb_tightening(self.b, 0.0)])),
            Phase::Inactive => Some(CaseSplit::with_tightenings(vec![ub_tightening(self.b, 0.0)])),
            _ => None,
        }
    }

    fn entailed_tightenings(&self) -> Vec<Tightening> {
        match self.phase {
            Phase::Active => vec![lb_tightening(self.f, self.lb_b.max(0.0)), ub_tightening(self.f, self.ub_b)],
            Phase::Inactive => vec![
                lb_tightening(self.f, self.slope * self.lb_b),
                ub_tightening(self.f, self.slope * self.ub_b),
            ],
            Phase::NotFixed => Vec::new(),
            _ => Vec::new(),
        }
    }

    fn satisfied(&self, assignment: &dyn Fn(I) -> E) -> bool {
        let b = assignment(self.b);
        let f = assignment(self.f);
        let expected = if b >= 0.0 { b } else { self.slope * b };
        (f - expected).abs() <= RELU_CONSTRAINT_COMPARISON_TOLERANCE
    }

    fn cost_component(&self, phase: Phase) -> Option<Vec<(I, E)>> {
        match phase {
            Phase::Active => Some(vec![(self.f, 1.0), (self.b, -1.0)]),
            Phase::Inactive => Some(vec![(self.f, 1.0), (self.b, -self.slope)]),
            _ => None,
        }
    }

    fn phase_status_in_assignment(&self, assignment: &dyn Fn(I) -> E) -> Phase {
        if assignment(self.b) >= 0.0 {
            Phase::Active
        } else {
            Phase::Inactive
        }
    }

    fn constraint_obsolete(&self) -> bool {
        self.obsolete
    }

    fn eliminate_variable(&mut self, v: I, value: E) {
        if v == self.b {
            self.phase = if value >= 0.0 { Phase::Active } else { Phase::Inactive };
            self.obsolete = true;
        } else if v == self.f {
            self.obsolete = true;
        }
    }
}

#[derive(Debug, Clone)]
pub struct AbsoluteValue {
    pub b: I,
    pub f: I,
    /// `pos - neg = b, pos + neg = f`, introduced by the preprocessor.
    pub pos: Option<I>,
    pub neg: Option<I>,
    phase: Phase,
    lb_b: E,
    ub_b: E,
    lb_f: E,
    obsolete: bool,
}

impl AbsoluteValue {
    pub fn new(b: I, f: I) -> Self {
        Self {
            b,
            f,
            pos: None,
            neg: None,
            phase: Phase::NotFixed,
            lb_b: E::NEG_INFINITY,
            ub_b: E::INFINITY,
            lb_f: E::NEG_INFINITY,
            obsolete: false,
        }
    }

    pub fn set_aux(&mut self, pos: I, neg: I) {
        self.pos = Some(pos);
        self.neg = Some(neg);
    }
}

impl PiecewiseLinearConstraint for AbsoluteValue {
    fn participating_variables(&self) -> Vec<I> {
        vec![self.b, self.f]
    }

    fn notify_lower_bound(&mut self, v: I, x: E) {
        if v == self.b && x > self.lb_b {
            self.lb_b = x;
        } else if v == self.f && x > self.lb_f {
            self.lb_f = x;
        }
        if self.phase == Phase::NotFixed {
            if self.lb_b >= 0.0 {
                self.phase = Phase::Positive;
            } else if self.lb_f > self.ub_b {
                self.phase = Phase::Negative;
            }
        }
    }

    fn notify_upper_bound(&mut self, v: I, x: E) {
        if v == self.b && x < self.ub_b {
            self.ub_b = x;
        }
        if self.phase == Phase::NotFixed && self.ub_b <= 0.0 {
            self.phase = Phase::Negative;
        }
    }

    fn phase_fixed(&self) -> bool {
        self.phase != Phase::NotFixed
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn case_splits(&self) -> Vec<CaseSplit> {
        vec![
            CaseSplit::with_tightenings(vec![lb_tightening(self.b, 0.0)]),
            CaseSplit::with_tightenings(vec![ub_tightening(self.b, 0.0)]),
        ]
    }

    fn valid_case_split(&self) -> Option<CaseSplit> {
        match self.phase {
            Phase::Positive => Some(CaseSplit::with_tightenings(vec![lb_tightening(self.b, 0.0)])),
            Phase::Negative => Some(CaseSplit::with_tightenings(vec![ub_tightening(self.b, 0.0)])),
            _ => None,
        }
    }

    fn entailed_tightenings(&self) -> Vec<Tightening> {
        let mut out = vec![
            ub_tightening(self.f, self.ub_b.abs().max(self.lb_b.abs())),
            lb_tightening(self.f, 0.0),
        ];
        match self.phase {
            Phase::Positive => out.push(lb_tightening(self.f, self.lb_b.max(0.0))),
            Phase::Negative => out.push(lb_tightening(self.f, (-self.ub_b).max(0.0))),
            _ => {}
        }
        out
    }

    fn satisfied(&self, assignment: &dyn Fn(I) -> E) -> bool {
        let b = assignment(self.b);
        let f = assignment(self.f);
        (f - b.abs()).abs() <= ABS_CONSTRAINT_COMPARISON_TOLERANCE
    }

    fn cost_component(&self, phase: Phase) -> Option<Vec<(I, E)>> {
        match phase {
            Phase::Positive => Some(vec![(self.f, 1.0), (self.b, -1.0)]),
            Phase::Negative => Some(vec![(self.f, 1.0), (self.b, 1.0)]),
            _ => None,
        }
    }

    fn phase_status_in_assignment(&self, assignment: &dyn Fn(I) -> E) -> Phase {
        if assignment(self.b) >= 0.0 {
            Phase::Positive
        } else {
            Phase::Negative
        }
    }

    fn constraint_obsolete(&self) -> bool {
        self.obsolete
    }

    fn eliminate_variable(&mut self, v: I, value: E) {
        if v == self.b {
            self.phase = if value >= 0.0 { Phase::Positive } else { Phase::Negative };
            self.obsolete = true;
        } else if v == self.f {
            self.obsolete = true;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sign {
    pub b: I,
    pub f: I,
    phase: Phase,
    lb_b: E,
    ub_b: E,
    obsolete: bool,
}

impl Sign {
    pub fn new(b: I, f: I) -> Self {
        Self {
            b,
            f,
            phase: Phase::NotFixed,
            lb_b: E::NEG_INFINITY,
            ub_b: E::INFINITY,
            obsolete: false,
        }
    }
}

impl PiecewiseLinearConstraint for Sign {
    fn participating_variables(&self) -> Vec<I> {
        vec![self.b, self.f]
    }

    fn notify_lower_bound(&mut self, v: I, x: E) {
        if v == self.b && x > self.lb_b {
            self.lb_b = x;
        }
        if self.phase == Phase::NotFixed && self.lb_b >= 0.0 {
            self.phase = Phase::Positive;
        }
    }

    fn notify_upper_bound(&mut self, v: I, x: E) {
        if v == self.b && x < self.ub_b {
            self.ub_b = x;
        }
        if self.phase == Phase::NotFixed && self.ub_b < 0.0 {
            self.phase = Phase::Negative;
        }
    }

    fn phase_fixed(&self) -> bool {
        self.phase != Phase::NotFixed
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn case_splits(&self) -> Vec<CaseSplit> {
        vec![
            CaseSplit::with_tightenings(vec![lb_tightening(self.b, 0.0)]),
            CaseSplit::with_tightenings(vec![ub_tightening(self.b, 0.0)]),
        ]
    }

    fn valid_case_split(&self) -> Option<CaseSplit> {
        match self.phase {
            Phase::Positive => Some(CaseSplit::with_tightenings(vec![lb_tightening(self.b, 0.0)])),
            Phase::Negative => Some(CaseSplit::with_tightenings(vec![ub_tightening(self.b, 0.0)])),
            _ => None,
        }
    }

    fn entailed_tightenings(&self) -> Vec<Tightening> {
        match self.phase {
            Phase::Positive => vec![lb_tightening(self.f, 1.0), ub_tightening(self.f, 1.0)],
            Phase::Negative => vec![lb_tightening(self.f, -1.0), ub_tightening(self.f, -1.0)],
            _ => Vec::new(),
        }
    }

    fn satisfied(&self, assignment: &dyn Fn(I) -> E) -> bool {
        let b = assignment(self.b);
        let f = assignment(self.f);
        let expected = if b >= 0.0 { 1.0 } else { -1.0 };
        (f - expected).abs() <= RELU_CONSTRAINT_COMPARISON_TOLERANCE
    }

    fn cost_component(&self, _phase: Phase) -> Option<Vec<(I, E)>> {
        None
    }

    fn phase_status_in_assignment(&self, assignment: &dyn Fn(I) -> E) -> Phase {
        if assignment(self.b) >= 0.0 {
            Phase::Positive
        } else {
            Phase::Negative
        }
    }

    fn constraint_obsolete(&self) -> bool {
        self.obsolete
    }

    fn eliminate_variable(&mut self, v: I, value: E) {
        if v == self.b {
            self.phase = if value >= 0.0 { Phase::Positive } else { Phase::Negative };
            self.obsolete = true;
        } else if v == self.f {
            self.obsolete = true;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Max {
    pub f: I,
    pub elements: Vec<I>,
    /// One non-negative slack per element, `s_i = f - elements[i]`,
    /// introduced by the preprocessor alongside the equation that ties it to
    /// `f`. Pinning `s_i` to `0` is what actually forces `f = elements[i]`
    /// through the tableau once element `i` is known to win; `None` before
    /// preprocessing has run.
    pub slacks: Option<Vec<I>>,
    phase: Phase,
    lb: Vec<E>,
    ub: Vec<E>,
    pruned: Vec<bool>,
    obsolete: bool,
}

impl Max {
    pub fn new(f: I, elements: Vec<I>) -> Self {
        let n = elements.len();
        Self {
            f,
            elements,
            slacks: None,
            phase: Phase::NotFixed,
            lb: vec![E::NEG_INFINITY; n],
            ub: vec![E::INFINITY; n],
            pruned: vec![false; n],
            obsolete: false,
        }
    }

    pub fn set_slacks(&mut self, slacks: Vec<I>) {
        self.slacks = Some(slacks);
    }

    fn index_of(&self, v: I) -> Option<usize> {
        self.elements.iter().position(|&e| e == v)
    }

    /// The commit-to-element-`i` branch: tightening `s_i`'s upper bound to
    /// `0` (combined with its preexisting `s_i >= 0` and the preprocessor's
    /// `f - elements[i] - s_i = 0` equation) pins `f = elements[i]` exactly.
    /// `None` before the preprocessor has introduced the slacks.
    fn commit_tightening(&self, i: usize) -> Option<Tightening> {
        self.slacks.as_ref().map(|slacks| ub_tightening(slacks[i], 0.0))
    }

    fn prune(&mut self) {
        let max_lb = self
            .lb
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.pruned[*i])
            .map(|(_, &x)| x)
            .fold(E::NEG_INFINITY, E::max);
        for i in 0..self.elements.len() {
            if !self.pruned[i] && self.ub[i] < max_lb {
                self.pruned[i] = true;
            }
        }
        let remaining: Vec<usize> = (0..self.elements.len()).filter(|i| !self.pruned[*i]).collect();
        if remaining.len() == 1 {
            self.phase = Phase::Element(remaining[0]);
        }
    }
}

impl PiecewiseLinearConstraint for Max {
    fn participating_variables(&self) -> Vec<I> {
        let mut vars = self.elements.clone();
        vars.push(self.f);
        vars
    }

    fn notify_lower_bound(&mut self, v: I, x: E) {
        if let Some(i) = self.index_of(v) {
            if x > self.lb[i] {
                self.lb[i] = x;
            }
            self.prune();
        }
    }

    fn notify_upper_bound(&mut self, v: I, x: E) {
        if let Some(i) = self.index_of(v) {
            if x < self.ub[i] {
                self.ub[i] = x;
            }
            self.prune();
        }
    }

    fn phase_fixed(&self) -> bool {
        self.phase != Phase::NotFixed
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn case_splits(&self) -> Vec<CaseSplit> {
        (0..self.elements.len())
            .filter(|i| !self.pruned[*i])
            .map(|i| CaseSplit {
                tightenings: self.commit_tightening(i).into_iter().collect(),
                equations: Vec::new(),
                element: Some(i),
            })
            .collect()
    }

    fn valid_case_split(&self) -> Option<CaseSplit> {
        match self.phase {
            Phase::Element(i) => Some(CaseSplit {
                tightenings: self.commit_tightening(i).into_iter().collect(),
                equations: Vec::new(),
                element: Some(i),
            }),
            _ => None,
        }
    }

    fn entailed_tightenings(&self) -> Vec<Tightening> {
        let max_ub = self.ub.iter().cloned().fold(E::NEG_INFINITY, E::max);
        let max_lb = self.lb.iter().cloned().fold(E::NEG_INFINITY, E::max);
        let mut out = vec![ub_tightening(self.f, max_ub), lb_tightening(self.f, max_lb)];
        if let Phase::Element(i) = self.phase {
            out.extend(self.commit_tightening(i));
        }
        out
    }

    fn satisfied(&self, assignment: &dyn Fn(I) -> E) -> bool {
        let f = assignment(self.f);
        let max = self
            .elements
            .iter()
            .map(|&v| assignment(v))
            .fold(E::NEG_INFINITY, E::max);
        (f - max).abs() <= RELU_CONSTRAINT_COMPARISON_TOLERANCE
    }

    fn cost_component(&self, phase: Phase) -> Option<Vec<(I, E)>> {
        match phase {
            Phase::Element(i) => Some(vec![(self.f, 1.0), (self.elements[i], -1.0)]),
            _ => None,
        }
    }

    fn phase_status_in_assignment(&self, assignment: &dyn Fn(I) -> E) -> Phase {
        let mut best = (0, E::NEG_INFINITY);
        for (i, &v) in self.elements.iter().enumerate() {
            let x = assignment(v);
            if x > best.1 {
                best = (i, x);
            }
        }
        Phase::Element(best.0)
    }

    fn constraint_obsolete(&self) -> bool {
        self.obsolete
    }

    fn eliminate_variable(&mut self, v: I, _value: E) {
        if v == self.f {
            self.obsolete = true;
        } else if let Some(i) = self.index_of(v) {
            self.pruned[i] = true;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Disjunction {
    pub disjuncts: Vec<CaseSplit>,
    phase: Phase,
    obsolete: bool,
}

impl Disjunction {
    pub fn new(disjuncts: Vec<CaseSplit>) -> Self {
        Self {
            disjuncts,
            phase: Phase::NotFixed,
            obsolete: false,
        }
    }
}

impl PiecewiseLinearConstraint for Disjunction {
    fn participating_variables(&self) -> Vec<I> {
        self.disjuncts
            .iter()
            .flat_map(|d| d.tightenings.iter().map(|t| t.variable))
            .collect()
    }

    fn notify_lower_bound(&mut self, _v: I, _x: E) {}
    fn notify_upper_bound(&mut self, _v: I, _x: E) {}

    fn phase_fixed(&self) -> bool {
        self.phase != Phase::NotFixed || self.disjuncts.len() <= 1
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn case_splits(&self) -> Vec<CaseSplit> {
        self.disjuncts.clone()
    }

    fn valid_case_split(&self) -> Option<CaseSplit> {
        match self.phase {
            Phase::Disjunct(i) => self.disjuncts.get(i).cloned(),
            _ if self.disjuncts.len() == 1 => self.disjuncts.first().cloned(),
            _ => None,
        }
    }

    fn entailed_tightenings(&self) -> Vec<Tightening> {
        Vec::new()
    }

    fn satisfied(&self, _assignment: &dyn Fn(I) -> E) -> bool {
        // Disjunction has no algebraic semantics beyond the chosen split's
        // tightenings/equations, which are checked by the engine once
        // applied; reports satisfied once a branch has been committed.
        self.phase_fixed()
    }

    fn cost_component(&self, _phase: Phase) -> Option<Vec<(I, E)>> {
        None
    }

    fn phase_status_in_assignment(&self, _assignment: &dyn Fn(I) -> E) -> Phase {
        Phase::NotFixed
    }

    fn constraint_obsolete(&self) -> bool {
        self.obsolete
    }

    fn eliminate_variable(&mut self, _v: I, _value: E) {}
}

#[enum_dispatch(PiecewiseLinearConstraint)]
#[derive(Clone)]
pub enum PlConstraint {
    ReLU,
    LeakyReLU,
    AbsoluteValue,
    Sign,
    Max,
    Disjunction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_fixes_active_phase_on_nonnegative_lower_bound() {
        let mut relu = ReLU::new(0, 1, Some(2));
        relu.notify_lower_bound(0, 0.0);
        assert_eq!(relu.phase(), Phase::Active);
        assert!(relu.phase_fixed());
    }

    #[test]
    fn relu_fixes_inactive_phase_on_nonpositive_upper_bound() {
        let mut relu = ReLU::new(0, 1, Some(2));
        relu.notify_upper_bound(0, -1.0);
        assert_eq!(relu.phase(), Phase::Inactive);
    }

    #[test]
    fn relu_satisfied_checks_max() {
        let relu = ReLU::new(0, 1, None);
        let assignment = |v: I| if v == 0 { 3.0 } else { 3.0 };
        assert!(relu.satisfied(&assignment));
        let bad = |v: I| if v == 0 { -3.0 } else { 3.0 };
        assert!(!relu.satisfied(&bad));
    }

    #[test]
    fn absolute_value_satisfied() {
        let abs = AbsoluteValue::new(0, 1);
        let assignment = |v: I| if v == 0 { -2.0 } else { 2.0 };
        assert!(abs.satisfied(&assignment));
    }

    #[test]
    fn max_phase_status_picks_largest_element() {
        let max = Max::new(0, vec![1, 2, 3]);
        let assignment = |v: I| match v {
            1 => 1.0,
            2 => 5.0,
            3 => 2.0,
            _ => 0.0,
        };
        assert_eq!(max.phase_status_in_assignment(&assignment), Phase::Element(1));
    }

    #[test]
    fn max_entailed_tightenings_pin_winning_slack_once_phase_fixed() {
        let mut max = Max::new(0, vec![1, 2]);
        max.set_slacks(vec![10, 11]);
        max.notify_lower_bound(1, 5.0);
        max.notify_upper_bound(2, 1.0);
        assert_eq!(max.phase(), Phase::Element(0));

        let tightenings = max.entailed_tightenings();
        let slack_commit = tightenings
            .iter()
            .find(|t| t.variable == 10 && t.kind == TighteningKind::Upper)
            .expect("winning element's slack should be pinned to 0 once its phase is fixed");
        assert_eq!(slack_commit.value, 0.0);
    }

    #[test]
    fn max_case_splits_carry_no_equations_only_slack_tightenings() {
        let mut max = Max::new(0, vec![1, 2]);
        max.set_slacks(vec![10, 11]);
        let splits = max.case_splits();
        assert_eq!(splits.len(), 2);
        for split in &splits {
            assert!(split.equations.is_empty());
            assert_eq!(split.tightenings.len(), 1);
            assert_eq!(split.tightenings[0].kind, TighteningKind::Upper);
            assert_eq!(split.tightenings[0].value, 0.0);
        }
    }

    #[test]
    fn disjunction_with_single_remaining_disjunct_is_fixed() {
        let split = CaseSplit::with_tightenings(vec![lb_tightening(0, 1.0)]);
        let disjunction = Disjunction::new(vec![split]);
        assert!(disjunction.phase_fixed());
    }
}
