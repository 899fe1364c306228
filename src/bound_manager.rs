//! Per-variable bound storage, trail-style save/restore, and optional proof
//! explanation vectors.
//!
//! Bounds are monotone: `set_lower`/`set_upper` only ever improve a bound,
//! recording a dirty bit so the constraint tightener and Tableau can later
//! drain exactly what changed. Context-dependent nesting deeper than the
//! single-level shadow buffer is an arena of versioned slots: each push
//! records a watermark into a flat `Vec<(usize, f64)>` trail, and a pop
//! rewinds to that watermark writing the old values back in reverse order.

use crate::constants::BOUND_COMPARISON_ADDITIVE_TOLERANCE;
use crate::error::EngineError;
use crate::I;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TighteningKind {
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy)]
pub struct Tightening {
    pub variable: I,
    pub value: f64,
    pub kind: TighteningKind,
}

/// A single trail entry: the slot that changed and its value before the
/// change, tagged with the decision level at which the change happened.
#[derive(Debug, Clone, Copy)]
struct TrailEntry {
    slot: usize,
    old_value: f64,
    level: usize,
}

/// Sparse explanation vector: a non-negative combination of original rows
/// that derives a bound, maintained only when proof production is enabled.
#[derive(Debug, Clone, Default)]
pub struct Explanation {
    pub coefficients: Vec<(I, f64)>,
}

pub struct BoundManager {
    n: usize,
    lb: Vec<f64>,
    ub: Vec<f64>,
    tightened_lb: Vec<bool>,
    tightened_ub: Vec<bool>,

    /// Single-level shadow buffer for `store_local_bounds`/`restore_local_bounds`.
    shadow_lb: Option<Vec<f64>>,
    shadow_ub: Option<Vec<f64>>,

    /// Trail of `(slot, old_value, level)` for deeper context-dependent
    /// nesting. `slot` indexes a flattened `[lb(0..n), ub(0..n)]` array.
    trail: Vec<TrailEntry>,
    current_level: usize,

    inconsistent: Option<Tightening>,

    proof_mode: bool,
    lb_explanation: Vec<Explanation>,
    ub_explanation: Vec<Explanation>,
}

impl BoundManager {
    pub fn new(n: usize, proof_mode: bool) -> Self {
        Self {
            n,
            lb: vec![f64::NEG_INFINITY; n],
            ub: vec![f64::INFINITY; n],
            tightened_lb: vec![false; n],
            tightened_ub: vec![false; n],
            shadow_lb: None,
            shadow_ub: None,
            trail: Vec::new(),
            current_level: 0,
            inconsistent: None,
            proof_mode,
            lb_explanation: vec![Explanation::default(); n],
            ub_explanation: vec![Explanation::default(); n],
        }
    }

    /// Extends the variable arrays to accommodate auxiliary variables
    /// introduced by the preprocessor. Only valid before any `push()`/trail
    /// entry exists, since the trail's upper-bound slots are addressed as
    /// `n + v` and would otherwise be misinterpreted after a resize.
    pub fn grow_to(&mut self, new_n: usize) {
        debug_assert!(self.trail.is_empty(), "grow_to after trail entries exist corrupts slot addressing");
        if new_n <= self.n {
            return;
        }
        self.lb.resize(new_n, f64::NEG_INFINITY);
        self.ub.resize(new_n, f64::INFINITY);
        self.tightened_lb.resize(new_n, false);
        self.tightened_ub.resize(new_n, false);
        self.lb_explanation.resize(new_n, Explanation::default());
        self.ub_explanation.resize(new_n, Explanation::default());
        self.n = new_n;
    }

    pub fn lower(&self, v: I) -> f64 {
        self.lb[v]
    }

    pub fn upper(&self, v: I) -> f64 {
        self.ub[v]
    }

    pub fn is_inconsistent(&self) -> bool {
        self.inconsistent.is_some()
    }

    pub fn inconsistency(&self) -> Option<Tightening> {
        self.inconsistent
    }

    pub fn clear_inconsistency(&mut self) {
        self.inconsistent = None;
    }

    fn record_trail(&mut self, slot: usize, old_value: f64) {
        self.trail.push(TrailEntry {
            slot,
            old_value,
            level: self.current_level,
        });
    }

    /// Monotone lower-bound update: only takes effect if it strictly
    /// improves the bound by more than the additive tolerance.
    pub fn set_lower(&mut self, v: I, x: f64) {
        if x > self.lb[v] + BOUND_COMPARISON_ADDITIVE_TOLERANCE {
            self.record_trail(v, self.lb[v]);
            self.lb[v] = x;
            self.tightened_lb[v] = true;
            if self.ub[v] < self.lb[v] && self.inconsistent.is_none() {
                self.inconsistent = Some(Tightening {
                    variable: v,
                    value: x,
                    kind: TighteningKind::Lower,
                });
            }
        }
    }

    pub fn set_upper(&mut self, v: I, x: f64) {
        if x < self.ub[v] - BOUND_COMPARISON_ADDITIVE_TOLERANCE {
            self.record_trail(self.n + v, self.ub[v]);
            self.ub[v] = x;
            self.tightened_ub[v] = true;
            if self.ub[v] < self.lb[v] && self.inconsistent.is_none() {
                self.inconsistent = Some(Tightening {
                    variable: v,
                    value: x,
                    kind: TighteningKind::Upper,
                });
            }
        }
    }

    /// Like [`Self::set_lower`], but also reports whether the bound actually
    /// moved so the Tableau can repair a non-basic's clamped assignment and
    /// propagate the change through the change column.
    pub fn tighten_lower(&mut self, v: I, x: f64) -> bool {
        let before = self.lb[v];
        self.set_lower(v, x);
        self.lb[v] != before
    }

    pub fn tighten_upper(&mut self, v: I, x: f64) -> bool {
        let before = self.ub[v];
        self.set_upper(v, x);
        self.ub[v] != before
    }

    pub fn set_lower_with_explanation(&mut self, v: I, x: f64, explanation: Explanation) {
        let before = self.lb[v];
        self.set_lower(v, x);
        if self.proof_mode && self.lb[v] != before {
            self.lb_explanation[v] = explanation;
        }
    }

    pub fn set_upper_with_explanation(&mut self, v: I, x: f64, explanation: Explanation) {
        let before = self.ub[v];
        self.set_upper(v, x);
        if self.proof_mode && self.ub[v] != before {
            self.ub_explanation[v] = explanation;
        }
    }

    pub fn lower_explanation(&self, v: I) -> Option<&Explanation> {
        self.proof_mode.then(|| &self.lb_explanation[v])
    }

    pub fn upper_explanation(&self, v: I) -> Option<&Explanation> {
        self.proof_mode.then(|| &self.ub_explanation[v])
    }

    /// Invalidates all explanation vectors, e.g. after a refactorization
    /// whose precise derivation isn't recomputed incrementally (Open
    /// Question resolution: recompute from scratch rather than repair).
    pub fn invalidate_explanations(&mut self) {
        for e in &mut self.lb_explanation {
            *e = Explanation::default();
        }
        for e in &mut self.ub_explanation {
            *e = Explanation::default();
        }
    }

    /// Single-level shadow snapshot, taken at a case-split push.
    pub fn store_local_bounds(&mut self) {
        self.shadow_lb = Some(self.lb.clone());
        self.shadow_ub = Some(self.ub.clone());
    }

    pub fn restore_local_bounds(&mut self) {
        if let Some(lb) = self.shadow_lb.take() {
            self.lb = lb;
        }
        if let Some(ub) = self.shadow_ub.take() {
            self.ub = ub;
        }
        self.inconsistent = None;
    }

    /// Pushes a new decision level onto the trail.
    pub fn push(&mut self) {
        self.current_level += 1;
    }

    /// Pops the current decision level, rewinding all bound changes made at
    /// or above it.
    pub fn pop(&mut self) {
        while let Some(entry) = self.trail.last() {
            if entry.level < self.current_level {
                break;
            }
            let entry = self.trail.pop().unwrap();
            if entry.slot < self.n {
                self.lb[entry.slot] = entry.old_value;
            } else {
                self.ub[entry.slot - self.n] = entry.old_value;
            }
        }
        self.current_level = self.current_level.saturating_sub(1);
        self.inconsistent = None;
    }

    pub fn decision_level(&self) -> usize {
        self.current_level
    }

    /// Drains and clears dirty bits, returning every tightening recorded
    /// since the last drain.
    pub fn get_tightenings(&mut self) -> Vec<Tightening> {
        let mut out = Vec::new();
        for v in 0..self.n {
            if self.tightened_lb[v] {
                out.push(Tightening {
                    variable: v,
                    value: self.lb[v],
                    kind: TighteningKind::Lower,
                });
                self.tightened_lb[v] = false;
            }
            if self.tightened_ub[v] {
                out.push(Tightening {
                    variable: v,
                    value: self.ub[v],
                    kind: TighteningKind::Upper,
                });
                self.tightened_ub[v] = false;
            }
        }
        out
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for v in 0..self.n {
            if self.lb[v] > self.ub[v] + BOUND_COMPARISON_ADDITIVE_TOLERANCE {
                return Err(EngineError::InconsistentBound {
                    variable: v,
                    lb: self.lb[v],
                    ub: self.ub[v],
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotone_update_ignores_worse_bound() {
        let mut bm = BoundManager::new(2, false);
        bm.set_lower(0, 1.0);
        bm.set_lower(0, 0.5);
        assert_eq!(bm.lower(0), 1.0);
    }

    #[test]
    fn inconsistent_bound_detected() {
        let mut bm = BoundManager::new(1, false);
        bm.set_lower(0, 5.0);
        bm.set_upper(0, 1.0);
        assert!(bm.is_inconsistent());
    }

    #[test]
    fn trail_push_pop_restores_prior_bounds() {
        let mut bm = BoundManager::new(1, false);
        bm.set_lower(0, 1.0);
        bm.push();
        bm.set_lower(0, 3.0);
        assert_eq!(bm.lower(0), 3.0);
        bm.pop();
        assert_eq!(bm.lower(0), 1.0);
    }

    #[test]
    fn nested_push_pop_unwinds_in_order() {
        let mut bm = BoundManager::new(1, false);
        bm.set_lower(0, 1.0);
        bm.push();
        bm.set_lower(0, 2.0);
        bm.push();
        bm.set_lower(0, 3.0);
        bm.pop();
        assert_eq!(bm.lower(0), 2.0);
        bm.pop();
        assert_eq!(bm.lower(0), 1.0);
    }

    #[test]
    fn get_tightenings_drains_dirty_bits() {
        let mut bm = BoundManager::new(1, false);
        bm.set_lower(0, 1.0);
        bm.set_upper(0, 5.0);
        let tightenings = bm.get_tightenings();
        assert_eq!(tightenings.len(), 2);
        assert!(bm.get_tightenings().is_empty());
    }

    #[test]
    fn proof_mode_records_explanations() {
        let mut bm = BoundManager::new(1, true);
        let explanation = Explanation {
            coefficients: vec![(0, 1.0)],
        };
        bm.set_lower_with_explanation(0, 2.0, explanation);
        assert!(bm.lower_explanation(0).unwrap().coefficients.len() == 1);
    }
}
