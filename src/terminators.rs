//! Terminators for controlling and interrupting long-running solves.
//!
//! This module provides several implementations of the [`Terminator`] trait:
//! - [`InterruptTerminator`]: responds to Ctrl-C (SIGINT) or a programmatic quit request.
//! - [`TimeOutTerminator`]: terminates after a specified wall-clock budget.
//! - [`MultipleTerminators`]: combines multiple terminators.
//!
//! The Engine and the Divide-and-Conquer worker loop both check a
//! `Terminator` at the top of every iteration and at the entry of every
//! expensive routine (refactorization, tightener pass).
//!
//! # Note
//! [`InterruptTerminator`] installs a global signal handler and **can only be
//! constructed once** per process. Attempting to construct more than one
//! will panic.

use std::sync::{Arc, atomic::AtomicBool};
use std::time::{Duration, Instant};

use crate::ExitCode;

pub trait Terminator {
    fn initialize(&mut self) {}

    /// Returns `Some(exit_code)` if the solve should stop now.
    fn terminate(&mut self) -> Option<ExitCode>;
}

/// Terminator that responds to Ctrl-C (SIGINT) or a programmatic quit request.
///
/// # Note
/// Only one instance of `InterruptTerminator` can be constructed per
/// process via [`InterruptTerminator::new`], as it installs a global signal
/// handler. Creating more than one will panic. Use
/// [`InterruptTerminator::from_flag`] to share a single flag across many
/// terminators instead (e.g. one per Divide-and-Conquer worker).
pub struct InterruptTerminator {
    interrupted: Arc<AtomicBool>,
}

impl InterruptTerminator {
    pub fn new() -> Self {
        let interrupted = Arc::new(AtomicBool::new(false));
        ctrlc::set_handler({
            let interrupted_clone = interrupted.clone();
            move || {
                interrupted_clone.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        })
        .expect("Error setting Ctrl-C handler");
        Self { interrupted }
    }

    /// Wraps an externally-owned flag, e.g. a Divide-and-Conquer worker's
    /// shared `should_quit` atomic, instead of installing a signal handler.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { interrupted: flag }
    }

    pub fn request_quit(&self) {
        self.interrupted.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Terminator for InterruptTerminator {
    fn terminate(&mut self) -> Option<ExitCode> {
        if self.interrupted.load(std::sync::atomic::Ordering::SeqCst) {
            Some(ExitCode::QuitRequested)
        } else {
            None
        }
    }
}

/// Terminator that triggers after a specified wall-clock budget. A zero
/// budget means "no timeout", matching the CLI's `--timeout 0` convention.
pub struct TimeOutTerminator {
    max_time: Duration,
    start_time: Instant,
}

impl TimeOutTerminator {
    pub fn new(max_time: Duration) -> Self {
        Self {
            max_time,
            start_time: Instant::now(),
        }
    }
}

impl Terminator for TimeOutTerminator {
    fn initialize(&mut self) {
        self.start_time = Instant::now();
    }

    fn terminate(&mut self) -> Option<ExitCode> {
        if self.max_time.is_zero() {
            None
        } else if self.start_time.elapsed() >= self.max_time {
            Some(ExitCode::Timeout)
        } else {
            None
        }
    }
}

/// Terminator that combines multiple terminators and triggers if any of them do.
pub struct MultipleTerminators {
    terminators: Vec<Box<dyn Terminator>>,
}

impl MultipleTerminators {
    pub fn new(terminators: Vec<Box<dyn Terminator>>) -> Self {
        Self { terminators }
    }
}

impl Terminator for MultipleTerminators {
    fn initialize(&mut self) {
        for terminator in &mut self.terminators {
            terminator.initialize();
        }
    }

    fn terminate(&mut self) -> Option<ExitCode> {
        for terminator in &mut self.terminators {
            if let Some(status) = terminator.as_mut().terminate() {
                return Some(status);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_terminator_triggers_after_budget() {
        let mut terminator = TimeOutTerminator::new(Duration::from_millis(10));
        terminator.initialize();
        assert!(terminator.terminate().is_none());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(terminator.terminate(), Some(ExitCode::Timeout));
    }

    #[test]
    fn zero_timeout_never_triggers() {
        let mut terminator = TimeOutTerminator::new(Duration::ZERO);
        terminator.initialize();
        std::thread::sleep(Duration::from_millis(5));
        assert!(terminator.terminate().is_none());
    }

    #[test]
    fn interrupt_terminator_from_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut terminator = InterruptTerminator::from_flag(flag.clone());
        assert!(terminator.terminate().is_none());
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(terminator.terminate(), Some(ExitCode::QuitRequested));
    }

    #[test]
    fn multiple_terminators_triggers_on_any() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut terminator = MultipleTerminators::new(vec![
            Box::new(TimeOutTerminator::new(Duration::from_secs(1000))),
            Box::new(InterruptTerminator::from_flag(flag)),
        ]);
        assert_eq!(terminator.terminate(), Some(ExitCode::QuitRequested));
    }
}
