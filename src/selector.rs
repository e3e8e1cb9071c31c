//! Per-execution mutant selection and coverage recording.
//!
//! Each test execution gets its own [`ExecutionContext`]: the active mutant
//! selection plus the set of mutants reached while the program ran. Nothing
//! here is process-global, so independent executions may proceed side by side.

use crate::model::Mutant;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Which variant of the program an execution runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutantSelection {
    /// Unmutated program, nothing recorded.
    Disabled,
    /// Unmutated program, record every mutant location that is reached.
    Coverage,
    /// Run with this mutant's transformation active.
    Mutant(Mutant),
}

impl MutantSelection {
    /// Maps the instrumentation convention: `< 0` disabled, `0` coverage,
    /// `> 0` a mutant id.
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            r if r < 0 => MutantSelection::Disabled,
            0 => MutantSelection::Coverage,
            r => match u32::try_from(r).ok().and_then(Mutant::new) {
                Some(mutant) => MutantSelection::Mutant(mutant),
                None => MutantSelection::Disabled,
            },
        }
    }

    pub fn as_raw(self) -> i64 {
        match self {
            MutantSelection::Disabled => -1,
            MutantSelection::Coverage => 0,
            MutantSelection::Mutant(m) => i64::from(m.id()),
        }
    }
}

impl fmt::Display for MutantSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutantSelection::Disabled => write!(f, "original"),
            MutantSelection::Coverage => write!(f, "original+coverage"),
            MutantSelection::Mutant(m) => write!(f, "mutant {}", m),
        }
    }
}

/// Selector state handed to an executor for exactly one run.
///
/// Cloning shares the coverage set, so an executor that moves the context
/// onto another thread still reports into the scheduler's copy.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    selection: MutantSelection,
    covered: Arc<Mutex<BTreeSet<Mutant>>>,
}

impl ExecutionContext {
    pub fn new(selection: MutantSelection) -> Self {
        Self {
            selection,
            covered: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub fn selection(&self) -> MutantSelection {
        self.selection
    }

    pub fn select_mutant(&mut self, selection: MutantSelection) {
        self.selection = selection;
    }

    /// Called by instrumentation when a mutant location is reached.
    /// Ignored unless the context is a coverage run.
    pub fn record_covered(&self, mutant: Mutant) {
        if self.selection == MutantSelection::Coverage {
            self.lock().insert(mutant);
        }
    }

    /// Records the inclusive id range `from..=to`, as emitted by
    /// instrumentation guarding several mutants at one location.
    pub fn record_covered_range(&self, from: u32, to: u32) {
        if self.selection != MutantSelection::Coverage {
            return;
        }
        let mut covered = self.lock();
        covered.extend((from..=to).filter_map(Mutant::new));
    }

    pub fn covered_mutants(&self) -> BTreeSet<Mutant> {
        self.lock().clone()
    }

    pub fn reset_coverage(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<Mutant>> {
        // A panicking test body can poison the lock; the set itself is still valid.
        self.covered.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
