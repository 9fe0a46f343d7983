//! Lifecycle phases and final-table classification.

use std::fmt;

/// Where the orchestrator is in its once-per-sync lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    /// Constructed, `prepare_tables` not yet called.
    Ready,
    /// `prepare_tables` is running.
    Preparing,
    /// Tables are prepared; typing and commit are allowed.
    Armed,
    /// `prepare_tables` failed. Every later call is a no-op.
    Disabled,
    /// `commit_final_tables` finished.
    Committed,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::Ready => "ready",
            LifecyclePhase::Preparing => "preparing",
            LifecyclePhase::Armed => "armed",
            LifecyclePhase::Disabled => "disabled",
            LifecyclePhase::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// What has to happen to a stream's final table before records are typed into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableClassification {
    /// No final table yet: create it.
    Absent,
    /// Present, empty and correctly shaped: use it as is.
    Clean,
    /// Present but holding rows or the wrong columns: rebuild it.
    NeedsRecreate,
}

impl TableClassification {
    pub fn classify(present: bool, empty: bool, schema_matches: bool) -> Self {
        if !present {
            TableClassification::Absent
        } else if empty && schema_matches {
            TableClassification::Clean
        } else {
            TableClassification::NeedsRecreate
        }
    }
}
