//! Per-stream destination state and the initial-state snapshot.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::StreamConfig;

/// Opaque per-stream state a destination persists between syncs.
///
/// The engine only needs to know whether a soft reset is pending; backends
/// are free to carry more. `Default` is the state of a stream the
/// destination has never seen.
pub trait DestinationState: Clone + Default + Send + Sync + Debug + 'static {
    fn needs_soft_reset(&self) -> bool;

    fn with_soft_reset(&self, needs_soft_reset: bool) -> Self;
}

/// State carrying only the soft-reset flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimumDestinationState {
    #[serde(default)]
    pub needs_soft_reset: bool,
}

impl DestinationState for MinimumDestinationState {
    fn needs_soft_reset(&self) -> bool {
        self.needs_soft_reset
    }

    fn with_soft_reset(&self, needs_soft_reset: bool) -> Self {
        Self { needs_soft_reset }
    }
}

/// What the destination looked like for one stream when the sync started.
#[derive(Debug, Clone)]
pub struct DestinationInitialState<S> {
    pub stream_config: StreamConfig,
    pub final_table_present: bool,
    /// `true` when the table is absent.
    pub final_table_empty: bool,
    /// `true` when the table is absent.
    pub schema_matches: bool,
    /// Extracted-at watermark to scope incremental updates; `None` means unscoped.
    pub min_extracted_at_for_sync: Option<DateTime<Utc>>,
    pub has_unprocessed_raw_records: bool,
    pub destination_state: S,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_state_toggles_soft_reset() {
        let state = MinimumDestinationState::default();
        assert!(!state.needs_soft_reset());
        assert!(state.with_soft_reset(true).needs_soft_reset());
        assert!(!state.with_soft_reset(true).with_soft_reset(false).needs_soft_reset());
    }

    #[test]
    fn test_minimum_state_deserializes_without_flag() {
        let state: MinimumDestinationState = serde_json::from_str("{}").unwrap();
        assert_eq!(state, MinimumDestinationState::default());
    }
}
