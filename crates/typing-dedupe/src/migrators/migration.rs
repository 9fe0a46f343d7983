//! Generic per-destination migrations.

use async_trait::async_trait;

use crate::core::{DestinationHandler, DestinationInitialState, StreamConfig};
use crate::error::Result;

/// Outcome of running one migration against one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResult<S> {
    /// State to carry into the next migration and to persist.
    pub updated_state: S,
    /// The migration changed tables, so existence/emptiness/schema facts
    /// gathered before it ran are stale and must be refetched.
    pub invalidate_initial_state: bool,
}

impl<S> MigrationResult<S> {
    pub fn unchanged(state: S) -> Self {
        Self {
            updated_state: state,
            invalidate_initial_state: false,
        }
    }
}

/// A destination-specific repair step, tracked through persisted state.
///
/// Migrations run in registration order, once per stream per sync, before the
/// stream's final table is classified.
#[async_trait]
pub trait Migration<H: DestinationHandler>: Send + Sync {
    /// Whether `state` says this migration still has to run.
    fn require_migration(&self, state: &H::State) -> bool;

    /// Perform the migration unconditionally.
    async fn migrate(
        &self,
        handler: &H,
        stream: &StreamConfig,
        initial: &DestinationInitialState<H::State>,
    ) -> Result<MigrationResult<H::State>>;

    /// Run [`migrate`](Self::migrate) if [`require_migration`](Self::require_migration)
    /// says so, otherwise hand back the current state untouched.
    async fn migrate_if_necessary(
        &self,
        handler: &H,
        stream: &StreamConfig,
        initial: &DestinationInitialState<H::State>,
    ) -> Result<MigrationResult<H::State>> {
        if self.require_migration(&initial.destination_state) {
            self.migrate(handler, stream, initial).await
        } else {
            Ok(MigrationResult::unchanged(initial.destination_state.clone()))
        }
    }
}
