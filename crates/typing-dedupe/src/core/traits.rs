//! Collaborator traits between the lifecycle engine and a warehouse backend.
//!
//! - [`SqlGenerator`]: pure SQL text generation for one dialect
//! - [`DestinationHandler`]: executes SQL and answers questions about existing tables
//!
//! These two traits are the only coupling between the engine and a backend.
//! Both carry the backend's table-definition type as an associated type so a
//! table fetched by the handler can be handed to the generator without any
//! downcasting.
//!
//! # Design Patterns
//!
//! - **Strategy**: generators are interchangeable per dialect
//! - **Template Method**: the soft-reset operations are provided in terms of
//!   the required primitives

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

use super::catalog::StreamConfig;
use super::identifier::{ColumnId, StreamId, SOFT_RESET_SUFFIX};
use super::sql::Sql;
use super::state::DestinationState;

/// Generates SQL for one warehouse dialect.
///
/// Every method is pure: it only builds text, it never talks to the warehouse.
pub trait SqlGenerator: Send + Sync {
    /// Existing-table description produced by the matching handler.
    type Table: Send + Sync;

    /// Derive warehouse identifiers for a stream.
    fn build_stream_id(&self, namespace: &str, name: &str, raw_namespace: &str) -> StreamId;

    /// Derive a warehouse-safe column id, optionally with a collision suffix.
    fn build_column_id(&self, name: &str, suffix: Option<&str>) -> ColumnId;

    fn create_schema(&self, schema: &str) -> Sql;

    /// Create the final table (with `suffix` appended to its name).
    ///
    /// With `force`, an existing table of that name is replaced.
    fn create_table(&self, stream: &StreamConfig, suffix: &str, force: bool) -> Sql;

    /// Whether an existing final table already has the columns `stream` needs.
    ///
    /// Returns `TableNotMigrated` when the table lacks the metadata columns of
    /// the current layout.
    fn existing_schema_matches_stream_config(
        &self,
        stream: &StreamConfig,
        existing: &Self::Table,
    ) -> Result<bool>;

    /// Type and dedupe raw records into the final table (with `final_suffix`).
    ///
    /// With `min_raw_timestamp`, only raw records extracted strictly after it
    /// are considered. With `use_safer_casting`, values that fail to cast
    /// become NULL instead of failing the statement.
    fn update_table(
        &self,
        stream: &StreamConfig,
        final_suffix: &str,
        min_raw_timestamp: Option<DateTime<Utc>>,
        use_safer_casting: bool,
    ) -> Sql;

    /// Replace the final table with the table named with `final_suffix`.
    fn overwrite_final_table(&self, stream_id: &StreamId, final_suffix: &str) -> Sql;

    /// Mark every raw record as not yet typed.
    fn clear_loaded_at(&self, stream_id: &StreamId) -> Sql;

    /// Copy a V1 raw table at `namespace.table_name` into the V2 raw table.
    fn migrate_from_v1_to_v2(&self, stream_id: &StreamId, namespace: &str, table_name: &str) -> Sql;

    /// Recreate the soft-reset staging table and mark every raw record unprocessed.
    fn prepare_tables_for_soft_reset(&self, stream: &StreamConfig) -> Sql {
        Sql::concat([
            self.create_table(stream, SOFT_RESET_SUFFIX, true),
            self.clear_loaded_at(&stream.id),
        ])
    }

    /// Rebuild the final table from all raw records and swap it in.
    ///
    /// Must run after [`prepare_tables_for_soft_reset`](Self::prepare_tables_for_soft_reset).
    fn soft_reset(&self, stream: &StreamConfig) -> Sql {
        Sql::concat([
            self.update_table(stream, SOFT_RESET_SUFFIX, None, false),
            self.overwrite_final_table(&stream.id, SOFT_RESET_SUFFIX),
        ])
    }
}

/// Talks to the warehouse.
///
/// # Thread Safety
///
/// Calls for different streams may run concurrently.
#[async_trait]
pub trait DestinationHandler: Send + Sync {
    /// Existing-table description, shared with the generator.
    type Table: Send + Sync;

    /// Persisted per-stream state.
    type State: DestinationState;

    /// Execute every transaction of `sql` in order.
    ///
    /// A failure is returned as is; nothing is retried.
    async fn execute(&self, sql: &Sql) -> Result<()>;

    /// Describe the final table, or `None` if it does not exist.
    async fn find_existing_table(&self, id: &StreamId) -> Result<Option<Self::Table>>;

    /// Whether the (existing) final table has no rows.
    async fn is_final_table_empty(&self, id: &StreamId) -> Result<bool>;

    /// Watermark for incremental typing: the newest extracted-at among raw
    /// records already loaded, or `None` when typing must be unscoped.
    async fn get_min_timestamp_for_sync(&self, id: &StreamId) -> Result<Option<DateTime<Utc>>>;

    /// Whether the raw table holds records that were never typed.
    async fn has_unprocessed_raw_records(&self, _id: &StreamId) -> Result<bool> {
        Ok(true)
    }

    /// Persisted state of every stream that has one.
    async fn fetch_destination_states(&self) -> Result<HashMap<StreamId, Self::State>>;

    /// Persist the given per-stream states.
    async fn commit_destination_states(&self, states: &HashMap<StreamId, Self::State>)
        -> Result<()>;
}
