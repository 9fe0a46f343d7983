//! Upgrade of legacy (V1) raw tables to the V2 raw-table layout.
//!
//! V1 destinations wrote one raw table per stream, next to the final table,
//! with `_airbyte_ab_id`, `_airbyte_data` and `_airbyte_emitted_at` columns.
//! V2 keeps raw tables in a dedicated namespace with a different column set.
//! The migration copies a V1 table into the V2 location exactly once: as soon
//! as a V2 raw table exists, nothing is migrated again.

use std::fmt;

use async_trait::async_trait;
use tracing::info;

use crate::core::schema::{LEGACY_RAW_TABLE_COLUMNS, V2_RAW_TABLE_COLUMN_NAMES};
use crate::core::{DestinationHandler, SqlGenerator, StreamConfig, StreamId, SyncMode};
use crate::error::{Result, TypingDedupingError};

/// A table addressed by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedTableName {
    pub namespace: String,
    pub table_name: String,
}

impl NamespacedTableName {
    pub fn new(namespace: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            table_name: table_name.into(),
        }
    }
}

impl fmt::Display for NamespacedTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.table_name)
    }
}

/// Decides on and performs the V1 to V2 raw-table migration.
///
/// Implementors supply the warehouse lookups; the decision logic and the
/// execution are provided.
#[async_trait]
pub trait DestinationV1V2Migrator<H: DestinationHandler>: Send + Sync {
    /// Whether the namespace holding V2 raw tables exists.
    async fn does_airbyte_internal_namespace_exist(&self, stream_id: &StreamId) -> Result<bool>;

    async fn get_table_if_exists(
        &self,
        namespace: &str,
        table_name: &str,
    ) -> Result<Option<H::Table>>;

    /// Whether `table` has every column in `columns`.
    fn schema_matches_expectation(&self, table: &H::Table, columns: &[&str]) -> bool;

    /// Where a V1 destination would have put this stream's raw table.
    fn convert_to_v1_raw_name(&self, stream: &StreamConfig) -> NamespacedTableName;

    /// Decide whether `stream` has a V1 raw table that still needs migrating.
    ///
    /// Fails with `UnexpectedSchema` when a V2 or V1 raw table exists but its
    /// columns are not the ones the engine expects.
    async fn should_migrate(&self, stream: &StreamConfig) -> Result<bool> {
        if stream.sync_mode == SyncMode::Overwrite {
            return Ok(false);
        }

        if self.does_airbyte_internal_namespace_exist(&stream.id).await? {
            let v2_raw = self
                .get_table_if_exists(&stream.id.raw_namespace, &stream.id.raw_name)
                .await?;
            if let Some(table) = v2_raw {
                if !self.schema_matches_expectation(&table, &V2_RAW_TABLE_COLUMN_NAMES) {
                    return Err(TypingDedupingError::UnexpectedSchema(format!(
                        "Destination V2 Raw Table {} does not match expected Schema",
                        stream.id.raw_table_id("")
                    )));
                }
                return Ok(false);
            }
        }

        let v1_name = self.convert_to_v1_raw_name(stream);
        let Some(v1_table) = self
            .get_table_if_exists(&v1_name.namespace, &v1_name.table_name)
            .await?
        else {
            return Ok(false);
        };

        if !self.schema_matches_expectation(&v1_table, &LEGACY_RAW_TABLE_COLUMNS) {
            return Err(TypingDedupingError::UnexpectedSchema(format!(
                "Destination V1 Raw Table {} does not match expected Schema",
                v1_name
            )));
        }
        Ok(true)
    }

    /// Copy the V1 raw table into the V2 raw table.
    ///
    /// Any failure is reported as `TableNotMigrated` naming the stream.
    async fn migrate(
        &self,
        generator: &(dyn SqlGenerator<Table = H::Table>),
        handler: &H,
        stream: &StreamConfig,
    ) -> Result<()> {
        let v1_name = self.convert_to_v1_raw_name(stream);
        info!(
            "Migrating V1 raw table {} to V2 raw table {}",
            v1_name,
            stream.id.raw_table_id("")
        );

        let sql =
            generator.migrate_from_v1_to_v2(&stream.id, &v1_name.namespace, &v1_name.table_name);
        handler.execute(&sql).await.map_err(|e| {
            TypingDedupingError::table_not_migrated(
                format!(
                    "Attempted and failed to migrate stream {}",
                    stream.id.final_name
                ),
                Some(e),
            )
        })
    }

    /// Migrate when [`should_migrate`](Self::should_migrate) says so.
    ///
    /// Returns whether a migration ran.
    async fn migrate_if_necessary(
        &self,
        generator: &(dyn SqlGenerator<Table = H::Table>),
        handler: &H,
        stream: &StreamConfig,
    ) -> Result<bool> {
        info!(
            "Assessing whether V1 to V2 migration is necessary for stream {}",
            stream.id.final_name
        );
        if self.should_migrate(stream).await? {
            info!("Starting V2 migration for stream {}", stream.id.final_name);
            self.migrate(generator, handler, stream).await?;
            info!(
                "V2 migration completed successfully for stream {}",
                stream.id.final_name
            );
            Ok(true)
        } else {
            info!("No V2 migration required for stream {}", stream.id.final_name);
            Ok(false)
        }
    }
}

/// Migrator for destinations that never had a V1 layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpV1V2Migrator;

#[async_trait]
impl<H: DestinationHandler> DestinationV1V2Migrator<H> for NoOpV1V2Migrator {
    async fn does_airbyte_internal_namespace_exist(&self, _stream_id: &StreamId) -> Result<bool> {
        Ok(false)
    }

    async fn get_table_if_exists(
        &self,
        _namespace: &str,
        _table_name: &str,
    ) -> Result<Option<H::Table>> {
        Ok(None)
    }

    fn schema_matches_expectation(&self, _table: &H::Table, _columns: &[&str]) -> bool {
        false
    }

    fn convert_to_v1_raw_name(&self, stream: &StreamConfig) -> NamespacedTableName {
        NamespacedTableName::new(&stream.id.raw_namespace, &stream.id.raw_name)
    }

    async fn should_migrate(&self, _stream: &StreamConfig) -> Result<bool> {
        Ok(false)
    }
}
