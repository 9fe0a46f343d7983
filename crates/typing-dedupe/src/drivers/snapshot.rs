//! Dry-run destination backed by a static description of the warehouse.
//!
//! A [`WarehouseSnapshot`] lists the tables that exist (with their columns,
//! row counts and raw-table load statistics) and the persisted per-stream
//! states. [`SnapshotDestinationHandler`] answers the engine's questions from
//! it and records every statement instead of running it, so a whole sync can
//! be planned without a database. Executing SQL never changes the snapshot.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::schema::{ColumnDefinition, TableDefinition};
use crate::core::{
    DestinationHandler, MinimumDestinationState, ParsedCatalog, Sql, StreamConfig,
    StreamDescriptor, StreamId,
};
use crate::error::{Result, TypingDedupingError};
use crate::migrators::{DestinationV1V2Migrator, NamespacedTableName};

/// Load statistics of a raw table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTableStats {
    /// Records with no `_airbyte_loaded_at` yet.
    #[serde(default)]
    pub unloaded_records: u64,
    /// Oldest `_airbyte_extracted_at` among unloaded records.
    #[serde(default)]
    pub min_unloaded_extracted_at: Option<DateTime<Utc>>,
    /// Newest `_airbyte_extracted_at` among loaded records.
    #[serde(default)]
    pub max_loaded_extracted_at: Option<DateTime<Utc>>,
}

/// One existing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTable {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub row_count: u64,
    /// Present for raw tables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawTableStats>,
}

impl SnapshotTable {
    pub fn definition(&self) -> TableDefinition {
        TableDefinition::new(self.columns.iter().cloned())
    }
}

/// Persisted state of one stream, keyed by its source namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStreamState {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub state: MinimumDestinationState,
}

/// Static description of a warehouse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseSnapshot {
    /// Namespaces that exist even without tables.
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub tables: Vec<SnapshotTable>,
    #[serde(default)]
    pub states: Vec<SnapshotStreamState>,
}

impl WarehouseSnapshot {
    /// Load a snapshot, as JSON for a `.json` file and as YAML otherwise.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn table(&self, namespace: &str, name: &str) -> Option<&SnapshotTable> {
        self.tables
            .iter()
            .find(|t| t.namespace == namespace && t.name == name)
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces.iter().any(|n| n == namespace)
            || self.tables.iter().any(|t| t.namespace == namespace)
    }
}

/// Destination handler answering from a [`WarehouseSnapshot`] and recording
/// the SQL it is asked to execute.
pub struct SnapshotDestinationHandler {
    snapshot: Arc<WarehouseSnapshot>,
    stream_ids: HashMap<StreamDescriptor, StreamId>,
    fail_on: Option<String>,
    executed: Mutex<Vec<Sql>>,
    states: Mutex<HashMap<StreamDescriptor, MinimumDestinationState>>,
}

impl SnapshotDestinationHandler {
    /// Create a handler for the streams of `catalog`.
    pub fn new(snapshot: WarehouseSnapshot, catalog: &ParsedCatalog) -> Self {
        let states = snapshot
            .states
            .iter()
            .map(|s| (StreamDescriptor::new(&s.namespace, &s.name), s.state))
            .collect();
        let stream_ids = catalog
            .streams()
            .iter()
            .map(|s| (s.descriptor(), s.id.clone()))
            .collect();

        Self {
            snapshot: Arc::new(snapshot),
            stream_ids,
            fail_on: None,
            executed: Mutex::new(Vec::new()),
            states: Mutex::new(states),
        }
    }

    /// Fail every statement containing `needle`.
    pub fn with_failure_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on = Some(needle.into());
        self
    }

    /// A V1 to V2 migrator looking at the same snapshot.
    pub fn v1_v2_migrator(&self) -> SnapshotV1V2Migrator {
        SnapshotV1V2Migrator {
            snapshot: Arc::clone(&self.snapshot),
        }
    }

    pub fn snapshot(&self) -> &WarehouseSnapshot {
        &self.snapshot
    }

    /// Everything executed so far, in order.
    pub async fn executed(&self) -> Vec<Sql> {
        self.executed.lock().await.clone()
    }

    pub async fn executed_statements(&self) -> Vec<String> {
        self.executed
            .lock()
            .await
            .iter()
            .flat_map(|sql| sql.statements().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }

    /// Current persisted states, sorted by stream.
    pub async fn states(&self) -> Vec<SnapshotStreamState> {
        let mut states: Vec<SnapshotStreamState> = self
            .states
            .lock()
            .await
            .iter()
            .map(|(descriptor, state)| SnapshotStreamState {
                namespace: descriptor.namespace.clone(),
                name: descriptor.name.clone(),
                state: *state,
            })
            .collect();
        states.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        states
    }

    fn final_table(&self, id: &StreamId) -> Option<&SnapshotTable> {
        self.snapshot.table(&id.final_namespace, &id.final_name)
    }

    fn raw_stats(&self, id: &StreamId) -> Option<&RawTableStats> {
        self.snapshot
            .table(&id.raw_namespace, &id.raw_name)
            .and_then(|t| t.raw.as_ref())
    }
}

#[async_trait]
impl DestinationHandler for SnapshotDestinationHandler {
    type Table = TableDefinition;
    type State = MinimumDestinationState;

    async fn execute(&self, sql: &Sql) -> Result<()> {
        if let Some(needle) = &self.fail_on {
            if let Some(statement) = sql.statements().find(|s| s.contains(needle.as_str())) {
                return Err(TypingDedupingError::execution(
                    statement,
                    "injected failure",
                ));
            }
        }

        debug!("Recording {} transactions", sql.transactions.len());
        self.executed.lock().await.push(sql.clone());
        Ok(())
    }

    async fn find_existing_table(&self, id: &StreamId) -> Result<Option<TableDefinition>> {
        Ok(self.final_table(id).map(SnapshotTable::definition))
    }

    async fn is_final_table_empty(&self, id: &StreamId) -> Result<bool> {
        Ok(self.final_table(id).map_or(true, |t| t.row_count == 0))
    }

    /// Just before the oldest unloaded record, or the newest loaded one when
    /// everything is loaded.
    async fn get_min_timestamp_for_sync(&self, id: &StreamId) -> Result<Option<DateTime<Utc>>> {
        let Some(stats) = self.raw_stats(id) else {
            return Ok(None);
        };
        if stats.unloaded_records > 0 {
            if let Some(ts) = stats.min_unloaded_extracted_at {
                return Ok(Some(ts - Duration::seconds(1)));
            }
        }
        Ok(stats.max_loaded_extracted_at)
    }

    async fn has_unprocessed_raw_records(&self, id: &StreamId) -> Result<bool> {
        Ok(self.raw_stats(id).is_some_and(|s| s.unloaded_records > 0))
    }

    async fn fetch_destination_states(&self) -> Result<HashMap<StreamId, MinimumDestinationState>> {
        let states = self.states.lock().await;
        Ok(states
            .iter()
            .filter_map(|(descriptor, state)| {
                self.stream_ids
                    .get(descriptor)
                    .map(|id| (id.clone(), *state))
            })
            .collect())
    }

    async fn commit_destination_states(
        &self,
        states: &HashMap<StreamId, MinimumDestinationState>,
    ) -> Result<()> {
        let mut stored = self.states.lock().await;
        for (id, state) in states {
            stored.insert(id.descriptor(), *state);
        }
        debug!("Committed destination states for {} streams", states.len());
        Ok(())
    }
}

/// Looks for V1 raw tables in a [`WarehouseSnapshot`].
///
/// V1 raw tables are named `_airbyte_raw_<final name>` and sit next to the
/// final table.
#[derive(Debug, Clone)]
pub struct SnapshotV1V2Migrator {
    snapshot: Arc<WarehouseSnapshot>,
}

#[async_trait]
impl DestinationV1V2Migrator<SnapshotDestinationHandler> for SnapshotV1V2Migrator {
    async fn does_airbyte_internal_namespace_exist(&self, stream_id: &StreamId) -> Result<bool> {
        Ok(self.snapshot.has_namespace(&stream_id.raw_namespace))
    }

    async fn get_table_if_exists(
        &self,
        namespace: &str,
        table_name: &str,
    ) -> Result<Option<TableDefinition>> {
        Ok(self
            .snapshot
            .table(namespace, table_name)
            .map(SnapshotTable::definition))
    }

    fn schema_matches_expectation(&self, table: &TableDefinition, columns: &[&str]) -> bool {
        table.has_all_columns(columns)
    }

    fn convert_to_v1_raw_name(&self, stream: &StreamConfig) -> NamespacedTableName {
        NamespacedTableName::new(
            &stream.id.final_namespace,
            format!("_airbyte_raw_{}", stream.id.final_name),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogParser, ConfiguredCatalog};
    use crate::config::Config;
    use crate::core::schema::{LEGACY_RAW_TABLE_COLUMNS, V2_RAW_TABLE_COLUMN_NAMES};
    use crate::drivers::PostgresSqlGenerator;
    use crate::orchestrator::TyperDeduper;
    use chrono::TimeZone;

    const CATALOG: &str = r#"{
        "streams": [
            {
                "namespace": "public",
                "name": "users",
                "json_schema": {"type": "object", "properties": {"id": {"type": "integer"}, "name": {"type": "string"}}},
                "destination_sync_mode": "append_dedup",
                "primary_key": [["id"]]
            }
        ]
    }"#;

    fn catalog() -> ParsedCatalog {
        let configured = ConfiguredCatalog::from_json(CATALOG).unwrap();
        CatalogParser::new(&PostgresSqlGenerator, &Config::default())
            .parse(&configured)
            .unwrap()
    }

    fn users_id(catalog: &ParsedCatalog) -> StreamId {
        catalog.get_stream("public", "users").unwrap().id.clone()
    }

    const SNAPSHOT: &str = r#"
tables:
  - namespace: public
    name: users
    row_count: 3
    columns:
      - {name: _airbyte_raw_id, type_name: character varying, nullable: false}
      - {name: _airbyte_extracted_at, type_name: timestamp with time zone, nullable: false}
      - {name: _airbyte_meta, type_name: jsonb, nullable: false}
      - {name: id, type_name: bigint}
      - {name: name, type_name: character varying}
  - namespace: airbyte_internal
    name: public_raw__stream_users
    raw:
      unloaded_records: 2
      min_unloaded_extracted_at: 2024-05-01T10:00:00Z
      max_loaded_extracted_at: 2024-04-30T08:00:00Z
states:
  - namespace: public
    name: users
    state: {needs_soft_reset: true}
"#;

    #[tokio::test]
    async fn test_answers_from_snapshot() {
        let catalog = catalog();
        let id = users_id(&catalog);
        let handler =
            SnapshotDestinationHandler::new(WarehouseSnapshot::from_yaml(SNAPSHOT).unwrap(), &catalog);

        let table = handler.find_existing_table(&id).await.unwrap().unwrap();
        assert!(table.has_column("id"));
        assert!(!handler.is_final_table_empty(&id).await.unwrap());
        assert!(handler.has_unprocessed_raw_records(&id).await.unwrap());
        assert_eq!(
            handler.get_min_timestamp_for_sync(&id).await.unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 59, 59).unwrap())
        );

        let states = handler.fetch_destination_states().await.unwrap();
        assert!(states[&id].needs_soft_reset);
    }

    #[tokio::test]
    async fn test_fully_loaded_raw_table_scopes_to_newest_loaded() {
        let catalog = catalog();
        let id = users_id(&catalog);
        let mut snapshot = WarehouseSnapshot::from_yaml(SNAPSHOT).unwrap();
        snapshot.tables[1].raw = Some(RawTableStats {
            unloaded_records: 0,
            min_unloaded_extracted_at: None,
            max_loaded_extracted_at: Some(Utc.with_ymd_and_hms(2024, 4, 30, 8, 0, 0).unwrap()),
        });
        let handler = SnapshotDestinationHandler::new(snapshot, &catalog);

        assert!(!handler.has_unprocessed_raw_records(&id).await.unwrap());
        assert_eq!(
            handler.get_min_timestamp_for_sync(&id).await.unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 4, 30, 8, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_empty_snapshot() {
        let catalog = catalog();
        let id = users_id(&catalog);
        let handler = SnapshotDestinationHandler::new(WarehouseSnapshot::default(), &catalog);

        assert!(handler.find_existing_table(&id).await.unwrap().is_none());
        assert!(handler.is_final_table_empty(&id).await.unwrap());
        assert_eq!(handler.get_min_timestamp_for_sync(&id).await.unwrap(), None);
        assert!(handler.fetch_destination_states().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_replaces_states() {
        let catalog = catalog();
        let id = users_id(&catalog);
        let handler =
            SnapshotDestinationHandler::new(WarehouseSnapshot::from_yaml(SNAPSHOT).unwrap(), &catalog);

        let states = HashMap::from([(id, MinimumDestinationState { needs_soft_reset: false })]);
        handler.commit_destination_states(&states).await.unwrap();

        assert_eq!(
            handler.states().await,
            vec![SnapshotStreamState {
                namespace: "public".into(),
                name: "users".into(),
                state: MinimumDestinationState::default(),
            }]
        );
    }

    #[tokio::test]
    async fn test_injected_failure_is_not_recorded() {
        let handler = SnapshotDestinationHandler::new(WarehouseSnapshot::default(), &catalog())
            .with_failure_on("DROP");

        handler.execute(&Sql::of("CREATE TABLE x")).await.unwrap();
        let err = handler
            .execute(&Sql::transactionally(["DROP TABLE x", "CREATE TABLE x"]))
            .await
            .unwrap_err();

        assert!(matches!(err, TypingDedupingError::Execution { ref sql, .. } if sql == "DROP TABLE x"));
        assert_eq!(handler.executed_statements().await, vec!["CREATE TABLE x"]);
    }

    #[tokio::test]
    async fn test_v1_v2_migrator_over_snapshot() {
        let catalog = catalog();
        let stream = catalog.get_stream("public", "users").unwrap();

        let legacy = WarehouseSnapshot {
            tables: vec![SnapshotTable {
                namespace: "public".into(),
                name: "_airbyte_raw_users".into(),
                columns: LEGACY_RAW_TABLE_COLUMNS
                    .iter()
                    .map(|c| ColumnDefinition::new(*c, "text", true))
                    .collect(),
                row_count: 10,
                raw: None,
            }],
            ..WarehouseSnapshot::default()
        };
        let handler = SnapshotDestinationHandler::new(legacy.clone(), &catalog);
        assert!(handler.v1_v2_migrator().should_migrate(stream).await.unwrap());

        let mut upgraded = legacy;
        upgraded.tables.push(SnapshotTable {
            namespace: "airbyte_internal".into(),
            name: "public_raw__stream_users".into(),
            columns: V2_RAW_TABLE_COLUMN_NAMES
                .iter()
                .map(|c| ColumnDefinition::new(*c, "text", true))
                .collect(),
            row_count: 10,
            raw: Some(RawTableStats::default()),
        });
        let handler = SnapshotDestinationHandler::new(upgraded, &catalog);
        assert!(!handler.v1_v2_migrator().should_migrate(stream).await.unwrap());
    }

    #[tokio::test]
    async fn test_plans_a_sync_against_empty_warehouse() {
        let catalog = catalog();
        let handler = SnapshotDestinationHandler::new(WarehouseSnapshot::default(), &catalog);
        let migrator = handler.v1_v2_migrator();
        let td = TyperDeduper::new(PostgresSqlGenerator, handler, catalog, &Config::default())
            .with_v1_v2_migrator(Box::new(migrator));

        td.prepare_schemas().await.unwrap();
        td.prepare_tables().await.unwrap();
        td.type_and_dedupe("public", "users", false).await.unwrap();
        td.commit_final_tables().await.unwrap();

        let statements = td.handler().executed_statements().await;
        assert_eq!(statements[0], "CREATE SCHEMA IF NOT EXISTS \"airbyte_internal\"");
        assert_eq!(statements[1], "CREATE SCHEMA IF NOT EXISTS \"public\"");
        assert!(statements[2].starts_with("CREATE TABLE \"public\".\"users\""));
        assert!(statements[3].starts_with("INSERT INTO \"public\".\"users\""));
        assert_eq!(
            td.handler().states().await,
            vec![SnapshotStreamState {
                namespace: "public".into(),
                name: "users".into(),
                state: MinimumDestinationState::default(),
            }]
        );
    }

    #[tokio::test]
    async fn test_load_snapshot_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("warehouse.yaml");
        std::fs::write(&yaml, SNAPSHOT).unwrap();
        let snapshot = WarehouseSnapshot::load(&yaml).unwrap();
        assert_eq!(snapshot.tables.len(), 2);

        let json = dir.path().join("warehouse.json");
        std::fs::write(&json, serde_json::to_string(&snapshot).unwrap()).unwrap();
        assert_eq!(WarehouseSnapshot::load(&json).unwrap(), snapshot);
    }
}
