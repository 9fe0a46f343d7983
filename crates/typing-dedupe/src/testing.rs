//! In-crate test doubles.
//!
//! `MockSqlGenerator` emits one short, human-readable statement per operation
//! so tests can assert the exact sequence of work; `MockDestinationHandler`
//! records what it executes and answers table questions from per-stream facts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use tokio::sync::Mutex;

use crate::core::{
    AirbyteProtocolType, AirbyteType, ColumnId, DestinationHandler, DestinationState, Sql,
    SqlGenerator, StreamConfig, StreamId, SyncMode,
};
use crate::error::{Result, TypingDedupingError};

pub const RAW_NAMESPACE: &str = "airbyte_internal";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockTable {
    pub schema_matches: bool,
    pub columns: Vec<String>,
}

impl MockTable {
    pub fn with_columns(columns: &[&str]) -> Self {
        Self {
            schema_matches: true,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MockSqlGenerator;

impl SqlGenerator for MockSqlGenerator {
    type Table = MockTable;

    fn build_stream_id(&self, namespace: &str, name: &str, raw_namespace: &str) -> StreamId {
        StreamId::new(namespace, name, raw_namespace, name, namespace, name)
    }

    fn build_column_id(&self, name: &str, suffix: Option<&str>) -> ColumnId {
        let wire = format!("{}{}", name, suffix.unwrap_or(""));
        ColumnId::new(wire.clone(), name, wire.to_lowercase())
    }

    fn create_schema(&self, schema: &str) -> Sql {
        Sql::of(format!("CREATE SCHEMA {}", schema))
    }

    fn create_table(&self, stream: &StreamConfig, suffix: &str, _force: bool) -> Sql {
        Sql::of(format!("CREATE TABLE {}", stream.id.final_table_id("", suffix)))
    }

    fn existing_schema_matches_stream_config(
        &self,
        _stream: &StreamConfig,
        existing: &MockTable,
    ) -> Result<bool> {
        Ok(existing.schema_matches)
    }

    fn update_table(
        &self,
        stream: &StreamConfig,
        final_suffix: &str,
        min_raw_timestamp: Option<DateTime<Utc>>,
        use_safer_casting: bool,
    ) -> Sql {
        let casting = if use_safer_casting { "WITH" } else { "WITHOUT" };
        let scope = min_raw_timestamp
            .map(|ts| {
                format!(
                    " WHERE extracted_at > {}",
                    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
                )
            })
            .unwrap_or_default();
        Sql::of(format!(
            "UPDATE TABLE {} {} SAFER CASTING{}",
            stream.id.final_table_id("", final_suffix),
            casting,
            scope
        ))
    }

    fn overwrite_final_table(&self, stream_id: &StreamId, final_suffix: &str) -> Sql {
        Sql::of(format!(
            "OVERWRITE TABLE {} FROM {}",
            stream_id.final_table_id("", ""),
            stream_id.final_table_id("", final_suffix)
        ))
    }

    fn clear_loaded_at(&self, stream_id: &StreamId) -> Sql {
        Sql::of(format!("CLEAR LOADED AT {}", stream_id.raw_table_id("")))
    }

    fn migrate_from_v1_to_v2(&self, stream_id: &StreamId, namespace: &str, table_name: &str) -> Sql {
        Sql::of(format!(
            "MIGRATE {}.{} TO {}",
            namespace,
            table_name,
            stream_id.raw_table_id("")
        ))
    }

    fn prepare_tables_for_soft_reset(&self, stream: &StreamConfig) -> Sql {
        Sql::of(format!(
            "PREPARE {} FOR SOFT RESET",
            stream.id.final_table_id("", "")
        ))
    }
}

/// State with two independent migration markers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockState {
    pub needs_soft_reset: bool,
    pub soft_reset_migration_completed: bool,
    pub non_soft_reset_migration_completed: bool,
}

impl DestinationState for MockState {
    fn needs_soft_reset(&self) -> bool {
        self.needs_soft_reset
    }

    fn with_soft_reset(&self, needs_soft_reset: bool) -> Self {
        Self {
            needs_soft_reset,
            ..*self
        }
    }
}

/// What the mock handler reports about one stream's tables.
#[derive(Debug, Clone, Default)]
pub struct TableFacts {
    pub present: bool,
    pub empty: bool,
    pub schema_matches: bool,
    pub min_extracted_at: Option<DateTime<Utc>>,
    pub unprocessed_raw_records: bool,
}

impl TableFacts {
    pub fn absent() -> Self {
        Self {
            present: false,
            empty: true,
            schema_matches: true,
            ..Self::default()
        }
    }

    pub fn existing(empty: bool, schema_matches: bool) -> Self {
        Self {
            present: true,
            empty,
            schema_matches,
            ..Self::default()
        }
    }

    pub fn with_min_extracted_at(mut self, ts: DateTime<Utc>) -> Self {
        self.min_extracted_at = Some(ts);
        self
    }

    pub fn with_unprocessed_raw_records(mut self, unprocessed: bool) -> Self {
        self.unprocessed_raw_records = unprocessed;
        self
    }
}

#[derive(Default)]
pub struct MockDestinationHandler {
    facts: Mutex<HashMap<StreamId, TableFacts>>,
    default_facts: Mutex<Option<TableFacts>>,
    states: Mutex<HashMap<StreamId, MockState>>,
    executed: Mutex<Vec<Sql>>,
    committed: Mutex<Vec<HashMap<StreamId, MockState>>>,
    fail_on: Mutex<Option<String>>,
    fact_lookups: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockDestinationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Facts for every stream without explicit ones.
    pub async fn set_default_facts(&self, facts: TableFacts) {
        *self.default_facts.lock().await = Some(facts);
    }

    pub async fn set_facts(&self, id: &StreamId, facts: TableFacts) {
        self.facts.lock().await.insert(id.clone(), facts);
    }

    pub async fn set_state(&self, id: &StreamId, state: MockState) {
        self.states.lock().await.insert(id.clone(), state);
    }

    /// Fail every statement containing `needle`.
    pub async fn fail_on(&self, needle: &str) {
        *self.fail_on.lock().await = Some(needle.to_string());
    }

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

    pub async fn committed_states(&self) -> Vec<HashMap<StreamId, MockState>> {
        self.committed.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.executed.lock().await.clear();
        self.committed.lock().await.clear();
    }

    /// How many times `find_existing_table` was called.
    pub fn fact_lookups(&self) -> usize {
        self.fact_lookups.load(Ordering::SeqCst)
    }

    /// Highest number of `execute` calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn facts_for(&self, id: &StreamId) -> TableFacts {
        if let Some(facts) = self.facts.lock().await.get(id) {
            return facts.clone();
        }
        self.default_facts
            .lock()
            .await
            .clone()
            .unwrap_or_else(TableFacts::absent)
    }
}

#[async_trait]
impl DestinationHandler for MockDestinationHandler {
    type Table = MockTable;
    type State = MockState;

    async fn execute(&self, sql: &Sql) -> Result<()> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(needle) = self.fail_on.lock().await.as_deref() {
            if let Some(statement) = sql.statements().find(|s| s.contains(needle)) {
                return Err(TypingDedupingError::execution(statement, "foo"));
            }
        }
        self.executed.lock().await.push(sql.clone());
        Ok(())
    }

    async fn find_existing_table(&self, id: &StreamId) -> Result<Option<MockTable>> {
        self.fact_lookups.fetch_add(1, Ordering::SeqCst);
        let facts = self.facts_for(id).await;
        Ok(facts.present.then(|| MockTable {
            schema_matches: facts.schema_matches,
            columns: Vec::new(),
        }))
    }

    async fn is_final_table_empty(&self, id: &StreamId) -> Result<bool> {
        Ok(self.facts_for(id).await.empty)
    }

    async fn get_min_timestamp_for_sync(&self, id: &StreamId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.facts_for(id).await.min_extracted_at)
    }

    async fn has_unprocessed_raw_records(&self, id: &StreamId) -> Result<bool> {
        Ok(self.facts_for(id).await.unprocessed_raw_records)
    }

    async fn fetch_destination_states(&self) -> Result<HashMap<StreamId, MockState>> {
        Ok(self.states.lock().await.clone())
    }

    async fn commit_destination_states(&self, states: &HashMap<StreamId, MockState>) -> Result<()> {
        self.committed.lock().await.push(states.clone());
        Ok(())
    }
}

/// A stream with an integer `id` and a string `name` column.
pub fn stream_config(namespace: &str, name: &str, sync_mode: SyncMode) -> StreamConfig {
    let generator = MockSqlGenerator;
    let id_column = generator.build_column_id("id", None);
    let mut columns = IndexMap::new();
    columns.insert(
        id_column.clone(),
        AirbyteType::Primitive(AirbyteProtocolType::Integer),
    );
    columns.insert(
        generator.build_column_id("name", None),
        AirbyteType::Primitive(AirbyteProtocolType::String),
    );

    let (primary_key, cursor) = match sync_mode {
        SyncMode::AppendDedup => (vec![id_column.clone()], Some(id_column)),
        SyncMode::Overwrite | SyncMode::Append => (Vec::new(), None),
    };

    StreamConfig {
        id: generator.build_stream_id(namespace, name, RAW_NAMESPACE),
        sync_mode,
        primary_key,
        cursor,
        columns,
    }
}
