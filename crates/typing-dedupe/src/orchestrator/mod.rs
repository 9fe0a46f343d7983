//! Table lifecycle orchestrator - once-per-sync workflow coordinator.
//!
//! A [`TyperDeduper`] drives every stream of a catalog through three phases:
//!
//! 1. [`prepare_tables`](TyperDeduper::prepare_tables): run migrations, then
//!    create, soft-reset or stage each final table
//! 2. [`type_and_dedupe`](TyperDeduper::type_and_dedupe): type raw records into
//!    the stream's write target, as often as the caller likes
//! 3. [`commit_final_tables`](TyperDeduper::commit_final_tables): swap staged
//!    OVERWRITE tables into place
//!
//! Streams are independent: work for different streams runs concurrently (up
//! to `max_concurrent_streams`), while work for one stream is serialized by
//! that stream's lock. A failure while preparing tables disables the
//! orchestrator, after which every call is a silent no-op; callers check
//! [`is_disabled`](TyperDeduper::is_disabled) before reporting success.

mod initial_state;
mod lifecycle;


pub use initial_state::gather_initial_state;
pub use lifecycle::{LifecyclePhase, TableClassification};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::{
    DestinationHandler, DestinationInitialState, DestinationState, ParsedCatalog, Sql,
    SqlGenerator, StreamConfig, StreamDescriptor, StreamId, SyncMode, TMP_TABLE_SUFFIX,
};
use crate::error::{Result, TypingDedupingError};
use crate::migrators::{DestinationV1V2Migrator, Migration, NoOpV1V2Migrator};

/// What a caller observed while writing one stream's raw records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSyncSummary {
    /// Records written this sync, if the caller counted them.
    pub records_written: Option<u64>,
}

/// Per-stream facts fixed by `prepare_tables`.
#[derive(Debug, Clone, Default)]
struct StreamSlot {
    /// Suffix of the table `type_and_dedupe` writes into.
    target_suffix: String,
    min_extracted_at_for_sync: Option<DateTime<Utc>>,
    has_unprocessed_raw_records: bool,
}

/// Drives the table lifecycle of every stream in a catalog for one sync.
pub struct TyperDeduper<G, H>
where
    G: SqlGenerator,
    H: DestinationHandler<Table = G::Table>,
{
    generator: G,
    handler: H,
    catalog: ParsedCatalog,
    v1_v2_migrator: Box<dyn DestinationV1V2Migrator<H>>,
    migrations: Vec<Box<dyn Migration<H>>>,
    max_concurrent_streams: usize,
    phase: StdMutex<LifecyclePhase>,
    slots: HashMap<StreamDescriptor, Mutex<StreamSlot>>,
}

impl<G, H> TyperDeduper<G, H>
where
    G: SqlGenerator,
    H: DestinationHandler<Table = G::Table>,
{
    /// Create an orchestrator with no migrations registered.
    pub fn new(generator: G, handler: H, catalog: ParsedCatalog, config: &Config) -> Self {
        let slots = catalog
            .streams()
            .iter()
            .map(|s| (s.descriptor(), Mutex::new(StreamSlot::default())))
            .collect();

        Self {
            generator,
            handler,
            catalog,
            v1_v2_migrator: Box::new(NoOpV1V2Migrator),
            migrations: Vec::new(),
            max_concurrent_streams: config.get_max_concurrent_streams().max(1),
            phase: StdMutex::new(LifecyclePhase::Ready),
            slots,
        }
    }

    /// Use `migrator` to upgrade legacy raw tables.
    pub fn with_v1_v2_migrator(mut self, migrator: Box<dyn DestinationV1V2Migrator<H>>) -> Self {
        self.v1_v2_migrator = migrator;
        self
    }

    /// Run `migrations`, in order, for every stream before classification.
    pub fn with_migrations(mut self, migrations: Vec<Box<dyn Migration<H>>>) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a failed `prepare_tables` turned every later call into a no-op.
    pub fn is_disabled(&self) -> bool {
        self.phase() == LifecyclePhase::Disabled
    }

    pub fn catalog(&self) -> &ParsedCatalog {
        &self.catalog
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Create the raw namespace and every final namespace.
    ///
    /// Optional; when used it must run before `prepare_tables`.
    pub async fn prepare_schemas(&self) -> Result<()> {
        let phase = self.phase();
        if phase != LifecyclePhase::Ready {
            return Err(TypingDedupingError::IllegalState(format!(
                "Schemas must be prepared before tables (orchestrator is {})",
                phase
            )));
        }

        let mut schemas: Vec<&str> = Vec::new();
        let raw = self.catalog.streams().iter().map(|s| s.id.raw_namespace.as_str());
        let finals = self.catalog.streams().iter().map(|s| s.id.final_namespace.as_str());
        for schema in raw.chain(finals) {
            if !schemas.contains(&schema) {
                schemas.push(schema);
            }
        }

        info!("Preparing schemas: {}", schemas.join(", "));
        let sql = Sql::concat(schemas.iter().map(|s| self.generator.create_schema(s)));
        self.execute(&sql).await
    }

    /// Prepare every stream's final table. Must be called exactly once.
    ///
    /// On failure the orchestrator is disabled and the first failing stream's
    /// error is returned.
    pub async fn prepare_tables(&self) -> Result<()> {
        {
            let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
            if *phase != LifecyclePhase::Ready {
                return Err(TypingDedupingError::IllegalState(format!(
                    "Tables were already prepared (orchestrator is {})",
                    *phase
                )));
            }
            *phase = LifecyclePhase::Preparing;
        }

        info!("Preparing tables for {} streams", self.catalog.len());
        match self.prepare_all_streams().await {
            Ok(()) => {
                self.set_phase(LifecyclePhase::Armed);
                info!("Finished preparing tables");
                Ok(())
            }
            Err(e) => {
                self.set_phase(LifecyclePhase::Disabled);
                error!("Preparing tables failed, typing and deduping is disabled for this sync");
                Err(e)
            }
        }
    }

    /// Type and dedupe raw records of one stream into its write target.
    ///
    /// Fails with `InvalidArgument` for a stream outside the catalog, in any
    /// phase. A no-op once disabled.
    pub async fn type_and_dedupe(
        &self,
        namespace: &str,
        name: &str,
        must_run_safer_casting: bool,
    ) -> Result<()> {
        let stream = self.catalog.get_stream(namespace, name)?;
        if !self.check_armed("type and dedupe")? {
            return Ok(());
        }

        let slot = self.slot(stream)?.lock().await;
        // Commit may have finished while this call waited for the stream.
        if !self.check_armed("type and dedupe")? {
            return Ok(());
        }

        info!(
            "Typing and deduping {} into {}",
            stream.id,
            stream.id.final_table_id("", &slot.target_suffix)
        );
        let sql = self.generator.update_table(
            stream,
            &slot.target_suffix,
            slot.min_extracted_at_for_sync,
            must_run_safer_casting,
        );
        self.execute(&sql).await
    }

    /// Type and dedupe every stream that has something to type.
    ///
    /// A stream runs when it wrote records this sync (or did not report a
    /// count), or when its raw table already held unprocessed records.
    pub async fn type_and_dedupe_all(
        &self,
        summaries: &HashMap<StreamDescriptor, StreamSyncSummary>,
    ) -> Result<()> {
        if self.is_disabled() {
            info!("Typing and deduping is disabled, skipping all streams");
            return Ok(());
        }

        self.for_each_stream("type and dedupe", |stream| {
            self.type_and_dedupe_if_needed(stream, summaries)
        })
        .await
        .map(|_| ())
    }

    /// Swap every staged OVERWRITE table into place.
    ///
    /// A no-op once disabled or already committed.
    pub async fn commit_final_tables(&self) -> Result<()> {
        match self.phase() {
            LifecyclePhase::Disabled => {
                info!("Typing and deduping is disabled, not committing final tables");
                return Ok(());
            }
            LifecyclePhase::Committed => {
                warn!("Final tables were already committed, ignoring commit");
                return Ok(());
            }
            LifecyclePhase::Ready | LifecyclePhase::Preparing => {
                return Err(TypingDedupingError::IllegalState(
                    "Cannot commit final tables before prepare_tables has finished".into(),
                ));
            }
            LifecyclePhase::Armed => {}
        }

        self.for_each_stream("commit", |stream| self.commit_stream(stream))
            .await?;

        self.set_phase(LifecyclePhase::Committed);
        info!("Committed final tables");
        Ok(())
    }

    async fn prepare_all_streams(&self) -> Result<()> {
        let mut states = self.handler.fetch_destination_states().await?;

        let initial_states = self
            .for_each_stream("migrate", |stream| {
                let state = states.get(&stream.id).cloned().unwrap_or_default();
                self.migrate_stream(stream, state)
            })
            .await?;

        for initial in &initial_states {
            states.insert(
                initial.stream_config.id.clone(),
                initial.destination_state.clone(),
            );
        }
        self.handler.commit_destination_states(&states).await?;

        let updated = self
            .for_each_stream("prepare", |stream| {
                let initial = initial_states
                    .iter()
                    .find(|i| i.stream_config.id == stream.id);
                self.prepare_stream(stream, initial)
            })
            .await?;

        states.extend(updated);
        self.handler.commit_destination_states(&states).await
    }

    async fn type_and_dedupe_if_needed(
        &self,
        stream: &StreamConfig,
        summaries: &HashMap<StreamDescriptor, StreamSyncSummary>,
    ) -> Result<()> {
        let descriptor = stream.descriptor();
        let wrote_records = summaries
            .get(&descriptor)
            .and_then(|s| s.records_written)
            .map_or(true, |n| n > 0);
        let unprocessed = self.slot(stream)?.lock().await.has_unprocessed_raw_records;

        if wrote_records || unprocessed {
            self.type_and_dedupe(&descriptor.namespace, &descriptor.name, false)
                .await
        } else {
            info!(
                "Skipping typing and deduping for {}: no records this sync and none left unprocessed",
                stream.id
            );
            Ok(())
        }
    }

    async fn commit_stream(&self, stream: &StreamConfig) -> Result<()> {
        let mut slot = self.slot(stream)?.lock().await;
        if slot.target_suffix.is_empty() {
            return Ok(());
        }

        info!(
            "Overwriting {} with {}",
            stream.id.final_table_id("", ""),
            stream.id.final_table_id("", &slot.target_suffix)
        );
        let sql = self
            .generator
            .overwrite_final_table(&stream.id, &slot.target_suffix);
        self.execute(&sql).await?;
        slot.target_suffix.clear();
        Ok(())
    }

    /// Run migrations for one stream and return its up-to-date initial state.
    async fn migrate_stream(
        &self,
        stream: &StreamConfig,
        state: H::State,
    ) -> Result<DestinationInitialState<H::State>> {
        let _slot = self.slot(stream)?.lock().await;

        let mut initial =
            gather_initial_state(&self.generator, &self.handler, stream, state).await?;

        for migration in &self.migrations {
            let result = migration
                .migrate_if_necessary(&self.handler, stream, &initial)
                .await?;
            if result.invalidate_initial_state {
                debug!("{}: migration invalidated initial state, refetching", stream.id);
                initial = gather_initial_state(
                    &self.generator,
                    &self.handler,
                    stream,
                    result.updated_state,
                )
                .await?;
            } else {
                initial.destination_state = result.updated_state;
            }
        }

        let migrated = self
            .v1_v2_migrator
            .migrate_if_necessary(&self.generator, &self.handler, stream)
            .await?;
        if migrated {
            initial = gather_initial_state(
                &self.generator,
                &self.handler,
                stream,
                initial.destination_state,
            )
            .await?;
        }

        Ok(initial)
    }

    /// Classify one stream and make its final table ready for writes.
    async fn prepare_stream(
        &self,
        stream: &StreamConfig,
        initial: Option<&DestinationInitialState<H::State>>,
    ) -> Result<(StreamId, H::State)> {
        let initial = initial.ok_or_else(|| {
            TypingDedupingError::IllegalState(format!("No initial state gathered for {}", stream.id))
        })?;
        let mut slot = self.slot(stream)?.lock().await;

        let state = &initial.destination_state;
        let classification = TableClassification::classify(
            initial.final_table_present,
            initial.final_table_empty,
            initial.schema_matches && !state.needs_soft_reset(),
        );

        let target_suffix = match (classification, stream.sync_mode) {
            (TableClassification::Absent, _) => {
                info!("{}: final table does not exist, creating it", stream.id);
                self.execute(&self.generator.create_table(stream, "", false))
                    .await?;
                ""
            }
            (TableClassification::Clean, _) => {
                info!("{}: final table is empty with the expected schema, writing directly", stream.id);
                ""
            }
            (TableClassification::NeedsRecreate, SyncMode::Overwrite) => {
                info!(
                    "{}: final table needs replacing, staging into {}",
                    stream.id,
                    stream.id.final_name_with_suffix(TMP_TABLE_SUFFIX)
                );
                self.execute(&self.generator.create_table(stream, TMP_TABLE_SUFFIX, true))
                    .await?;
                TMP_TABLE_SUFFIX
            }
            (TableClassification::NeedsRecreate, SyncMode::Append | SyncMode::AppendDedup) => {
                info!("{}: final table needs rebuilding, running soft reset", stream.id);
                self.execute(&self.generator.prepare_tables_for_soft_reset(stream))
                    .await?;
                self.execute(&self.generator.soft_reset(stream)).await?;
                ""
            }
        };

        *slot = StreamSlot {
            target_suffix: target_suffix.to_string(),
            min_extracted_at_for_sync: initial.min_extracted_at_for_sync,
            has_unprocessed_raw_records: initial.has_unprocessed_raw_records,
        };

        Ok((stream.id.clone(), state.with_soft_reset(false)))
    }

    /// Run `f` for every catalog stream, `max_concurrent_streams` at a time.
    ///
    /// Every failure is logged; the first one is returned, attributed to its stream.
    async fn for_each_stream<'a, T, F, Fut>(&'a self, action: &str, f: F) -> Result<Vec<T>>
    where
        F: Fn(&'a StreamConfig) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let results: Vec<(&StreamConfig, Result<T>)> = stream::iter(self.catalog.streams())
            .map(|stream| {
                let fut = f(stream);
                async move { (stream, fut.await) }
            })
            .buffer_unordered(self.max_concurrent_streams)
            .collect()
            .await;

        let mut values = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (stream, result) in results {
            match result {
                Ok(value) => values.push(value),
                Err(e) => {
                    error!("{}: failed to {}: {}", stream.id, action, e);
                    if first_error.is_none() {
                        first_error = Some(TypingDedupingError::stream(stream.id.to_string(), e));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }

    async fn execute(&self, sql: &Sql) -> Result<()> {
        for statement in sql.statements() {
            debug!("Executing: {}", statement);
        }
        self.handler.execute(sql).await
    }

    /// `Ok(true)` when armed, `Ok(false)` when disabled, otherwise `IllegalState`.
    fn check_armed(&self, action: &str) -> Result<bool> {
        match self.phase() {
            LifecyclePhase::Armed => Ok(true),
            LifecyclePhase::Disabled => {
                debug!("Typing and deduping is disabled, skipping {}", action);
                Ok(false)
            }
            phase => Err(TypingDedupingError::IllegalState(format!(
                "Cannot {} while the orchestrator is {}",
                action, phase
            ))),
        }
    }

    fn slot(&self, stream: &StreamConfig) -> Result<&Mutex<StreamSlot>> {
        self.slots.get(&stream.descriptor()).ok_or_else(|| {
            TypingDedupingError::InvalidArgument(format!(
                "Could not find stream {} in catalog",
                stream.descriptor()
            ))
        })
    }

    fn set_phase(&self, phase: LifecyclePhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }
}
