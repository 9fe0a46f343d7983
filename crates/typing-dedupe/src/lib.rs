//! # typing-dedupe
//!
//! Table lifecycle engine for warehouse destinations that land records in an
//! append-only raw table and then type and deduplicate them into a final table.
//!
//! Per stream and per sync the engine decides whether the final table is
//! created, soft-reset, staged in a tmp table and swapped in at commit, or
//! left alone. It provides:
//!
//! - **Lifecycle orchestration** with a fail-fast disable on setup errors
//! - **Migrations** tracked through persisted per-stream state
//! - **V1 to V2 raw table upgrades**
//! - **Throttling** of incremental typing passes
//! - **A Postgres SQL generator** and a dry-run snapshot handler
//!
//! ## Example
//!
//! ```rust,no_run
//! use typing_dedupe::catalog::{CatalogParser, ConfiguredCatalog};
//! use typing_dedupe::drivers::{PostgresSqlGenerator, SnapshotDestinationHandler, WarehouseSnapshot};
//! use typing_dedupe::{Config, TyperDeduper};
//!
//! #[tokio::main]
//! async fn main() -> typing_dedupe::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let configured = ConfiguredCatalog::load("catalog.json")?;
//!     let generator = PostgresSqlGenerator::new();
//!     let catalog = CatalogParser::new(&generator, &config).parse(&configured)?;
//!
//!     let snapshot = WarehouseSnapshot::load("warehouse.yaml")?;
//!     let handler = SnapshotDestinationHandler::new(snapshot, &catalog);
//!     let td = TyperDeduper::new(generator, handler, catalog, &config);
//!     td.prepare_tables().await?;
//!     td.type_and_dedupe("public", "users", false).await?;
//!     td.commit_final_tables().await?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod migrators;
pub mod orchestrator;
pub mod valve;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::Config;
pub use core::{
    DestinationHandler, DestinationState, ParsedCatalog, Sql, SqlGenerator, StreamConfig,
    StreamDescriptor, StreamId, SyncMode,
};
pub use error::{Result, TypingDedupingError};
pub use migrators::{DestinationV1V2Migrator, Migration, MigrationResult};
pub use orchestrator::{LifecyclePhase, StreamSyncSummary, TyperDeduper};
pub use valve::TypeAndDedupeOperationValve;
