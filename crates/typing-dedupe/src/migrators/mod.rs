//! Schema and state migrations that run before a stream is classified.
//!
//! - [`migration`]: the generic, state-tracked migration pipeline
//! - [`v1v2`]: one-time upgrade of a legacy raw table to the V2 layout

pub mod migration;
pub mod v1v2;

pub use migration::{Migration, MigrationResult};
pub use v1v2::{DestinationV1V2Migrator, NamespacedTableName, NoOpV1V2Migrator};
