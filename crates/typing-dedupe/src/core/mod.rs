//! Core data model and collaborator traits.
//!
//! - [`identifier`]: stream and column identifiers, naming conventions
//! - [`types`]: logical column types
//! - [`catalog`]: per-stream configuration and the parsed catalog
//! - [`schema`]: existing-table metadata and reserved column names
//! - [`sql`]: generated SQL grouped into transactions
//! - [`state`]: persisted destination state and the initial-state snapshot
//! - [`traits`]: the generator and handler traits backends implement

pub mod catalog;
pub mod identifier;
pub mod schema;
pub mod sql;
pub mod state;
pub mod traits;
pub mod types;

pub use catalog::{ParsedCatalog, StreamConfig, SyncMode};
pub use identifier::{
    concatenate_raw_table_name, ColumnId, StreamDescriptor, StreamId, SOFT_RESET_SUFFIX,
    TMP_TABLE_SUFFIX,
};
pub use schema::{ColumnDefinition, TableDefinition};
pub use sql::Sql;
pub use state::{DestinationInitialState, DestinationState, MinimumDestinationState};
pub use traits::{DestinationHandler, SqlGenerator};
pub use types::{AirbyteProtocolType, AirbyteType};
