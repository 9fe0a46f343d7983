//! Bundled backends.
//!
//! - [`postgres`]: PostgreSQL SQL generator
//! - [`snapshot`]: dry-run destination handler over a static warehouse description
//!
//! # Adding New Warehouses
//!
//! 1. Create a module under `drivers/` (e.g., `drivers/snowflake/`)
//! 2. Implement `SqlGenerator` with the warehouse's table-definition type
//! 3. Implement `DestinationHandler` (and, if the warehouse had V1 syncs,
//!    `DestinationV1V2Migrator`) over the same table type

pub mod postgres;
pub mod snapshot;

pub use postgres::PostgresSqlGenerator;
pub use snapshot::{SnapshotDestinationHandler, SnapshotV1V2Migrator, WarehouseSnapshot};
