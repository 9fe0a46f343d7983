//! PostgreSQL driver.
//!
//! - [`PostgresSqlGenerator`]: typing, deduping and table-swap SQL for PostgreSQL

mod generator;

pub use generator::PostgresSqlGenerator;
