//! Physical table metadata and the reserved column names.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Unique id of a raw record, copied into the final table.
pub const COLUMN_NAME_AB_RAW_ID: &str = "_airbyte_raw_id";
/// When the source emitted the record.
pub const COLUMN_NAME_AB_EXTRACTED_AT: &str = "_airbyte_extracted_at";
/// Per-record typing errors and changes.
pub const COLUMN_NAME_AB_META: &str = "_airbyte_meta";
/// Raw-only: when typing and deduping last consumed the record.
pub const COLUMN_NAME_AB_LOADED_AT: &str = "_airbyte_loaded_at";
/// Raw-only: the untyped JSON payload.
pub const COLUMN_NAME_DATA: &str = "_airbyte_data";
/// CDC deletion marker column.
pub const COLUMN_NAME_AB_CDC_DELETED_AT: &str = "_ab_cdc_deleted_at";

pub const LEGACY_RAW_TABLE_COLUMN_AB_ID: &str = "_airbyte_ab_id";
pub const LEGACY_RAW_TABLE_COLUMN_EMITTED_AT: &str = "_airbyte_emitted_at";

/// Metadata columns every final table carries ahead of its user columns.
pub const FINAL_TABLE_COLUMN_NAMES: [&str; 3] = [
    COLUMN_NAME_AB_RAW_ID,
    COLUMN_NAME_AB_EXTRACTED_AT,
    COLUMN_NAME_AB_META,
];

/// Columns of a V2 raw table.
pub const V2_RAW_TABLE_COLUMN_NAMES: [&str; 4] = [
    COLUMN_NAME_AB_RAW_ID,
    COLUMN_NAME_AB_EXTRACTED_AT,
    COLUMN_NAME_AB_LOADED_AT,
    COLUMN_NAME_DATA,
];

/// Columns of a V1 raw table.
pub const LEGACY_RAW_TABLE_COLUMNS: [&str; 3] = [
    LEGACY_RAW_TABLE_COLUMN_AB_ID,
    COLUMN_NAME_DATA,
    LEGACY_RAW_TABLE_COLUMN_EMITTED_AT,
];

/// Column as reported by the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub type_name: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Existing table, columns keyed by name in warehouse order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub columns: IndexMap<String, ColumnDefinition>,
}

impl TableDefinition {
    pub fn new(columns: impl IntoIterator<Item = ColumnDefinition>) -> Self {
        Self {
            columns: columns.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Whether every name in `expected` is a column of this table.
    pub fn has_all_columns(&self, expected: &[&str]) -> bool {
        expected.iter().all(|c| self.has_column(c))
    }
}
