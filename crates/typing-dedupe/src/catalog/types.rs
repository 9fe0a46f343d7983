//! Configured catalog type definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::SyncMode;

/// Streams the source will emit in this sync, as the platform configured them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredCatalog {
    pub streams: Vec<ConfiguredStream>,
}

/// One configured stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredStream {
    /// Source namespace. Falls back to the configured default namespace if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub name: String,

    /// JSON schema of the stream's records.
    pub json_schema: Value,

    pub destination_sync_mode: SyncMode,

    /// Primary key as field paths. Only single-element paths are supported.
    #[serde(default)]
    pub primary_key: Vec<Vec<String>>,

    /// Cursor field path. Only a single-element path is supported.
    #[serde(default)]
    pub cursor_field: Vec<String>,
}
