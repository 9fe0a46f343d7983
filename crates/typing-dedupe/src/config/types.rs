//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// Namespace holding every raw table unless overridden.
pub const DEFAULT_RAW_NAMESPACE: &str = "airbyte_internal";

/// Upper bound on streams prepared or typed at the same time.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: usize = 8;

/// Root configuration structure.
///
/// Constructed once per sync and passed by reference to the components that
/// need it; nothing in the engine reads configuration from global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Namespace for raw tables (default: "airbyte_internal").
    #[serde(default = "default_raw_namespace")]
    pub raw_namespace: String,

    /// Namespace for streams that do not declare one (default: "public").
    #[serde(default = "default_public_namespace")]
    pub default_namespace: String,

    /// Allow the valve to schedule type-and-dedupe passes mid-sync (default: false).
    #[serde(default)]
    pub enable_incremental_final_table_updates: bool,

    /// Streams prepared concurrently. Uses the built-in default if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_streams: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            raw_namespace: default_raw_namespace(),
            default_namespace: default_public_namespace(),
            enable_incremental_final_table_updates: false,
            max_concurrent_streams: None,
        }
    }
}

impl Config {
    /// Effective stream concurrency.
    pub fn get_max_concurrent_streams(&self) -> usize {
        self.max_concurrent_streams
            .unwrap_or(DEFAULT_MAX_CONCURRENT_STREAMS)
    }
}

fn default_raw_namespace() -> String {
    DEFAULT_RAW_NAMESPACE.to_string()
}

fn default_public_namespace() -> String {
    "public".to_string()
}
