//! Parsed stream catalog.
//!
//! A [`ParsedCatalog`] is built once per sync and is read-only afterwards.
//! Unlike a global registry it is explicitly constructed and passed to the
//! orchestrator, which keeps initialization order deterministic and tests
//! free to build catalogs by hand.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TypingDedupingError};

use super::identifier::{ColumnId, StreamDescriptor, StreamId};
use super::types::AirbyteType;

/// How a stream's records reach the final table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Replace the final table's contents at commit.
    Overwrite,
    /// Keep every record.
    Append,
    /// Keep the latest record per primary key.
    AppendDedup,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncMode::Overwrite => "overwrite",
            SyncMode::Append => "append",
            SyncMode::AppendDedup => "append_dedup",
        };
        f.write_str(name)
    }
}

/// Everything the engine knows about one stream. Immutable during a sync.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub id: StreamId,
    pub sync_mode: SyncMode,
    pub primary_key: Vec<ColumnId>,
    pub cursor: Option<ColumnId>,
    /// Final table columns, in generated column order.
    pub columns: IndexMap<ColumnId, AirbyteType>,
}

impl StreamConfig {
    pub fn descriptor(&self) -> StreamDescriptor {
        self.id.descriptor()
    }
}

/// Streams of one sync, keyed by `(namespace, name)`.
#[derive(Debug, Clone, Default)]
pub struct ParsedCatalog {
    streams: Vec<StreamConfig>,
    index: HashMap<StreamDescriptor, usize>,
}

impl ParsedCatalog {
    /// Build a catalog, rejecting two streams with the same key.
    pub fn new(streams: Vec<StreamConfig>) -> Result<Self> {
        let mut index = HashMap::with_capacity(streams.len());
        for (i, stream) in streams.iter().enumerate() {
            if index.insert(stream.descriptor(), i).is_some() {
                return Err(TypingDedupingError::Config(format!(
                    "Duplicate stream in catalog: {}",
                    stream.descriptor()
                )));
            }
        }
        Ok(Self { streams, index })
    }

    /// Look up a stream by its original namespace and name.
    pub fn get_stream(&self, namespace: &str, name: &str) -> Result<&StreamConfig> {
        self.get(&StreamDescriptor::new(namespace, name))
    }

    pub fn get(&self, descriptor: &StreamDescriptor) -> Result<&StreamConfig> {
        self.index
            .get(descriptor)
            .map(|&i| &self.streams[i])
            .ok_or_else(|| {
                TypingDedupingError::InvalidArgument(format!(
                    "Could not find stream {} in catalog",
                    descriptor
                ))
            })
    }

    /// Streams in catalog order.
    pub fn streams(&self) -> &[StreamConfig] {
        &self.streams
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
