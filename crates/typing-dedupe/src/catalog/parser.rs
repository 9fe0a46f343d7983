//! Turning a configured catalog into engine stream configs.

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::Config;
use crate::core::{
    AirbyteType, ColumnId, ParsedCatalog, SqlGenerator, StreamConfig, StreamId, SyncMode,
};
use crate::error::{Result, TypingDedupingError};

use super::types::{ConfiguredCatalog, ConfiguredStream};

/// Derives stream and column identifiers with a generator's naming rules.
///
/// Every identifier is derived here, once, and reused verbatim for the rest
/// of the sync.
pub struct CatalogParser<'a, G: SqlGenerator + ?Sized> {
    generator: &'a G,
    raw_namespace: &'a str,
    default_namespace: &'a str,
}

impl<'a, G: SqlGenerator + ?Sized> CatalogParser<'a, G> {
    pub fn new(generator: &'a G, config: &'a Config) -> Self {
        Self {
            generator,
            raw_namespace: &config.raw_namespace,
            default_namespace: &config.default_namespace,
        }
    }

    /// Parse every stream, renaming streams whose tables would collide with
    /// an earlier stream's.
    pub fn parse(&self, catalog: &ConfiguredCatalog) -> Result<ParsedCatalog> {
        let mut streams: Vec<StreamConfig> = Vec::with_capacity(catalog.streams.len());

        for configured in &catalog.streams {
            let mut stream = self.to_stream_config(configured)?;

            let collides = streams.iter().any(|other| {
                other.id.final_table_id("", "") == stream.id.final_table_id("", "")
                    || other.id.raw_table_id("") == stream.id.raw_table_id("")
            });
            if collides {
                stream.id = self.dodge_table_collision(&stream.id);
                warn!(
                    "Detected table name collision for {}, writing it to {}",
                    stream.id,
                    stream.id.final_table_id("", "")
                );
            }

            streams.push(stream);
        }

        info!("Parsed catalog with {} streams", streams.len());
        ParsedCatalog::new(streams)
    }

    fn to_stream_config(&self, configured: &ConfiguredStream) -> Result<StreamConfig> {
        let namespace = configured
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(self.default_namespace);
        let id = self
            .generator
            .build_stream_id(namespace, &configured.name, self.raw_namespace);

        let properties = top_level_properties(&AirbyteType::from_json_schema(&configured.json_schema))
            .ok_or_else(|| {
                TypingDedupingError::InvalidArgument(format!(
                    "Top-level schema of stream {} must be an object",
                    id
                ))
            })?;

        if configured.primary_key.iter().any(|path| path.len() > 1) {
            return Err(TypingDedupingError::InvalidArgument(format!(
                "Only top-level primary keys are supported (stream {})",
                id
            )));
        }
        let primary_key: Vec<ColumnId> = configured
            .primary_key
            .iter()
            .filter_map(|path| path.first())
            .map(|field| self.generator.build_column_id(field, None))
            .collect();

        if configured.destination_sync_mode == SyncMode::AppendDedup && primary_key.is_empty() {
            return Err(TypingDedupingError::InvalidArgument(format!(
                "Stream {} uses append_dedup but declares no primary key",
                id
            )));
        }

        let cursor = match configured.cursor_field.as_slice() {
            [] => None,
            [field] => Some(self.generator.build_column_id(field, None)),
            _ => {
                return Err(TypingDedupingError::InvalidArgument(format!(
                    "Only top-level cursors are supported (stream {})",
                    id
                )))
            }
        };

        Ok(StreamConfig {
            id,
            sync_mode: configured.destination_sync_mode,
            primary_key,
            cursor,
            columns: self.resolve_column_collisions(properties),
        })
    }

    /// Build column ids, suffixing `_1`, `_2`, ... onto a column whose
    /// canonical name is already taken.
    fn resolve_column_collisions(
        &self,
        properties: IndexMap<String, AirbyteType>,
    ) -> IndexMap<ColumnId, AirbyteType> {
        let mut columns: IndexMap<ColumnId, AirbyteType> = IndexMap::with_capacity(properties.len());
        let taken = |columns: &IndexMap<ColumnId, AirbyteType>, id: &ColumnId| {
            columns.keys().any(|c| c.canonical_name == id.canonical_name)
        };

        for (name, airbyte_type) in properties {
            let mut column = self.generator.build_column_id(&name, None);
            let mut i = 1;
            while taken(&columns, &column) {
                column = self.generator.build_column_id(&name, Some(&format!("_{}", i)));
                i += 1;
            }
            if i > 1 {
                warn!("Column {} collides with an earlier column, renamed to {}", name, column.name);
            }
            columns.insert(column, airbyte_type);
        }
        columns
    }

    fn dodge_table_collision(&self, id: &StreamId) -> StreamId {
        let digest = hex::encode(Sha256::digest(format!(
            "{}_{}",
            id.original_namespace, id.original_name
        )));
        let new_name = format!("{}_{}", id.original_name, &digest[..3]);
        let renamed = self
            .generator
            .build_stream_id(&id.original_namespace, &new_name, self.raw_namespace);

        StreamId::new(
            renamed.final_namespace,
            renamed.final_name,
            renamed.raw_namespace,
            renamed.raw_name,
            &id.original_namespace,
            &id.original_name,
        )
    }
}

/// Columns of a top-level schema, or `None` if it is not object-like.
///
/// A union contributes the properties of every struct it contains.
fn top_level_properties(schema: &AirbyteType) -> Option<IndexMap<String, AirbyteType>> {
    match schema {
        AirbyteType::Struct(properties) => Some(properties.clone()),
        AirbyteType::Union(options) if schema.is_struct_like() => {
            let mut merged = IndexMap::new();
            for option in options {
                if let AirbyteType::Struct(properties) = option {
                    for (name, airbyte_type) in properties {
                        merged.entry(name.clone()).or_insert_with(|| airbyte_type.clone());
                    }
                }
            }
            Some(merged)
        }
        AirbyteType::Primitive(_)
        | AirbyteType::Array(_)
        | AirbyteType::Union(_)
        | AirbyteType::UnsupportedOneOf(_) => None,
    }
}
