//! PostgreSQL SQL generator.
//!
//! Raw records live in a `jsonb` `_airbyte_data` column. Typing extracts each
//! column out of it and casts it; deduping keeps the newest record per primary
//! key with `row_number()`. Every statement of one `update_table` call runs in
//! a single transaction so readers never see a half-typed batch.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::core::identifier::{concatenate_raw_table_name, qualify_pg, quote_pg};
use crate::core::schema::{
    TableDefinition, COLUMN_NAME_AB_CDC_DELETED_AT, COLUMN_NAME_AB_EXTRACTED_AT,
    COLUMN_NAME_AB_LOADED_AT, COLUMN_NAME_AB_META, COLUMN_NAME_AB_RAW_ID, COLUMN_NAME_DATA,
    FINAL_TABLE_COLUMN_NAMES, LEGACY_RAW_TABLE_COLUMN_AB_ID, LEGACY_RAW_TABLE_COLUMN_EMITTED_AT,
};
use crate::core::{
    AirbyteProtocolType, AirbyteType, ColumnId, Sql, SqlGenerator, StreamConfig, StreamId, SyncMode,
    SOFT_RESET_SUFFIX, TMP_TABLE_SUFFIX,
};
use crate::error::{Result, TypingDedupingError};

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
const MAX_PG_IDENTIFIER_LENGTH: usize = 63;

/// Final table names leave room for the longest table suffix.
const MAX_FINAL_NAME_LENGTH: usize = MAX_PG_IDENTIFIER_LENGTH
    - if SOFT_RESET_SUFFIX.len() > TMP_TABLE_SUFFIX.len() {
        SOFT_RESET_SUFFIX.len()
    } else {
        TMP_TABLE_SUFFIX.len()
    };

const JSONB: &str = "jsonb";
const TIMESTAMPTZ: &str = "timestamp with time zone";

/// Generates PostgreSQL for the table lifecycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresSqlGenerator;

impl PostgresSqlGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Column type as `information_schema.columns.data_type` reports it.
    ///
    /// These names are also valid in DDL, so one mapping serves both.
    pub fn to_dialect_type(&self, airbyte_type: &AirbyteType) -> &'static str {
        match airbyte_type {
            AirbyteType::Primitive(p) => primitive_type(*p),
            AirbyteType::Struct(_) | AirbyteType::Array(_) | AirbyteType::UnsupportedOneOf(_) => {
                JSONB
            }
            AirbyteType::Union(_) => self.to_dialect_type(&airbyte_type.choose_type()),
        }
    }

    fn final_table(&self, id: &StreamId, suffix: &str) -> String {
        qualify_pg(&id.final_namespace, &id.final_name_with_suffix(suffix))
    }

    fn raw_table(&self, id: &StreamId) -> String {
        qualify_pg(&id.raw_namespace, &id.raw_name)
    }

    fn create_table_sql(&self, stream: &StreamConfig, suffix: &str) -> String {
        let mut columns = vec![
            format!("{} varchar NOT NULL", quote_pg(COLUMN_NAME_AB_RAW_ID)),
            format!("{} {} NOT NULL", quote_pg(COLUMN_NAME_AB_EXTRACTED_AT), TIMESTAMPTZ),
            format!("{} {} NOT NULL", quote_pg(COLUMN_NAME_AB_META), JSONB),
        ];
        columns.extend(
            stream
                .columns
                .iter()
                .map(|(column, t)| format!("{} {}", quote_pg(&column.name), self.to_dialect_type(t))),
        );

        format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.final_table(&stream.id, suffix),
            columns.join(",\n  ")
        )
    }

    /// Expression extracting and casting one column out of `_airbyte_data`.
    fn extract_column(&self, column: &ColumnId, airbyte_type: &AirbyteType, safer: bool) -> String {
        let json = format!("{}->{}", quote_pg(COLUMN_NAME_DATA), literal(&column.original_name));
        let text = format!("{}->>{}", quote_pg(COLUMN_NAME_DATA), literal(&column.original_name));

        match airbyte_type {
            AirbyteType::Struct(_) => json_guarded(&json, "object"),
            AirbyteType::Array(_) => json_guarded(&json, "array"),
            AirbyteType::UnsupportedOneOf(_) => format!("({})", json),
            AirbyteType::Union(_) => {
                self.extract_column(column, &airbyte_type.choose_type(), safer)
            }
            AirbyteType::Primitive(AirbyteProtocolType::Unknown) => format!("({})", json),
            AirbyteType::Primitive(AirbyteProtocolType::String) => format!("({})", text),
            AirbyteType::Primitive(p) => {
                let cast = format!("CAST(({}) AS {})", text, primitive_type(*p));
                match safer_casting_guard(*p, &json, &text) {
                    Some(guard) if safer => format!("CASE WHEN {} THEN {} ELSE NULL END", guard, cast),
                    _ => cast,
                }
            }
        }
    }

    /// `_airbyte_meta` with one error entry per column whose value did not survive typing.
    fn build_meta_column(&self, columns: &IndexMap<ColumnId, AirbyteType>, safer: bool) -> String {
        if columns.is_empty() {
            return "jsonb_build_object('errors', '[]'::jsonb)".to_string();
        }

        let checks = columns
            .iter()
            .map(|(column, t)| {
                let json = format!("{}->{}", quote_pg(COLUMN_NAME_DATA), literal(&column.original_name));
                format!(
                    "CASE WHEN ({json}) IS NOT NULL AND jsonb_typeof({json}) <> 'null' AND ({typed}) IS NULL THEN {message} END",
                    json = json,
                    typed = self.extract_column(column, t, safer),
                    message = literal(&format!("Problem with `{}`", column.original_name)),
                )
            })
            .collect::<Vec<_>>()
            .join(",\n      ");

        format!(
            "jsonb_build_object('errors', to_jsonb(ARRAY_REMOVE(ARRAY[\n      {}\n    ]::text[], NULL)))",
            checks
        )
    }

    fn has_cdc_deleted_at(&self, stream: &StreamConfig) -> bool {
        stream
            .columns
            .contains_key(&self.build_column_id(COLUMN_NAME_AB_CDC_DELETED_AT, None))
    }

    fn raw_table_condition(&self, stream: &StreamConfig, min_raw_timestamp: Option<DateTime<Utc>>) -> String {
        let mut condition = format!("{} IS NULL", quote_pg(COLUMN_NAME_AB_LOADED_AT));
        if stream.sync_mode == SyncMode::AppendDedup && self.has_cdc_deleted_at(stream) {
            // Deletions already typed must reach the final table again so they can delete rows.
            condition = format!(
                "({} OR ({} IS NOT NULL AND jsonb_typeof({}->{}) <> 'null'))",
                condition,
                quote_pg(COLUMN_NAME_AB_LOADED_AT),
                quote_pg(COLUMN_NAME_DATA),
                literal(COLUMN_NAME_AB_CDC_DELETED_AT)
            );
        }
        if let Some(ts) = min_raw_timestamp {
            condition = format!("{} AND {}", condition, extracted_after(ts));
        }
        condition
    }

    fn row_number(&self, stream: &StreamConfig) -> String {
        let partition = stream
            .primary_key
            .iter()
            .map(|c| quote_pg(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut order = Vec::new();
        if let Some(cursor) = &stream.cursor {
            order.push(format!("{} DESC NULLS LAST", quote_pg(&cursor.name)));
        }
        order.push(format!("{} DESC", quote_pg(COLUMN_NAME_AB_EXTRACTED_AT)));

        format!(
            "row_number() OVER (PARTITION BY {} ORDER BY {})",
            partition,
            order.join(", ")
        )
    }

    fn insert_sql(
        &self,
        stream: &StreamConfig,
        final_suffix: &str,
        min_raw_timestamp: Option<DateTime<Utc>>,
        safer: bool,
    ) -> String {
        let final_columns: Vec<String> = stream
            .columns
            .keys()
            .map(|c| quote_pg(&c.name))
            .chain(FINAL_TABLE_COLUMN_NAMES.iter().map(|c| quote_pg(c)))
            .collect();
        let final_columns = final_columns.join(", ");

        let mut typed_columns: Vec<String> = stream
            .columns
            .iter()
            .map(|(column, t)| format!("{} AS {}", self.extract_column(column, t, safer), quote_pg(&column.name)))
            .collect();
        typed_columns.push(quote_pg(COLUMN_NAME_AB_RAW_ID));
        typed_columns.push(quote_pg(COLUMN_NAME_AB_EXTRACTED_AT));
        typed_columns.push(format!(
            "{} AS {}",
            self.build_meta_column(&stream.columns, safer),
            quote_pg(COLUMN_NAME_AB_META)
        ));

        let intermediate = format!(
            "intermediate_data AS (\n  SELECT\n    {}\n  FROM {}\n  WHERE {}\n)",
            typed_columns.join(",\n    "),
            self.raw_table(&stream.id),
            self.raw_table_condition(stream, min_raw_timestamp)
        );

        let select = match stream.sync_mode {
            SyncMode::AppendDedup if !stream.primary_key.is_empty() => format!(
                "WITH {},\nnumbered_rows AS (\n  SELECT *, {} AS row_number FROM intermediate_data\n)\nSELECT {} FROM numbered_rows WHERE row_number = 1",
                intermediate,
                self.row_number(stream),
                final_columns
            ),
            SyncMode::AppendDedup | SyncMode::Overwrite | SyncMode::Append => format!(
                "WITH {}\nSELECT {} FROM intermediate_data",
                intermediate, final_columns
            ),
        };

        format!(
            "INSERT INTO {} ({})\n{}",
            self.final_table(&stream.id, final_suffix),
            final_columns,
            select
        )
    }

    fn delete_duplicates_sql(&self, stream: &StreamConfig, final_suffix: &str) -> String {
        let table = self.final_table(&stream.id, final_suffix);
        let raw_id = quote_pg(COLUMN_NAME_AB_RAW_ID);
        format!(
            "DELETE FROM {table} WHERE {raw_id} IN (\n  SELECT {raw_id} FROM (\n    SELECT {raw_id}, {row_number} AS row_number FROM {table}\n  ) AS airbyte_ids\n  WHERE row_number <> 1\n)",
            table = table,
            raw_id = raw_id,
            row_number = self.row_number(stream)
        )
    }

    fn delete_cdc_deletes_sql(&self, stream: &StreamConfig, final_suffix: &str) -> String {
        if !self.has_cdc_deleted_at(stream) {
            return String::new();
        }
        format!(
            "DELETE FROM {} WHERE {} IS NOT NULL",
            self.final_table(&stream.id, final_suffix),
            quote_pg(&self.build_column_id(COLUMN_NAME_AB_CDC_DELETED_AT, None).name)
        )
    }

    fn checkpoint_raw_table_sql(&self, id: &StreamId, min_raw_timestamp: Option<DateTime<Utc>>) -> String {
        let mut sql = format!(
            "UPDATE {} SET {loaded_at} = CURRENT_TIMESTAMP WHERE {loaded_at} IS NULL",
            self.raw_table(id),
            loaded_at = quote_pg(COLUMN_NAME_AB_LOADED_AT)
        );
        if let Some(ts) = min_raw_timestamp {
            sql.push_str(" AND ");
            sql.push_str(&extracted_after(ts));
        }
        sql
    }
}

impl SqlGenerator for PostgresSqlGenerator {
    type Table = TableDefinition;

    fn build_stream_id(&self, namespace: &str, name: &str, raw_namespace: &str) -> StreamId {
        StreamId::new(
            shorten(sanitize(namespace), MAX_PG_IDENTIFIER_LENGTH),
            shorten(sanitize(name), MAX_FINAL_NAME_LENGTH),
            shorten(sanitize(raw_namespace), MAX_PG_IDENTIFIER_LENGTH),
            shorten(
                sanitize(&concatenate_raw_table_name(namespace, name)),
                MAX_PG_IDENTIFIER_LENGTH,
            ),
            namespace,
            name,
        )
    }

    fn build_column_id(&self, name: &str, suffix: Option<&str>) -> ColumnId {
        let suffix = suffix.map(sanitize).unwrap_or_default();
        let mut wire = sanitize(name);
        wire.truncate(MAX_PG_IDENTIFIER_LENGTH.saturating_sub(suffix.len()));
        wire.push_str(&suffix);
        ColumnId::new(wire.clone(), name, wire)
    }

    fn create_schema(&self, schema: &str) -> Sql {
        Sql::of(format!("CREATE SCHEMA IF NOT EXISTS {}", quote_pg(schema)))
    }

    fn create_table(&self, stream: &StreamConfig, suffix: &str, force: bool) -> Sql {
        if !force {
            return Sql::of(self.create_table_sql(stream, suffix));
        }
        Sql::transactionally([
            format!("DROP TABLE IF EXISTS {} CASCADE", self.final_table(&stream.id, suffix)),
            self.create_table_sql(stream, suffix),
        ])
    }

    fn existing_schema_matches_stream_config(
        &self,
        stream: &StreamConfig,
        existing: &TableDefinition,
    ) -> Result<bool> {
        if !existing.has_all_columns(&FINAL_TABLE_COLUMN_NAMES) {
            return Err(TypingDedupingError::table_not_migrated(
                format!(
                    "Cannot find metadata columns for stream {}. Please check the destination's final table {} was written by a V2 destination",
                    stream.id,
                    stream.id.final_table_id("", "")
                ),
                None,
            ));
        }

        let expected: IndexMap<&str, &str> = stream
            .columns
            .iter()
            .map(|(column, t)| (column.name.as_str(), self.to_dialect_type(t)))
            .collect();
        let actual: IndexMap<&str, &str> = existing
            .columns
            .values()
            .filter(|c| !FINAL_TABLE_COLUMN_NAMES.contains(&c.name.as_str()))
            .map(|c| (c.name.as_str(), c.type_name.as_str()))
            .collect();

        Ok(expected.len() == actual.len()
            && expected.iter().all(|(name, expected_type)| {
                actual
                    .get(name)
                    .is_some_and(|actual_type| actual_type.eq_ignore_ascii_case(expected_type))
            }))
    }

    fn update_table(
        &self,
        stream: &StreamConfig,
        final_suffix: &str,
        min_raw_timestamp: Option<DateTime<Utc>>,
        use_safer_casting: bool,
    ) -> Sql {
        let insert = self.insert_sql(stream, final_suffix, min_raw_timestamp, use_safer_casting);
        let checkpoint = self.checkpoint_raw_table_sql(&stream.id, min_raw_timestamp);

        // Without a primary key there is nothing to dedupe on.
        match stream.sync_mode {
            SyncMode::AppendDedup if !stream.primary_key.is_empty() => Sql::transactionally([
                insert,
                self.delete_duplicates_sql(stream, final_suffix),
                self.delete_cdc_deletes_sql(stream, final_suffix),
                checkpoint,
            ]),
            SyncMode::AppendDedup | SyncMode::Overwrite | SyncMode::Append => {
                Sql::transactionally([insert, checkpoint])
            }
        }
    }

    fn overwrite_final_table(&self, stream_id: &StreamId, final_suffix: &str) -> Sql {
        Sql::transactionally([
            format!("DROP TABLE IF EXISTS {} CASCADE", self.final_table(stream_id, "")),
            format!(
                "ALTER TABLE {} RENAME TO {}",
                self.final_table(stream_id, final_suffix),
                quote_pg(&stream_id.final_name)
            ),
        ])
    }

    fn clear_loaded_at(&self, stream_id: &StreamId) -> Sql {
        Sql::of(format!(
            "UPDATE {} SET {} = NULL",
            self.raw_table(stream_id),
            quote_pg(COLUMN_NAME_AB_LOADED_AT)
        ))
    }

    fn migrate_from_v1_to_v2(&self, stream_id: &StreamId, namespace: &str, table_name: &str) -> Sql {
        let raw_table = self.raw_table(stream_id);
        Sql::transactionally([
            format!("CREATE SCHEMA IF NOT EXISTS {}", quote_pg(&stream_id.raw_namespace)),
            format!("DROP TABLE IF EXISTS {}", raw_table),
            format!(
                "CREATE TABLE {} AS SELECT {} AS {}, {} AS {}, CAST(NULL AS {}) AS {}, {} AS {}, CAST(NULL AS {}) AS {} FROM {}",
                raw_table,
                quote_pg(LEGACY_RAW_TABLE_COLUMN_AB_ID),
                quote_pg(COLUMN_NAME_AB_RAW_ID),
                quote_pg(LEGACY_RAW_TABLE_COLUMN_EMITTED_AT),
                quote_pg(COLUMN_NAME_AB_EXTRACTED_AT),
                TIMESTAMPTZ,
                quote_pg(COLUMN_NAME_AB_LOADED_AT),
                quote_pg(COLUMN_NAME_DATA),
                quote_pg(COLUMN_NAME_DATA),
                JSONB,
                quote_pg(COLUMN_NAME_AB_META),
                qualify_pg(namespace, table_name)
            ),
        ])
    }
}

fn primitive_type(p: AirbyteProtocolType) -> &'static str {
    match p {
        AirbyteProtocolType::String => "character varying",
        AirbyteProtocolType::Number => "numeric",
        AirbyteProtocolType::Integer => "bigint",
        AirbyteProtocolType::Boolean => "boolean",
        AirbyteProtocolType::TimestampWithTimezone => TIMESTAMPTZ,
        AirbyteProtocolType::TimestampWithoutTimezone => "timestamp without time zone",
        AirbyteProtocolType::TimeWithTimezone => "time with time zone",
        AirbyteProtocolType::TimeWithoutTimezone => "time without time zone",
        AirbyteProtocolType::Date => "date",
        AirbyteProtocolType::Unknown => JSONB,
    }
}

/// Predicate under which casting `text` to `p` cannot fail.
fn safer_casting_guard(p: AirbyteProtocolType, json: &str, text: &str) -> Option<String> {
    let pattern = match p {
        AirbyteProtocolType::Boolean => {
            return Some(format!("jsonb_typeof({}) = 'boolean'", json));
        }
        AirbyteProtocolType::Integer => r"^-?[0-9]+$",
        AirbyteProtocolType::Number => r"^-?[0-9]+(\.[0-9]+)?([eE][-+]?[0-9]+)?$",
        AirbyteProtocolType::Date => r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$",
        AirbyteProtocolType::TimestampWithTimezone | AirbyteProtocolType::TimestampWithoutTimezone => {
            r"^[0-9]{4}-[0-9]{2}-[0-9]{2}[T ][0-9]{2}:[0-9]{2}"
        }
        AirbyteProtocolType::TimeWithTimezone | AirbyteProtocolType::TimeWithoutTimezone => {
            r"^[0-9]{2}:[0-9]{2}"
        }
        AirbyteProtocolType::String | AirbyteProtocolType::Unknown => return None,
    };
    Some(format!("({}) ~ {}", text, literal(pattern)))
}

fn json_guarded(json: &str, json_type: &str) -> String {
    format!(
        "CASE WHEN jsonb_typeof({}) = {} THEN {} ELSE NULL END",
        json,
        literal(json_type),
        json
    )
}

fn extracted_after(ts: DateTime<Utc>) -> String {
    format!(
        "{} > {}",
        quote_pg(COLUMN_NAME_AB_EXTRACTED_AT),
        literal(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    )
}

/// Single-quoted SQL string literal.
fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Lowercase, replace anything but ASCII letters, digits and `_` with `_`,
/// and prefix names starting with a digit. Callers cap the length.
fn sanitize(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}

/// Cut an over-long sanitized name down to `max` bytes, ending it with a
/// short hash of the full name so distinct long names stay distinct.
fn shorten(name: String, max: usize) -> String {
    if name.len() <= max {
        return name;
    }
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    format!("{}_{}", &name[..max - 5], &digest[..4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ColumnDefinition;
    use chrono::TimeZone;

    fn generator() -> PostgresSqlGenerator {
        PostgresSqlGenerator::new()
    }

    fn stream(mode: SyncMode, extra: &[(&str, AirbyteType)]) -> StreamConfig {
        let g = generator();
        let id_column = g.build_column_id("id", None);
        let updated_at = g.build_column_id("updated_at", None);

        let mut columns = IndexMap::new();
        columns.insert(id_column.clone(), AirbyteType::Primitive(AirbyteProtocolType::Integer));
        columns.insert(
            updated_at.clone(),
            AirbyteType::Primitive(AirbyteProtocolType::TimestampWithTimezone),
        );
        for (name, t) in extra {
            columns.insert(g.build_column_id(name, None), t.clone());
        }

        let (primary_key, cursor) = match mode {
            SyncMode::AppendDedup => (vec![id_column], Some(updated_at)),
            SyncMode::Append | SyncMode::Overwrite => (Vec::new(), None),
        };
        StreamConfig {
            id: g.build_stream_id("Public", "Users", "airbyte_internal"),
            sync_mode: mode,
            primary_key,
            cursor,
            columns,
        }
    }

    fn statements(sql: &Sql) -> Vec<String> {
        sql.statements().map(str::to_string).collect()
    }

    #[test]
    fn test_build_stream_id_sanitizes() {
        let id = generator().build_stream_id("My-Schema", "2024 Orders", "airbyte_internal");
        assert_eq!(id.final_namespace, "my_schema");
        assert_eq!(id.final_name, "_2024_orders");
        assert_eq!(id.raw_namespace, "airbyte_internal");
        assert_eq!(id.raw_name, "my_schema_raw__stream_2024_orders");
        assert_eq!(id.original_namespace, "My-Schema");
        assert_eq!(id.original_name, "2024 Orders");
    }

    #[test]
    fn test_build_column_id_truncates_and_suffixes() {
        let g = generator();
        let column = g.build_column_id("Email Address", Some("_1"));
        assert_eq!(column.name, "email_address_1");
        assert_eq!(column.original_name, "Email Address");

        let long = "x".repeat(100);
        assert_eq!(g.build_column_id(&long, None).name.len(), MAX_PG_IDENTIFIER_LENGTH);
    }

    #[test]
    fn test_suffix_survives_truncation_of_long_column() {
        let g = generator();
        let long = format!("{}x", "a".repeat(63));
        let plain = g.build_column_id(&long, None);
        let suffixed = g.build_column_id(&long, Some("_1"));

        assert_ne!(plain.name, suffixed.name);
        assert_eq!(suffixed.name.len(), MAX_PG_IDENTIFIER_LENGTH);
        assert!(suffixed.name.ends_with("_1"));
    }

    #[test]
    fn test_suffixed_final_names_fit_identifier_limit() {
        let g = generator();
        for name in ["users".to_string(), "a".repeat(49), "a".repeat(63), "b".repeat(200)] {
            let id = g.build_stream_id("public", &name, "airbyte_internal");
            for suffix in ["", TMP_TABLE_SUFFIX, SOFT_RESET_SUFFIX] {
                let table = id.final_name_with_suffix(suffix);
                assert!(table.len() <= MAX_PG_IDENTIFIER_LENGTH, "{table} is too long");
            }
            assert!(id.raw_name.len() <= MAX_PG_IDENTIFIER_LENGTH);
        }
        assert_eq!(g.build_stream_id("public", "users", "airbyte_internal").final_name, "users");
    }

    #[test]
    fn test_long_table_names_stay_distinct() {
        let g = generator();
        let prefix = "a".repeat(70);
        let first = g.build_stream_id("public", &format!("{prefix}x"), "airbyte_internal");
        let second = g.build_stream_id("public", &format!("{prefix}y"), "airbyte_internal");

        assert_ne!(first.final_name, second.final_name);
        assert_ne!(first.raw_name, second.raw_name);
        assert_eq!(first.final_name.len(), MAX_FINAL_NAME_LENGTH);
    }

    #[test]
    fn test_type_mapping_is_exhaustive_over_shapes() {
        let g = generator();
        assert_eq!(g.to_dialect_type(&AirbyteType::Primitive(AirbyteProtocolType::String)), "character varying");
        assert_eq!(g.to_dialect_type(&AirbyteType::Struct(IndexMap::new())), "jsonb");
        assert_eq!(g.to_dialect_type(&AirbyteType::Array(Box::new(AirbyteType::UNKNOWN))), "jsonb");
        assert_eq!(g.to_dialect_type(&AirbyteType::UnsupportedOneOf(vec![])), "jsonb");
        assert_eq!(
            g.to_dialect_type(&AirbyteType::Union(vec![
                AirbyteType::Primitive(AirbyteProtocolType::Integer),
                AirbyteType::Primitive(AirbyteProtocolType::Number),
            ])),
            "numeric"
        );
    }

    #[test]
    fn test_create_table() {
        let sql = generator().create_table(&stream(SyncMode::Append, &[]), "", false);
        let statements = statements(&sql);
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("CREATE TABLE \"public\".\"users\" ("));
        assert!(statements[0].contains("\"_airbyte_raw_id\" varchar NOT NULL"));
        assert!(statements[0].contains("\"id\" bigint"));
        assert!(statements[0].contains("\"updated_at\" timestamp with time zone"));
    }

    #[test]
    fn test_force_create_table_drops_first_in_one_transaction() {
        let sql = generator().create_table(&stream(SyncMode::Append, &[]), "_airbyte_tmp", true);
        assert_eq!(sql.transactions.len(), 1);
        let statements = statements(&sql);
        assert_eq!(statements[0], "DROP TABLE IF EXISTS \"public\".\"users_airbyte_tmp\" CASCADE");
        assert!(statements[1].starts_with("CREATE TABLE \"public\".\"users_airbyte_tmp\""));
    }

    #[test]
    fn test_update_table_append() {
        let sql = generator().update_table(&stream(SyncMode::Append, &[]), "", None, false);
        let statements = statements(&sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("INSERT INTO \"public\".\"users\""));
        assert!(statements[0].contains("FROM \"airbyte_internal\".\"public_raw__stream_users\""));
        assert!(statements[0].contains("CAST((\"_airbyte_data\"->>'id') AS bigint) AS \"id\""));
        assert!(!statements[0].contains("row_number"));
        assert_eq!(
            statements[1],
            "UPDATE \"airbyte_internal\".\"public_raw__stream_users\" SET \"_airbyte_loaded_at\" = CURRENT_TIMESTAMP WHERE \"_airbyte_loaded_at\" IS NULL"
        );
    }

    #[test]
    fn test_update_table_dedup() {
        let sql = generator().update_table(&stream(SyncMode::AppendDedup, &[]), "", None, false);
        let statements = statements(&sql);
        assert_eq!(statements.len(), 3);
        assert!(statements[0].contains(
            "row_number() OVER (PARTITION BY \"id\" ORDER BY \"updated_at\" DESC NULLS LAST, \"_airbyte_extracted_at\" DESC)"
        ));
        assert!(statements[0].contains("WHERE row_number = 1"));
        assert!(statements[1].starts_with("DELETE FROM \"public\".\"users\" WHERE \"_airbyte_raw_id\" IN"));
    }

    #[test]
    fn test_update_table_dedup_without_key_appends() {
        let mut keyless = stream(SyncMode::AppendDedup, &[]);
        keyless.primary_key.clear();
        let sql = generator().update_table(&keyless, "", None, false);
        let statements = statements(&sql);

        assert_eq!(statements.len(), 2);
        assert!(!statements[0].contains("PARTITION BY"));
        assert!(!statements[0].contains("numbered_rows"));
        assert!(statements[1].starts_with("UPDATE \"airbyte_internal\"."));
    }

    #[test]
    fn test_update_table_dedup_with_cdc_deletes() {
        let cdc = [(
            COLUMN_NAME_AB_CDC_DELETED_AT,
            AirbyteType::Primitive(AirbyteProtocolType::TimestampWithTimezone),
        )];
        let sql = generator().update_table(&stream(SyncMode::AppendDedup, &cdc), "", None, false);
        let statements = statements(&sql);
        assert_eq!(statements.len(), 4);
        assert!(statements[0].contains("\"_airbyte_loaded_at\" IS NOT NULL AND jsonb_typeof"));
        assert_eq!(
            statements[2],
            "DELETE FROM \"public\".\"users\" WHERE \"_ab_cdc_deleted_at\" IS NOT NULL"
        );
    }

    #[test]
    fn test_update_table_scoped_by_timestamp() {
        let ts = Utc.with_ymd_and_hms(2023, 1, 1, 12, 34, 56).unwrap();
        let sql = generator().update_table(&stream(SyncMode::Append, &[]), "_airbyte_tmp", Some(ts), false);
        let statements = statements(&sql);
        assert!(statements[0].starts_with("INSERT INTO \"public\".\"users_airbyte_tmp\""));
        assert!(statements[0].contains("\"_airbyte_extracted_at\" > '2023-01-01T12:34:56Z'"));
        assert!(statements[1].ends_with("AND \"_airbyte_extracted_at\" > '2023-01-01T12:34:56Z'"));
    }

    #[test]
    fn test_safer_casting_guards_casts() {
        let g = generator();
        let plain = statements(&g.update_table(&stream(SyncMode::Append, &[]), "", None, false));
        let safer = statements(&g.update_table(&stream(SyncMode::Append, &[]), "", None, true));
        assert!(!plain[0].contains("~ '^-?[0-9]+$'"));
        assert!(safer[0].contains(
            "CASE WHEN (\"_airbyte_data\"->>'id') ~ '^-?[0-9]+$' THEN CAST((\"_airbyte_data\"->>'id') AS bigint) ELSE NULL END"
        ));
    }

    #[test]
    fn test_json_keys_are_escaped() {
        let g = generator();
        let quoted = [("it's", AirbyteType::Primitive(AirbyteProtocolType::String))];
        let sql = statements(&g.update_table(&stream(SyncMode::Append, &quoted), "", None, false));
        assert!(sql[0].contains("(\"_airbyte_data\"->>'it''s') AS \"it_s\""));
    }

    #[test]
    fn test_overwrite_final_table() {
        let id = stream(SyncMode::Overwrite, &[]).id;
        let sql = generator().overwrite_final_table(&id, "_airbyte_tmp");
        assert_eq!(
            statements(&sql),
            vec![
                "DROP TABLE IF EXISTS \"public\".\"users\" CASCADE",
                "ALTER TABLE \"public\".\"users_airbyte_tmp\" RENAME TO \"users\"",
            ]
        );
    }

    #[test]
    fn test_soft_reset_uses_soft_reset_table() {
        let g = generator();
        let s = stream(SyncMode::AppendDedup, &[]);
        let prepare = statements(&g.prepare_tables_for_soft_reset(&s));
        assert!(prepare[0].contains("\"users_ab_soft_reset\""));
        assert_eq!(
            prepare.last().map(String::as_str),
            Some("UPDATE \"airbyte_internal\".\"public_raw__stream_users\" SET \"_airbyte_loaded_at\" = NULL")
        );

        let reset = statements(&g.soft_reset(&s));
        assert!(reset[0].starts_with("INSERT INTO \"public\".\"users_ab_soft_reset\""));
        assert_eq!(
            reset.last().map(String::as_str),
            Some("ALTER TABLE \"public\".\"users_ab_soft_reset\" RENAME TO \"users\"")
        );
    }

    #[test]
    fn test_migrate_from_v1_to_v2() {
        let id = stream(SyncMode::Append, &[]).id;
        let sql = generator().migrate_from_v1_to_v2(&id, "public", "_airbyte_raw_users");
        let statements = statements(&sql);
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], "CREATE SCHEMA IF NOT EXISTS \"airbyte_internal\"");
        assert!(statements[2].contains("\"_airbyte_ab_id\" AS \"_airbyte_raw_id\""));
        assert!(statements[2].ends_with("FROM \"public\".\"_airbyte_raw_users\""));
    }

    fn existing(extra: &[(&str, &str)]) -> TableDefinition {
        let mut columns = vec![
            ColumnDefinition::new(COLUMN_NAME_AB_RAW_ID, "character varying", false),
            ColumnDefinition::new(COLUMN_NAME_AB_EXTRACTED_AT, TIMESTAMPTZ, false),
            ColumnDefinition::new(COLUMN_NAME_AB_META, JSONB, false),
        ];
        columns.extend(extra.iter().map(|(n, t)| ColumnDefinition::new(*n, *t, true)));
        TableDefinition::new(columns)
    }

    #[test]
    fn test_existing_schema_matches() {
        let g = generator();
        let s = stream(SyncMode::Append, &[]);

        let matching = existing(&[("id", "bigint"), ("updated_at", "TIMESTAMP WITH TIME ZONE")]);
        assert!(g.existing_schema_matches_stream_config(&s, &matching).unwrap());

        let wrong_type = existing(&[("id", "integer"), ("updated_at", TIMESTAMPTZ)]);
        assert!(!g.existing_schema_matches_stream_config(&s, &wrong_type).unwrap());

        let extra_column = existing(&[("id", "bigint"), ("updated_at", TIMESTAMPTZ), ("name", "text")]);
        assert!(!g.existing_schema_matches_stream_config(&s, &extra_column).unwrap());
    }

    #[test]
    fn test_v1_final_table_is_not_migrated() {
        let g = generator();
        let s = stream(SyncMode::Append, &[]);
        let v1 = TableDefinition::new([ColumnDefinition::new("id", "bigint", true)]);
        let err = g.existing_schema_matches_stream_config(&s, &v1).unwrap_err();
        assert!(matches!(err, TypingDedupingError::TableNotMigrated { .. }));
    }
}
