//! Stream and column identifiers, plus identifier validation and quoting.
//!
//! Final and raw table names are derived exactly once, when the catalog is
//! parsed, and the resulting [`StreamId`] is reused verbatim for every piece of
//! generated SQL and every state lookup afterwards. Nothing downstream
//! re-derives a name from the original namespace/name pair.
//!
//! # Security
//!
//! SQL identifiers cannot be bound as statement parameters, so generators
//! build them into the SQL text. [`validate_identifier`] rejects the obvious
//! injection vectors (NUL bytes, absurd lengths) and [`quote_pg`] escapes
//! embedded quote characters.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TypingDedupingError};

/// Maximum identifier length (conservative limit across warehouses).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Suffix of the staging table an OVERWRITE sync writes into before commit.
pub const TMP_TABLE_SUFFIX: &str = "_airbyte_tmp";

/// Suffix of the staging table a soft reset rebuilds before swapping it in.
pub const SOFT_RESET_SUFFIX: &str = "_ab_soft_reset";

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes, and
/// identifiers exceeding the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TypingDedupingError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(TypingDedupingError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(TypingDedupingError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
pub fn quote_pg(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Qualify a PostgreSQL table name with its schema.
pub fn qualify_pg(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_pg(schema), quote_pg(table))
}

/// Build the raw table name for a stream.
///
/// The namespace is embedded in the name so that every raw table can share a
/// single raw namespace. The separator is made of more underscores than the
/// longest underscore run in either input, which keeps `("a_b", "c")` and
/// `("a", "b_c")` from colliding.
pub fn concatenate_raw_table_name(namespace: &str, name: &str) -> String {
    let mut longest_run = 0;
    let mut current_run = 0;
    for c in namespace.chars().chain(name.chars()) {
        if c == '_' {
            current_run += 1;
            longest_run = longest_run.max(current_run);
        } else {
            current_run = 0;
        }
    }

    let underscores = "_".repeat(longest_run + 2);
    format!("{}_raw{}stream_{}", namespace, underscores, name)
}

/// The key a stream is addressed by: its namespace and name as the source declared them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub namespace: String,
    pub name: String,
}

impl StreamDescriptor {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Warehouse identifiers for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId {
    pub final_namespace: String,
    pub final_name: String,
    pub raw_namespace: String,
    pub raw_name: String,
    pub original_namespace: String,
    pub original_name: String,
}

impl StreamId {
    pub fn new(
        final_namespace: impl Into<String>,
        final_name: impl Into<String>,
        raw_namespace: impl Into<String>,
        raw_name: impl Into<String>,
        original_namespace: impl Into<String>,
        original_name: impl Into<String>,
    ) -> Self {
        Self {
            final_namespace: final_namespace.into(),
            final_name: final_name.into(),
            raw_namespace: raw_namespace.into(),
            raw_name: raw_name.into(),
            original_namespace: original_namespace.into(),
            original_name: original_name.into(),
        }
    }

    /// Fully qualified final table name, with `quote` around each part.
    ///
    /// ```
    /// # use typing_dedupe::core::StreamId;
    /// let id = StreamId::new("public", "users", "airbyte_internal", "public_raw__stream_users", "public", "users");
    /// assert_eq!(id.final_table_id("\"", "_airbyte_tmp"), "\"public\".\"users_airbyte_tmp\"");
    /// ```
    pub fn final_table_id(&self, quote: &str, suffix: &str) -> String {
        format!(
            "{q}{}{q}.{q}{}{q}",
            self.final_namespace,
            self.final_name_with_suffix(suffix),
            q = quote
        )
    }

    /// Fully qualified raw table name, with `quote` around each part.
    pub fn raw_table_id(&self, quote: &str) -> String {
        format!(
            "{q}{}{q}.{q}{}{q}",
            self.raw_namespace,
            self.raw_name,
            q = quote
        )
    }

    /// Final table name with a staging suffix appended.
    pub fn final_name_with_suffix(&self, suffix: &str) -> String {
        format!("{}{}", self.final_name, suffix)
    }

    /// Catalog key for this stream.
    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor::new(&self.original_namespace, &self.original_name)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.original_namespace, self.original_name)
    }
}

/// A column as the source named it and as the warehouse will see it.
///
/// Two ids are equal when their wire `name`s are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnId {
    /// Warehouse-safe name used in generated SQL.
    pub name: String,
    /// Name as it appears in the record payload.
    pub original_name: String,
    /// Case-folded name used to detect collisions.
    pub canonical_name: String,
}

impl ColumnId {
    pub fn new(
        name: impl Into<String>,
        original_name: impl Into<String>,
        canonical_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            original_name: original_name.into(),
            canonical_name: canonical_name.into(),
        }
    }
}

impl PartialEq for ColumnId {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ColumnId {}

impl Hash for ColumnId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}
