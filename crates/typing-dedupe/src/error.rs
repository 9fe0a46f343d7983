//! Error types for the typing-and-deduping engine.

use thiserror::Error;

/// Main error type for table lifecycle operations.
#[derive(Error, Debug)]
pub enum TypingDedupingError {
    /// Configuration error (invalid YAML, missing fields, duplicate streams, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller passed something the engine does not know about (e.g. an unregistered stream)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation called out of lifecycle order
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Existing warehouse table predates the V2 layout and cannot be reconciled automatically
    #[error("Table not migrated: {message}")]
    TableNotMigrated {
        message: String,
        #[source]
        source: Option<Box<TypingDedupingError>>,
    },

    /// Existing table exists but its columns are not what the engine expects
    #[error("Unexpected schema: {0}")]
    UnexpectedSchema(String),

    /// A statement failed inside the destination
    #[error("Statement failed: {message}\n  SQL: {sql}")]
    Execution { sql: String, message: String },

    /// Failure attributed to a single stream
    #[error("Stream {stream} failed: {source}")]
    Stream {
        stream: String,
        #[source]
        source: Box<TypingDedupingError>,
    },

    /// Persisted destination state could not be read or written
    #[error("Destination state error: {0}")]
    State(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TypingDedupingError {
    /// Create an Execution error for a failed statement
    pub fn execution(sql: impl Into<String>, message: impl Into<String>) -> Self {
        TypingDedupingError::Execution {
            sql: sql.into(),
            message: message.into(),
        }
    }

    /// Create a TableNotMigrated error, optionally wrapping its cause
    pub fn table_not_migrated(
        message: impl Into<String>,
        source: Option<TypingDedupingError>,
    ) -> Self {
        TypingDedupingError::TableNotMigrated {
            message: message.into(),
            source: source.map(Box::new),
        }
    }

    /// Attribute an error to a stream
    pub fn stream(stream: impl Into<String>, source: TypingDedupingError) -> Self {
        TypingDedupingError::Stream {
            stream: stream.into(),
            source: Box::new(source),
        }
    }

    /// Strip any `Stream` wrappers and return the underlying error.
    pub fn root(&self) -> &TypingDedupingError {
        match self {
            TypingDedupingError::Stream { source, .. } => source.root(),
            other => other,
        }
    }

    /// Process exit code for this error. Stream failures report their cause's code.
    pub fn exit_code(&self) -> u8 {
        match self {
            TypingDedupingError::Config(_)
            | TypingDedupingError::Yaml(_)
            | TypingDedupingError::Json(_) => 1,
            TypingDedupingError::InvalidArgument(_) => 2,
            TypingDedupingError::IllegalState(_) => 3,
            TypingDedupingError::TableNotMigrated { .. }
            | TypingDedupingError::UnexpectedSchema(_) => 4,
            TypingDedupingError::Execution { .. } => 5,
            TypingDedupingError::State(_) => 6,
            TypingDedupingError::Io(_) => 7,
            TypingDedupingError::Stream { source, .. } => source.exit_code(),
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for typing-and-deduping operations.
pub type Result<T> = std::result::Result<T, TypingDedupingError>;
