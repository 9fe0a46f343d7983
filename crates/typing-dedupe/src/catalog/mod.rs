//! Configured catalog input and its parsing into a [`ParsedCatalog`].
//!
//! [`ParsedCatalog`]: crate::core::ParsedCatalog

mod parser;
mod types;

pub use parser::CatalogParser;
pub use types::*;

use std::path::Path;

use crate::error::Result;

impl ConfiguredCatalog {
    /// Load a configured catalog from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse a configured catalog from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
