//! Reader configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Knobs shared by the text and binary readers. Missing fields take their default when loaded
/// from RON, so a settings file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Container chunks nested deeper than this fail the walk.
    pub max_chunk_depth: usize,
    /// Shortest printable run the content hinter keeps.
    pub min_hint_len: usize,
    /// Printable runs retained per chunk.
    pub max_hint_strings: usize,
    /// Keywords the content hinter looks for, case-insensitive.
    pub hint_keywords: Vec<String>,
    /// Keep the graph built up to a parse failure instead of discarding it.
    pub keep_partial: bool,
    /// `select -ne name` on a node the document never created adds an `"unknown"` record for it.
    pub create_selected_nodes: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_chunk_depth: 32,
            min_hint_len: 4,
            max_hint_strings: 8,
            hint_keywords: [
                "transform",
                "joint",
                "mesh",
                "camera",
                "light",
                "shader",
                "anim",
                "reference",
                "maya",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            keep_partial: true,
            create_selected_nodes: true,
        }
    }
}

impl ReaderOptions {
    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }

    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// Loads options from a RON file.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron(&content).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Failed to parse reader options: {}", e),
            )
        })
    }
}
