//! Configuration types for multipart encoding

use serde::{Deserialize, Serialize};

/// Prefix used for generated boundaries when none is configured
pub const DEFAULT_BOUNDARY_PREFIX: &str = "MultipartBoundary";

/// Fallbacks used when a file-like part carries no filename or content type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDefaults {
    /// File stem, `file` by default
    pub name: String,
    /// File extension without the dot, `bin` by default
    pub ext: String,
    /// Content type, `application/octet-stream` by default
    pub content_type: String,
}

impl Default for FileDefaults {
    fn default() -> Self {
        Self {
            name: "file".to_string(),
            ext: "bin".to_string(),
            content_type: "application/octet-stream".to_string(),
        }
    }
}

/// Encoder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Explicit boundary; generated from `boundary_prefix` when absent
    pub boundary: Option<String>,
    pub boundary_prefix: String,
    pub defaults: FileDefaults,
    /// Read size for file path sources
    pub file_chunk_size: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            boundary: None,
            boundary_prefix: DEFAULT_BOUNDARY_PREFIX.to_string(),
            defaults: FileDefaults::default(),
            file_chunk_size: 64 * 1024,
        }
    }
}

impl EncoderConfig {
    pub fn with_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    pub fn with_boundary_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.boundary_prefix = prefix.into();
        self
    }

    pub fn with_defaults(mut self, defaults: FileDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_file_chunk_size(mut self, size: usize) -> Self {
        self.file_chunk_size = size.max(1);
        self
    }
}
