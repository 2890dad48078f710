//! Testing utilities and fixtures
//!
//! Shared by unit tests and the integration tests under `tests/`.

use crate::imports::{ContentVersion, DocumentId};
use crate::parser::SourceDocument;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub mod mocks;

pub use mocks::{MemoryRemoteSource, RecordingBackend};

/// Build a document from raw text without resolving imports
///
/// # Panics
///
/// Panics when `raw` does not parse; meant for tests only.
pub fn source_document(name: &str, raw: &str) -> SourceDocument {
    let parsed = crate::parser::parse(raw, name).expect("test document should parse");
    SourceDocument {
        id: DocumentId::new(name),
        path: PathBuf::from(name),
        version: ContentVersion::of_bytes(raw.as_bytes()),
        config: parsed.config.clone(),
        body: parsed.body,
        imports: Vec::new(),
        engine: parsed.config.get("engine").cloned(),
    }
}

/// A temporary workspace holding workflow files
pub struct TestContext {
    pub temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a file relative to the workspace, creating parent directories
    pub fn write(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }
}
