//! Import resolution
//!
//! Workflow documents can pull in fragments from the local repository or
//! from another repository on GitHub. Remote fragments are addressed by
//! `owner/repo/path[@ref][#Section]`; the symbolic ref is resolved to a
//! commit once per resolver and the fetched bytes are cached under that
//! immutable content version.

use crate::error::ErrorCode;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

pub mod cache;
pub mod reference;
pub mod remote;
pub mod resolver;

pub use cache::{CacheKey, ImportCache};
pub use reference::{ImportReference, RepoRef};
pub use remote::{FetchError, GitHubSource, OfflineSource, RemoteSource};
pub use resolver::{ImportBase, ImportResolver, ResolvedImport};

/// Immutable identifier of fetched content, used as the cache key
///
/// Remote content is versioned by commit id, local files by the SHA-256 of
/// their bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentVersion(String);

impl ContentVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// Content hash of a byte slice
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for diagnostics and headers
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ContentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identity of a document, independent of the version it resolved to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn importer_suffix(importer: &Option<String>) -> String {
    match importer {
        Some(importer) => format!(" (imported from {importer})"),
        None => String::new(),
    }
}

/// An import reference could not be turned into content
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("[E{code:04}] import `{reference}` not found{}", importer_suffix(.importer), code = ErrorCode::IMPORT_NOT_FOUND)]
    NotFound {
        reference: String,
        importer: Option<String>,
    },

    #[error("[E{code:04}] fetching import `{reference}` failed: {reason}{}", importer_suffix(.importer), code = ErrorCode::IMPORT_FETCH_FAILED)]
    FetchFailed {
        reference: String,
        reason: String,
        importer: Option<String>,
    },

    #[error("[E{code:04}] import cycle: {}", .chain.join(" -> "), code = ErrorCode::IMPORT_CYCLE)]
    Cycle { chain: Vec<String> },

    #[error("[E{code:04}] invalid import reference `{reference}`: {reason}{}", importer_suffix(.importer), code = ErrorCode::IMPORT_INVALID_REFERENCE)]
    InvalidReference {
        reference: String,
        reason: String,
        importer: Option<String>,
    },

    #[error("[E{code:04}] writing import cache entry {path} failed: {reason}", code = ErrorCode::IMPORT_CACHE_WRITE)]
    CacheWrite { path: String, reason: String },
}

impl ResolutionError {
    pub fn code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => ErrorCode::IMPORT_NOT_FOUND,
            Self::FetchFailed { .. } => ErrorCode::IMPORT_FETCH_FAILED,
            Self::Cycle { .. } => ErrorCode::IMPORT_CYCLE,
            Self::InvalidReference { .. } => ErrorCode::IMPORT_INVALID_REFERENCE,
            Self::CacheWrite { .. } => ErrorCode::IMPORT_CACHE_WRITE,
        }
    }

    /// Annotate the error with the document that contained the reference.
    /// An existing annotation is kept, so the innermost importer wins.
    pub fn imported_from(mut self, document: &DocumentId) -> Self {
        match &mut self {
            Self::NotFound { importer, .. }
            | Self::FetchFailed { importer, .. }
            | Self::InvalidReference { importer, .. } => {
                if importer.is_none() {
                    *importer = Some(document.to_string());
                }
            }
            Self::Cycle { .. } | Self::CacheWrite { .. } => {}
        }
        self
    }

    /// Transient failures may be retried by the caller
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::FetchFailed { .. })
    }
}
