//! Content-addressed cache of remote imports
//!
//! Entries are keyed by `(origin, path, content version)` and are
//! write-once. Two writers racing on the same key store identical bytes, so
//! whichever lands first is kept and the other is dropped.

use super::{ContentVersion, ResolutionError};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, trace};

/// Cache key of one fetched document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// `owner/repo` of the source repository
    pub origin: String,
    pub path: String,
    pub version: ContentVersion,
}

impl CacheKey {
    pub fn new(origin: impl Into<String>, path: impl Into<String>, version: ContentVersion) -> Self {
        Self {
            origin: origin.into(),
            path: path.into(),
            version,
        }
    }
}

/// Shared import cache, safe to use from concurrent compiles
#[derive(Debug, Default)]
pub struct ImportCache {
    root: Option<PathBuf>,
    entries: RwLock<HashMap<CacheKey, Arc<str>>>,
}

impl ImportCache {
    /// Cache that lives only as long as this value
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Cache backed by a directory; entries survive across processes
    pub fn on_disk(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Look up an entry, falling back to the on-disk copy
    pub fn get(&self, key: &CacheKey) -> Option<Arc<str>> {
        if let Some(content) = self.read_entries().get(key) {
            trace!("import cache hit (memory): {}/{}", key.origin, key.path);
            return Some(Arc::clone(content));
        }

        let path = self.entry_path(key)?;
        let content = fs::read_to_string(&path).ok()?;
        debug!("import cache hit (disk): {}", path.display());

        let content: Arc<str> = Arc::from(content);
        let mut entries = self.write_entries();
        let stored = entries.entry(key.clone()).or_insert(content);
        Some(Arc::clone(stored))
    }

    /// Store an entry unless one already exists for the key
    pub fn insert(&self, key: CacheKey, content: &str) -> Result<Arc<str>, ResolutionError> {
        if let Some(path) = self.entry_path(&key) {
            persist_once(&path, content)?;
        }

        let mut entries = self.write_entries();
        let stored = entries.entry(key).or_insert_with(|| Arc::from(content));
        Ok(Arc::clone(stored))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.read_entries().contains_key(key)
            || self.entry_path(key).is_some_and(|path| path.is_file())
    }

    /// Number of entries loaded in this process
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry_path(&self, key: &CacheKey) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        let mut path = root.join(&key.origin).join(key.version.as_str());
        for segment in key.path.split('/') {
            path.push(segment);
        }
        Some(path)
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<CacheKey, Arc<str>>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<CacheKey, Arc<str>>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Write `content` to `path` through a temp file and an atomic rename.
/// An existing file is left untouched.
fn persist_once(path: &Path, content: &str) -> Result<(), ResolutionError> {
    if path.is_file() {
        return Ok(());
    }

    let write_error = |reason: String| ResolutionError::CacheWrite {
        path: path.display().to_string(),
        reason,
    };

    let dir = path
        .parent()
        .ok_or_else(|| write_error("entry has no parent directory".to_string()))?;
    fs::create_dir_all(dir).map_err(|e| write_error(e.to_string()))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| write_error(e.to_string()))?;
    temp.write_all(content.as_bytes())
        .map_err(|e| write_error(e.to_string()))?;

    match temp.persist_noclobber(path) {
        Ok(_) => {
            debug!("cached import at {}", path.display());
            Ok(())
        }
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(write_error(e.error.to_string())),
    }
}
