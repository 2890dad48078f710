//! In-memory remote document source

use crate::imports::{ContentVersion, FetchError, RemoteSource, RepoRef};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Remote source backed by maps, counting every call it serves
#[derive(Debug, Default)]
pub struct MemoryRemoteSource {
    revisions: Mutex<HashMap<(String, String), String>>,
    files: Mutex<HashMap<(String, String, String), String>>,
    fetches: AtomicUsize,
    lookups: AtomicUsize,
}

impl MemoryRemoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `revision` of `slug` (`owner/repo`) at a commit
    pub fn add_revision(&self, slug: &str, revision: &str, sha: &str) {
        self.revisions
            .lock()
            .unwrap()
            .insert((slug.to_string(), revision.to_string()), sha.to_string());
    }

    pub fn add_file(&self, slug: &str, sha: &str, path: &str, content: &str) {
        self.files.lock().unwrap().insert(
            (slug.to_string(), sha.to_string(), path.to_string()),
            content.to_string(),
        );
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn revision_lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl RemoteSource for MemoryRemoteSource {
    fn resolve_revision(&self, repo: &RepoRef, revision: &str) -> Result<ContentVersion, FetchError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.revisions
            .lock()
            .unwrap()
            .get(&(repo.slug(), revision.to_string()))
            .map(|sha| ContentVersion::new(sha.clone()))
            .ok_or_else(|| FetchError::NotFound(format!("{repo}@{revision}")))
    }

    fn fetch(&self, repo: &RepoRef, path: &str, version: &ContentVersion) -> Result<Vec<u8>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .get(&(repo.slug(), version.to_string(), path.to_string()))
            .map(|content| content.as_bytes().to_vec())
            .ok_or_else(|| FetchError::NotFound(format!("{repo}/{path}@{version}")))
    }
}
