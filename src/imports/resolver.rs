//! Turns import references into content, tracking the chain of documents
//! currently being resolved so cycles are reported instead of recursed.

use super::{
    CacheKey, ContentVersion, DocumentId, FetchError, ImportCache, ImportReference,
    RemoteSource, RepoRef, ResolutionError,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Where relative references inside a document are resolved from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportBase {
    /// Directory of a local document
    Local(PathBuf),
    /// Directory of a remote document, pinned to the version it came from
    Remote {
        repo: RepoRef,
        dir: String,
        version: ContentVersion,
    },
}

/// A reference turned into content
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedImport {
    pub id: DocumentId,
    /// Human-readable reference including the resolved version
    pub display: String,
    pub content: String,
    pub version: ContentVersion,
    /// Base for references nested inside this document
    pub base: ImportBase,
    pub section: Option<String>,
}

/// Resolves references for one compile invocation
pub struct ImportResolver<'a> {
    cache: &'a ImportCache,
    remote: &'a dyn RemoteSource,
    revisions: HashMap<(RepoRef, String), ContentVersion>,
    chain: Vec<DocumentId>,
}

impl<'a> ImportResolver<'a> {
    pub fn new(cache: &'a ImportCache, remote: &'a dyn RemoteSource) -> Self {
        Self {
            cache,
            remote,
            revisions: HashMap::new(),
            chain: Vec::new(),
        }
    }

    /// Push a document onto the resolution chain, failing if it is already on it
    pub fn enter(&mut self, id: &DocumentId) -> Result<(), ResolutionError> {
        if self.chain.contains(id) {
            let start = self.chain.iter().position(|entry| entry == id).unwrap_or(0);
            let mut chain: Vec<String> = self.chain[start..].iter().map(ToString::to_string).collect();
            chain.push(id.to_string());
            return Err(ResolutionError::Cycle { chain });
        }
        self.chain.push(id.clone());
        Ok(())
    }

    /// Pop the innermost document off the resolution chain
    pub fn leave(&mut self) {
        self.chain.pop();
    }

    /// Current chain, outermost first
    pub fn chain(&self) -> &[DocumentId] {
        &self.chain
    }

    /// Resolve a reference found in a document whose base is `base`
    pub fn resolve(
        &mut self,
        reference: &ImportReference,
        base: &ImportBase,
    ) -> Result<ResolvedImport, ResolutionError> {
        match (reference, base) {
            (ImportReference::Local { path, section }, ImportBase::Local(dir)) => {
                self.resolve_local(&dir.join(path), section.clone())
            }
            (ImportReference::Local { path, section }, ImportBase::Remote { repo, dir, version }) => {
                let joined = join_remote_path(dir, path).ok_or_else(|| {
                    ResolutionError::InvalidReference {
                        reference: reference.to_string(),
                        reason: "path escapes the repository root".to_string(),
                        importer: None,
                    }
                })?;
                self.resolve_remote_at(repo, &joined, version.clone(), section.clone(), &reference.to_string())
            }
            (
                ImportReference::Remote {
                    repo,
                    path,
                    revision,
                    section,
                },
                _,
            ) => {
                let version = self.resolve_revision(repo, revision, &reference.to_string())?;
                self.resolve_remote_at(repo, path, version, section.clone(), &reference.to_string())
            }
        }
    }

    /// Read a local document directly (used for the root of a compile)
    pub fn resolve_local(
        &mut self,
        path: &Path,
        section: Option<String>,
    ) -> Result<ResolvedImport, ResolutionError> {
        let path = normalize(path);
        let not_found = || ResolutionError::NotFound {
            reference: path.display().to_string(),
            importer: None,
        };
        if !path.is_file() {
            return Err(not_found());
        }

        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => not_found(),
            _ => ResolutionError::FetchFailed {
                reference: path.display().to_string(),
                reason: e.to_string(),
                importer: None,
            },
        })?;
        let version = ContentVersion::of_bytes(&bytes);
        let content = String::from_utf8(bytes).map_err(|_| ResolutionError::FetchFailed {
            reference: path.display().to_string(),
            reason: "content is not valid UTF-8".to_string(),
            importer: None,
        })?;

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(ResolvedImport {
            id: DocumentId::new(path.display().to_string()),
            display: path.display().to_string(),
            content,
            version,
            base: ImportBase::Local(dir),
            section,
        })
    }

    fn resolve_revision(
        &mut self,
        repo: &RepoRef,
        revision: &str,
        reference: &str,
    ) -> Result<ContentVersion, ResolutionError> {
        let memo_key = (repo.clone(), revision.to_string());
        if let Some(version) = self.revisions.get(&memo_key) {
            return Ok(version.clone());
        }

        let version = self
            .remote
            .resolve_revision(repo, revision)
            .map_err(|e| fetch_error(reference, e))?;
        debug!("{}@{} pinned to {}", repo, revision, version.short());
        self.revisions.insert(memo_key, version.clone());
        Ok(version)
    }

    fn resolve_remote_at(
        &mut self,
        repo: &RepoRef,
        path: &str,
        version: ContentVersion,
        section: Option<String>,
        reference: &str,
    ) -> Result<ResolvedImport, ResolutionError> {
        let key = CacheKey::new(repo.slug(), path, version.clone());

        let content = match self.cache.get(&key) {
            Some(content) => content,
            None => {
                let bytes = self
                    .remote
                    .fetch(repo, path, &version)
                    .map_err(|e| fetch_error(reference, e))?;
                let text = String::from_utf8(bytes).map_err(|_| ResolutionError::FetchFailed {
                    reference: reference.to_string(),
                    reason: "content is not valid UTF-8".to_string(),
                    importer: None,
                })?;
                self.cache.insert(key, &text)?
            }
        };

        let dir = path.rsplit_once('/').map(|(dir, _)| dir.to_string()).unwrap_or_default();
        Ok(ResolvedImport {
            id: DocumentId::new(format!("{repo}/{path}")),
            display: format!("{repo}/{path}@{}", version),
            content: content.to_string(),
            version: version.clone(),
            base: ImportBase::Remote {
                repo: repo.clone(),
                dir,
                version,
            },
            section,
        })
    }
}

fn fetch_error(reference: &str, err: FetchError) -> ResolutionError {
    match err {
        FetchError::NotFound(_) => ResolutionError::NotFound {
            reference: reference.to_string(),
            importer: None,
        },
        FetchError::Failed(reason) => ResolutionError::FetchFailed {
            reference: reference.to_string(),
            reason,
            importer: None,
        },
    }
}

/// Lexically normalize a path without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Join a relative path onto a remote directory, refusing to climb above the root
fn join_remote_path(dir: &str, relative: &Path) -> Option<String> {
    let mut segments: Vec<String> = dir
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();
    for component in relative.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                segments.pop()?;
            }
            Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryRemoteSource;
    use tempfile::TempDir;

    const SHA_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn remote() -> MemoryRemoteSource {
        let source = MemoryRemoteSource::new();
        source.add_revision("acme/workflows", "main", SHA_A);
        source.add_revision("acme/workflows", "v1", SHA_A);
        source.add_file("acme/workflows", SHA_A, "shared/search.md", "# Search\n");
        source.add_file("acme/workflows", SHA_A, "shared/mcp/tools.md", "tools\n");
        source
    }

    #[test]
    fn test_local_resolution_hashes_content() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("frag.md"), "hello").unwrap();

        let cache = ImportCache::in_memory();
        let source = remote();
        let mut resolver = ImportResolver::new(&cache, &source);
        let base = ImportBase::Local(temp.path().to_path_buf());
        let resolved = resolver
            .resolve(&ImportReference::parse("frag.md").unwrap(), &base)
            .unwrap();

        assert_eq!(resolved.content, "hello");
        assert_eq!(resolved.version, ContentVersion::of_bytes(b"hello"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_local_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let cache = ImportCache::in_memory();
        let source = remote();
        let mut resolver = ImportResolver::new(&cache, &source);
        let err = resolver
            .resolve(
                &ImportReference::parse("shared/missing.md").unwrap(),
                &ImportBase::Local(temp.path().to_path_buf()),
            )
            .unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound { .. }));
    }

    #[test]
    fn test_symbolic_refs_to_same_commit_share_entry() {
        let cache = ImportCache::in_memory();
        let source = remote();
        let mut resolver = ImportResolver::new(&cache, &source);
        let base = ImportBase::Local(PathBuf::from("."));

        let a = resolver
            .resolve(&ImportReference::parse("acme/workflows/shared/search.md@main").unwrap(), &base)
            .unwrap();
        let b = resolver
            .resolve(&ImportReference::parse("acme/workflows/shared/search.md@v1").unwrap(), &base)
            .unwrap();

        assert_eq!(a.version, b.version);
        assert_eq!(cache.len(), 1);
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn test_revision_resolved_once_per_resolver() {
        let cache = ImportCache::in_memory();
        let source = remote();
        let mut resolver = ImportResolver::new(&cache, &source);
        let base = ImportBase::Local(PathBuf::from("."));
        let reference = ImportReference::parse("acme/workflows/shared/search.md").unwrap();

        resolver.resolve(&reference, &base).unwrap();
        resolver.resolve(&reference, &base).unwrap();

        assert_eq!(source.revision_lookups(), 1);
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn test_nested_relative_reference_stays_in_remote_repo() {
        let cache = ImportCache::in_memory();
        let source = remote();
        let mut resolver = ImportResolver::new(&cache, &source);

        let parent = resolver
            .resolve(
                &ImportReference::parse("acme/workflows/shared/search.md").unwrap(),
                &ImportBase::Local(PathBuf::from(".")),
            )
            .unwrap();
        let nested = resolver
            .resolve(&ImportReference::parse("./mcp/tools.md").unwrap(), &parent.base)
            .unwrap();

        assert_eq!(nested.id.as_str(), "acme/workflows/shared/mcp/tools.md");
        assert_eq!(nested.version.as_str(), SHA_A);
    }

    #[test]
    fn test_remote_not_found_maps_to_not_found() {
        let cache = ImportCache::in_memory();
        let source = remote();
        let mut resolver = ImportResolver::new(&cache, &source);
        let err = resolver
            .resolve(
                &ImportReference::parse("acme/workflows/missing.md").unwrap(),
                &ImportBase::Local(PathBuf::from(".")),
            )
            .unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound { .. }));
    }

    #[test]
    fn test_enter_detects_cycle() {
        let cache = ImportCache::in_memory();
        let source = remote();
        let mut resolver = ImportResolver::new(&cache, &source);

        resolver.enter(&DocumentId::new("a.md")).unwrap();
        resolver.enter(&DocumentId::new("b.md")).unwrap();
        let err = resolver.enter(&DocumentId::new("a.md")).unwrap_err();

        assert_eq!(
            err,
            ResolutionError::Cycle {
                chain: vec!["a.md".into(), "b.md".into(), "a.md".into()]
            }
        );

        resolver.leave();
        assert_eq!(resolver.chain().len(), 1);
    }

    #[test]
    fn test_join_remote_path() {
        assert_eq!(join_remote_path("shared", Path::new("../x.md")).as_deref(), Some("x.md"));
        assert_eq!(join_remote_path("", Path::new("../x.md")), None);
        assert_eq!(
            join_remote_path("a/b", Path::new("./c/d.md")).as_deref(),
            Some("a/b/c/d.md")
        );
    }
}
