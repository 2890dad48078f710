//! Import reference grammar

use super::ResolutionError;
use std::fmt;
use std::path::PathBuf;

const DEFAULT_REVISION: &str = "main";

/// A GitHub repository coordinate
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// `owner/repo`
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// A parsed import reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportReference {
    /// Path relative to the importing document
    Local {
        path: PathBuf,
        section: Option<String>,
    },
    /// File in another repository at a symbolic revision
    Remote {
        repo: RepoRef,
        path: String,
        revision: String,
        section: Option<String>,
    },
}

impl ImportReference {
    /// Parse `path[#Section]` or `owner/repo/path[@ref][#Section]`
    pub fn parse(raw: &str) -> Result<Self, ResolutionError> {
        let raw = raw.trim();
        let invalid = |reason: &str| ResolutionError::InvalidReference {
            reference: raw.to_string(),
            reason: reason.to_string(),
            importer: None,
        };

        if raw.is_empty() {
            return Err(invalid("reference is empty"));
        }

        let (target, section) = match raw.split_once('#') {
            Some((target, section)) => {
                let section = section.trim();
                if section.is_empty() {
                    return Err(invalid("section name after `#` is empty"));
                }
                (target, Some(section.to_string()))
            }
            None => (raw, None),
        };

        if !is_workflow_spec(target) {
            if target.is_empty() {
                return Err(invalid("path is empty"));
            }
            return Ok(Self::Local {
                path: PathBuf::from(target),
                section,
            });
        }

        let (location, revision) = match target.rsplit_once('@') {
            Some((location, revision)) if !revision.is_empty() => (location, revision.to_string()),
            Some(_) => return Err(invalid("revision after `@` is empty")),
            None => (target, DEFAULT_REVISION.to_string()),
        };

        let mut parts = location.splitn(3, '/');
        let owner = parts.next().unwrap_or_default();
        let repo = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();

        if owner.is_empty() || repo.is_empty() || path.is_empty() {
            return Err(invalid("expected owner/repo/path"));
        }
        if path.split('/').any(|segment| segment == ".." || segment.is_empty()) {
            return Err(invalid("remote path must not contain empty or `..` segments"));
        }

        Ok(Self::Remote {
            repo: RepoRef::new(owner, repo),
            path: path.to_string(),
            revision,
            section,
        })
    }

    pub fn section(&self) -> Option<&str> {
        match self {
            Self::Local { section, .. } | Self::Remote { section, .. } => section.as_deref(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

impl fmt::Display for ImportReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path, section } => {
                write!(f, "{}", path.display())?;
                if let Some(section) = section {
                    write!(f, "#{section}")?;
                }
                Ok(())
            }
            Self::Remote {
                repo,
                path,
                revision,
                section,
            } => {
                write!(f, "{repo}/{path}@{revision}")?;
                if let Some(section) = section {
                    write!(f, "#{section}")?;
                }
                Ok(())
            }
        }
    }
}

/// Whether a reference names a file in another repository
fn is_workflow_spec(target: &str) -> bool {
    if target.starts_with('.') || target.starts_with('/') || target.starts_with("shared/") {
        return false;
    }
    let location = target.rsplit_once('@').map_or(target, |(location, _)| location);
    location.split('/').count() >= 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_paths() {
        for raw in ["shared/tools.md", "./notes.md", "../common/x.md", "fragment.md"] {
            let reference = ImportReference::parse(raw).unwrap();
            assert!(!reference.is_remote(), "{raw} should be local");
        }
    }

    #[test]
    fn test_parse_remote_with_default_revision() {
        let reference = ImportReference::parse("acme/workflows/shared/mcp/search.md").unwrap();
        assert_eq!(
            reference,
            ImportReference::Remote {
                repo: RepoRef::new("acme", "workflows"),
                path: "shared/mcp/search.md".to_string(),
                revision: "main".to_string(),
                section: None,
            }
        );
    }

    #[test]
    fn test_parse_remote_with_revision_and_section() {
        let reference = ImportReference::parse("acme/workflows/agents/triage.md@v1.2#Rules").unwrap();
        match &reference {
            ImportReference::Remote {
                revision, section, ..
            } => {
                assert_eq!(revision, "v1.2");
                assert_eq!(section.as_deref(), Some("Rules"));
            }
            other => panic!("expected remote, got {other:?}"),
        }
        assert_eq!(reference.to_string(), "acme/workflows/agents/triage.md@v1.2#Rules");
    }

    #[test]
    fn test_parse_local_with_section() {
        let reference = ImportReference::parse("shared/guide.md#Style").unwrap();
        assert_eq!(reference.section(), Some("Style"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ImportReference::parse("").is_err());
        assert!(ImportReference::parse("acme/workflows/x.md@").is_err());
        assert!(ImportReference::parse("acme/workflows/../x.md").is_err());
        assert!(ImportReference::parse("shared/x.md#").is_err());
    }
}
