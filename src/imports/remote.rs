//! Access to documents hosted in other repositories

use super::{ContentVersion, RepoRef};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Failed(String),
}

/// Backend that turns `(repo, revision, path)` into bytes
pub trait RemoteSource: Send + Sync {
    /// Resolve a symbolic revision (branch, tag, sha) to an immutable version
    fn resolve_revision(&self, repo: &RepoRef, revision: &str) -> Result<ContentVersion, FetchError>;

    /// Fetch a file at an already-resolved version
    fn fetch(&self, repo: &RepoRef, path: &str, version: &ContentVersion) -> Result<Vec<u8>, FetchError>;
}

/// Source that refuses every remote reference
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineSource;

impl RemoteSource for OfflineSource {
    fn resolve_revision(&self, repo: &RepoRef, revision: &str) -> Result<ContentVersion, FetchError> {
        Err(FetchError::Failed(format!(
            "remote imports are disabled (needed {repo}@{revision})"
        )))
    }

    fn fetch(&self, repo: &RepoRef, path: &str, _version: &ContentVersion) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Failed(format!(
            "remote imports are disabled (needed {repo}/{path})"
        )))
    }
}

/// GitHub REST API backed source
pub struct GitHubSource {
    client: Client,
    api_url: Url,
    token: Option<String>,
}

impl GitHubSource {
    pub fn new(api_url: &str, token: Option<String>) -> Result<Self, FetchError> {
        let api_url = Url::parse(api_url)
            .map_err(|e| FetchError::Failed(format!("invalid API url {api_url}: {e}")))?;
        let client = Client::builder()
            .build()
            .map_err(|e| FetchError::Failed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url,
            token,
        })
    }

    /// Build a source using `GITHUB_TOKEN` or `GH_TOKEN` from the environment
    pub fn from_env(api_url: &str) -> Result<Self, FetchError> {
        let token = std::env::var("GITHUB_TOKEN")
            .or_else(|_| std::env::var("GH_TOKEN"))
            .ok()
            .filter(|token| !token.is_empty());
        Self::new(api_url, token)
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, FetchError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Failed(format!("API url {} cannot be a base", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: Url, accept: &str) -> Result<reqwest::blocking::Response, FetchError> {
        debug!("GET {}", url);
        let mut request = self
            .client
            .get(url.clone())
            .header(ACCEPT, accept)
            .header(USER_AGENT, "agentic-workflows");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|e| FetchError::Failed(format!("request to {url} failed: {e}")))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(FetchError::NotFound(url.to_string())),
            status => Err(FetchError::Failed(format!("{url} returned {status}"))),
        }
    }
}

impl RemoteSource for GitHubSource {
    fn resolve_revision(&self, repo: &RepoRef, revision: &str) -> Result<ContentVersion, FetchError> {
        if is_commit_sha(revision) {
            return Ok(ContentVersion::new(revision.to_ascii_lowercase()));
        }

        let url = self.endpoint(["repos", repo.owner.as_str(), repo.repo.as_str(), "commits", revision])?;
        let sha = self
            .get(url, "application/vnd.github.sha")?
            .text()
            .map_err(|e| FetchError::Failed(format!("reading commit sha failed: {e}")))?;
        let sha = sha.trim();

        if !is_commit_sha(sha) {
            return Err(FetchError::Failed(format!(
                "unexpected commit id `{sha}` for {repo}@{revision}"
            )));
        }
        debug!("resolved {}@{} to {}", repo, revision, sha);
        Ok(ContentVersion::new(sha))
    }

    fn fetch(&self, repo: &RepoRef, path: &str, version: &ContentVersion) -> Result<Vec<u8>, FetchError> {
        let mut segments = vec!["repos", repo.owner.as_str(), repo.repo.as_str(), "contents"];
        segments.extend(path.split('/'));
        let mut url = self.endpoint(segments)?;
        url.query_pairs_mut().append_pair("ref", version.as_str());

        let bytes = self
            .get(url, "application/vnd.github.raw")?
            .bytes()
            .map_err(|e| FetchError::Failed(format!("reading {repo}/{path} failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// Full 40-character hexadecimal commit id
pub fn is_commit_sha(revision: &str) -> bool {
    revision.len() == 40 && revision.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_commit_sha() {
        assert!(is_commit_sha("0123456789abcdef0123456789abcdef01234567"));
        assert!(!is_commit_sha("main"));
        assert!(!is_commit_sha("0123456789abcdef"));
    }

    #[test]
    fn test_endpoint_appends_segments() {
        let source = GitHubSource::new("https://api.github.com", None).unwrap();
        let url = source
            .endpoint(["repos", "acme", "workflows", "contents", "shared", "x.md"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/acme/workflows/contents/shared/x.md"
        );
    }

    #[test]
    fn test_full_sha_skips_network() {
        let source = GitHubSource::new("http://127.0.0.1:9", None).unwrap();
        let sha = "ABCDEF0123456789abcdef0123456789abcdef01";
        let version = source
            .resolve_revision(&RepoRef::new("acme", "workflows"), sha)
            .unwrap();
        assert_eq!(version.as_str(), sha.to_ascii_lowercase());
    }

    #[test]
    fn test_offline_source_refuses() {
        let err = OfflineSource
            .resolve_revision(&RepoRef::new("acme", "workflows"), "main")
            .unwrap_err();
        assert!(matches!(err, FetchError::Failed(_)));
    }
}
