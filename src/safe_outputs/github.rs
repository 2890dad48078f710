//! GitHub effect backend
//!
//! REST for issues, comments, labels and pull requests, GraphQL for
//! discussions, and the git CLI to publish pull-request branches.

use super::backend::{AppliedEffect, BackendError, EffectBackend, Operation};
use super::request::ReviewSide;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, LINK, USER_AGENT};
use reqwest::Method;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};
use url::Url;

const API_VERSION_HEADER: &str = "X-GitHub-Api-Version";
const API_VERSION: &str = "2022-11-28";

pub struct GitHubBackend {
    client: Client,
    api_url: Url,
    owner: String,
    repo: String,
    token: String,
    /// Working tree used for pull-request branches
    workdir: std::path::PathBuf,
}

impl GitHubBackend {
    pub fn new(api_url: &str, repository: &str, token: impl Into<String>) -> Result<Self, BackendError> {
        let api_url = Url::parse(api_url)
            .map_err(|e| BackendError::NotConfigured(format!("invalid API url {api_url}: {e}")))?;
        let (owner, repo) = repository
            .split_once('/')
            .filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty())
            .ok_or_else(|| BackendError::NotConfigured(format!("invalid repository `{repository}`")))?;
        let client = Client::builder().build().map_err(|e| BackendError::Request {
            operation: "build HTTP client".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            client,
            api_url,
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: token.into(),
            workdir: std::path::PathBuf::from("."),
        })
    }

    /// Configure from `GITHUB_API_URL`, `GITHUB_REPOSITORY` and `GITHUB_TOKEN`
    pub fn from_env(default_api_url: &str) -> Result<Self, BackendError> {
        let api_url = std::env::var("GITHUB_API_URL").unwrap_or_else(|_| default_api_url.to_string());
        let repository = std::env::var("GITHUB_REPOSITORY")
            .map_err(|_| BackendError::NotConfigured("GITHUB_REPOSITORY is not set".to_string()))?;
        let token = std::env::var("GITHUB_TOKEN")
            .or_else(|_| std::env::var("GH_TOKEN"))
            .ok()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| BackendError::NotConfigured("GITHUB_TOKEN is not set".to_string()))?;
        let mut backend = Self::new(&api_url, &repository, token)?;
        if let Ok(workspace) = std::env::var("GITHUB_WORKSPACE") {
            backend.workdir = workspace.into();
        }
        Ok(backend)
    }

    fn endpoint(&self, path: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::NotConfigured(format!("API url {} cannot be a base", self.api_url)))?
            .pop_if_empty()
            .extend(path);
        Ok(url)
    }

    fn repo_endpoint(&self, path: &[&str]) -> Result<Url, BackendError> {
        let mut segments = vec!["repos", self.owner.as_str(), self.repo.as_str()];
        segments.extend_from_slice(path);
        self.endpoint(&segments)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "agentic-workflows")
            .header(API_VERSION_HEADER, API_VERSION)
            .bearer_auth(&self.token)
    }

    fn send(&self, operation: &str, request: RequestBuilder) -> Result<Value, BackendError> {
        self.send_page(operation, request).map(|(value, _)| value)
    }

    /// Send a request and return the body with the `rel="next"` page, if any
    fn send_page(&self, operation: &str, request: RequestBuilder) -> Result<(Value, Option<Url>), BackendError> {
        let response = request.send().map_err(|e| BackendError::Request {
            operation: operation.to_string(),
            message: e.to_string(),
        })?;
        let status = response.status();
        let next = response
            .headers()
            .get(LINK)
            .and_then(|link| link.to_str().ok())
            .and_then(next_page)
            .filter(|next| next.origin() == self.api_url.origin());
        let body = response.text().unwrap_or_default();
        if !status.is_success() {
            return Err(BackendError::Api {
                operation: operation.to_string(),
                status: status.as_u16(),
                message: body,
            });
        }
        if body.trim().is_empty() {
            return Ok((Value::Null, next));
        }
        let value = serde_json::from_str(&body).map_err(|e| BackendError::Request {
            operation: operation.to_string(),
            message: format!("invalid response: {e}"),
        })?;
        Ok((value, next))
    }

    fn rest(&self, operation: &str, method: Method, path: &[&str], body: Option<Value>) -> Result<Value, BackendError> {
        let url = self.repo_endpoint(path)?;
        debug!("{} {}", method, url);
        let mut request = self.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.send(operation, request)
    }

    fn graphql(&self, operation: &str, query: &str, variables: Value) -> Result<Value, BackendError> {
        let url = self.endpoint(&["graphql"])?;
        let response = self.send(
            operation,
            self.request(Method::POST, url)
                .json(&json!({ "query": query, "variables": variables })),
        )?;
        if let Some(errors) = response.get("errors").filter(|errors| !errors.is_null()) {
            return Err(BackendError::Request {
                operation: operation.to_string(),
                message: errors.to_string(),
            });
        }
        Ok(response.get("data").cloned().unwrap_or(Value::Null))
    }

    fn created(kind: crate::model::EffectKind, summary: String, value: &Value) -> AppliedEffect {
        let mut applied = AppliedEffect::new(kind, summary);
        if let Some(number) = value.get("number").or_else(|| value.get("id")).and_then(Value::as_u64) {
            applied = applied.with_number(number);
        }
        if let Some(url) = value.get("html_url").or_else(|| value.get("url")).and_then(Value::as_str) {
            applied = applied.with_url(url);
        }
        applied
    }

    fn search_marker(&self, marker: &str, kind: &str) -> Result<Option<Value>, BackendError> {
        let mut url = self.endpoint(&["search", "issues"])?;
        url.query_pairs_mut().append_pair(
            "q",
            &format!("repo:{}/{} is:{kind} in:body \"{marker}\"", self.owner, self.repo),
        );
        let result = self.send("search for earlier effects", self.request(Method::GET, url))?;
        Ok(result
            .get("items")
            .and_then(Value::as_array)
            .and_then(|items| items.first().cloned()))
    }

    /// Walk every page of a comment thread looking for `marker`
    fn comment_with_marker(&self, path: &[&str], marker: &str) -> Result<Option<Value>, BackendError> {
        let mut url = self.repo_endpoint(path)?;
        url.query_pairs_mut().append_pair("per_page", "100");
        let mut page = Some(url);
        while let Some(url) = page.take() {
            let (comments, next) = self.send_page("list comments", self.request(Method::GET, url))?;
            let found = comments.as_array().and_then(|comments| {
                comments
                    .iter()
                    .find(|comment| {
                        comment
                            .get("body")
                            .and_then(Value::as_str)
                            .is_some_and(|body| body.contains(marker))
                    })
                    .cloned()
            });
            if found.is_some() {
                return Ok(found);
            }
            page = next;
        }
        Ok(None)
    }

    fn discussion_marker(&self, marker: &str) -> Result<Option<Value>, BackendError> {
        let query = "query($q: String!) { search(query: $q, type: DISCUSSION, first: 1) { nodes { ... on Discussion { number url } } } }";
        let data = self.graphql(
            "search discussions",
            query,
            json!({ "q": format!("repo:{}/{} \"{marker}\"", self.owner, self.repo) }),
        )?;
        Ok(data
            .pointer("/search/nodes/0")
            .filter(|node| !node.is_null())
            .cloned())
    }

    fn create_discussion(&self, title: &str, body: &str, category: Option<&str>) -> Result<Value, BackendError> {
        let query = "query($owner: String!, $repo: String!) { repository(owner: $owner, name: $repo) { id discussionCategories(first: 50) { nodes { id name slug } } } }";
        let data = self.graphql(
            "look up discussion categories",
            query,
            json!({ "owner": self.owner, "repo": self.repo }),
        )?;
        let repository_id = data
            .pointer("/repository/id")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Request {
                operation: "create discussion".to_string(),
                message: "repository id missing from response".to_string(),
            })?;
        let categories = data
            .pointer("/repository/discussionCategories/nodes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let matches = |node: &Value, wanted: &str| {
            ["name", "slug"].iter().any(|field| {
                node.get(*field)
                    .and_then(Value::as_str)
                    .is_some_and(|value| value.eq_ignore_ascii_case(wanted))
            })
        };
        let category_node = match category {
            Some(wanted) => categories.iter().find(|node| matches(node, wanted)),
            None => categories.first(),
        }
        .ok_or_else(|| BackendError::Request {
            operation: "create discussion".to_string(),
            message: format!("discussion category `{}` not found", category.unwrap_or("<any>")),
        })?;
        let category_id = category_node.get("id").and_then(Value::as_str).unwrap_or_default();

        let mutation = "mutation($repo: ID!, $category: ID!, $title: String!, $body: String!) { createDiscussion(input: {repositoryId: $repo, categoryId: $category, title: $title, body: $body}) { discussion { number url } } }";
        let data = self.graphql(
            "create discussion",
            mutation,
            json!({ "repo": repository_id, "category": category_id, "title": title, "body": body }),
        )?;
        Ok(data
            .pointer("/createDiscussion/discussion")
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn git(&self, args: &[&str]) -> Result<String, BackendError> {
        debug!("git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .map_err(|e| BackendError::Git {
                command: args.join(" "),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(BackendError::Git {
                command: args.join(" "),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn push_branch(&self, branch: &str, title: &str, patch: &Path) -> Result<(), BackendError> {
        let patch = patch.to_string_lossy();
        self.git(&["checkout", "-b", branch])?;
        self.git(&["apply", "--index", patch.as_ref()])?;
        self.git(&[
            "-c",
            "user.name=github-actions[bot]",
            "-c",
            "user.email=41898282+github-actions[bot]@users.noreply.github.com",
            "commit",
            "-m",
            title,
        ])?;
        self.git(&["push", "origin", branch])?;
        Ok(())
    }

    fn base_branch(&self) -> Result<String, BackendError> {
        if let Ok(base) = std::env::var("GITHUB_BASE_REF") {
            if !base.is_empty() {
                return Ok(base);
            }
        }
        let repo = self.rest("read repository", Method::GET, &[], None)?;
        Ok(repo
            .get("default_branch")
            .and_then(Value::as_str)
            .unwrap_or("main")
            .to_string())
    }
}

/// Target of the `rel="next"` entry in a `Link` header
fn next_page(link: &str) -> Option<Url> {
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        let is_next = params.split(';').any(|param| param.trim() == "rel=\"next\"");
        if !is_next {
            return None;
        }
        Url::parse(target.trim().trim_start_matches('<').trim_end_matches('>')).ok()
    })
}

impl EffectBackend for GitHubBackend {
    fn find_marker(&self, operation: &Operation, marker: &str) -> Result<Option<AppliedEffect>, BackendError> {
        let kind = operation.kind();
        let found = match operation {
            Operation::CreateIssue { .. } => self.search_marker(marker, "issue")?,
            Operation::CreatePullRequest { .. } => self.search_marker(marker, "pr")?,
            Operation::CreateDiscussion { .. } => self.discussion_marker(marker)?,
            Operation::AddComment { number, .. } | Operation::CloseIssue { number, .. } => {
                let number = number.to_string();
                self.comment_with_marker(&["issues", number.as_str(), "comments"], marker)?
            }
            Operation::CreateReviewComment { number, .. } => {
                let number = number.to_string();
                self.comment_with_marker(&["pulls", number.as_str(), "comments"], marker)?
            }
            _ => None,
        };
        Ok(found.map(|value| Self::created(kind, "earlier attempt".to_string(), &value)))
    }

    fn execute(&self, operation: &Operation) -> Result<AppliedEffect, BackendError> {
        let kind = operation.kind();
        let applied = match operation {
            Operation::CreateIssue { title, body, labels } => {
                let issue = self.rest(
                    "create issue",
                    Method::POST,
                    &["issues"],
                    Some(json!({ "title": title, "body": body, "labels": labels })),
                )?;
                Self::created(kind, format!("issue \"{title}\""), &issue)
            }
            Operation::CreateDiscussion { title, body, category } => {
                let discussion = self.create_discussion(title, body, category.as_deref())?;
                Self::created(kind, format!("discussion \"{title}\""), &discussion)
            }
            Operation::CreatePullRequest {
                title,
                body,
                branch,
                labels,
                draft,
                patch,
            } => {
                let patch = patch
                    .as_deref()
                    .ok_or_else(|| BackendError::NotConfigured("no patch file".to_string()))?;
                let base = self.base_branch()?;
                self.push_branch(branch, title, patch)?;
                let pull = self.rest(
                    "create pull request",
                    Method::POST,
                    &["pulls"],
                    Some(json!({ "title": title, "body": body, "head": branch, "base": base, "draft": draft })),
                )?;
                if let Some(number) = pull.get("number").and_then(Value::as_u64) {
                    if !labels.is_empty() {
                        let number = number.to_string();
                        self.rest(
                            "label pull request",
                            Method::POST,
                            &["issues", number.as_str(), "labels"],
                            Some(json!({ "labels": labels })),
                        )?;
                    }
                }
                Self::created(kind, format!("pull request \"{title}\""), &pull).with_branch(branch.clone())
            }
            Operation::AddComment { number, body } => {
                let n = number.to_string();
                let comment = self.rest(
                    "add comment",
                    Method::POST,
                    &["issues", n.as_str(), "comments"],
                    Some(json!({ "body": body })),
                )?;
                Self::created(kind, format!("comment on #{number}"), &comment)
            }
            Operation::AddLabels { number, labels } => {
                let n = number.to_string();
                self.rest(
                    "add labels",
                    Method::POST,
                    &["issues", n.as_str(), "labels"],
                    Some(json!({ "labels": labels })),
                )?;
                AppliedEffect::new(kind, labels.join(",")).with_number(*number)
            }
            Operation::UpdateIssue {
                number,
                title,
                body,
                state,
            } => {
                let n = number.to_string();
                let mut update = serde_json::Map::new();
                if let Some(title) = title {
                    update.insert("title".into(), Value::from(title.clone()));
                }
                if let Some(body) = body {
                    update.insert("body".into(), Value::from(body.clone()));
                }
                if let Some(state) = state {
                    update.insert("state".into(), Value::from(state.as_str()));
                }
                let issue = self.rest(
                    "update issue",
                    Method::PATCH,
                    &["issues", n.as_str()],
                    Some(Value::Object(update)),
                )?;
                Self::created(kind, format!("update of #{number}"), &issue)
            }
            Operation::AssignToUser { number, assignees } => {
                let n = number.to_string();
                self.rest(
                    "assign users",
                    Method::POST,
                    &["issues", n.as_str(), "assignees"],
                    Some(json!({ "assignees": assignees })),
                )?;
                AppliedEffect::new(kind, assignees.join(",")).with_number(*number)
            }
            Operation::CloseIssue { number, comment } => {
                let n = number.to_string();
                if let Some(comment) = comment {
                    self.rest(
                        "comment before closing",
                        Method::POST,
                        &["issues", n.as_str(), "comments"],
                        Some(json!({ "body": comment })),
                    )?;
                }
                let issue = self.rest(
                    "close issue",
                    Method::PATCH,
                    &["issues", n.as_str()],
                    Some(json!({ "state": "closed", "state_reason": "completed" })),
                )?;
                Self::created(kind, format!("closed #{number}"), &issue)
            }
            Operation::CreateReviewComment {
                number,
                path,
                line,
                start_line,
                side,
                body,
            } => {
                let n = number.to_string();
                let pull = self.rest("read pull request", Method::GET, &["pulls", n.as_str()], None)?;
                let commit = pull
                    .pointer("/head/sha")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let side = match side {
                    ReviewSide::Left => "LEFT",
                    ReviewSide::Right => "RIGHT",
                };
                let mut payload = json!({
                    "body": body,
                    "commit_id": commit,
                    "path": path,
                    "line": line,
                    "side": side,
                });
                if let Some(start) = start_line.filter(|start| start < line) {
                    payload["start_line"] = Value::from(start);
                    payload["start_side"] = Value::from(side);
                }
                let comment = self.rest(
                    "create review comment",
                    Method::POST,
                    &["pulls", n.as_str(), "comments"],
                    Some(payload),
                )?;
                Self::created(kind, format!("review comment on {path}:{line}"), &comment)
            }
            Operation::ReportMissingTool { tool, reason, .. } => {
                info!("agent reported missing tool `{}`: {}", tool, reason);
                AppliedEffect::new(kind, format!("missing tool `{tool}`: {reason}"))
            }
        };
        Ok(applied)
    }
}
