//! Tool grants for the agent
//!
//! Tools are the only source of agent-job permissions beyond
//! `contents: read`. A GitHub tool grants read access to the scopes its
//! toolsets cover (write when `read-only: false`).

use super::permissions::{PermissionLevel, PermissionScope, Permissions};
use super::safe_outputs::{bool_value, string_list, string_map, string_value};
use super::validation::Collector;
use crate::error::ErrorCode;
use serde_yaml::Value;
use std::collections::BTreeMap;

const TOOLSETS: &[&str] = &[
    "context",
    "repos",
    "issues",
    "pull_requests",
    "actions",
    "discussions",
    "code_security",
    "labels",
    "projects",
    "users",
];

const DEFAULT_TOOLSETS: &[&str] = &["context", "repos", "issues", "pull_requests", "users"];

/// Commands allowed when `bash:` is declared without a list
pub const DEFAULT_BASH_COMMANDS: &[&str] = &[
    "cat", "date", "echo", "grep", "head", "ls", "pwd", "sort", "tail", "uniq", "wc",
];

const BUILTIN_TOOLS: &[&str] = &["github", "bash", "edit", "web-fetch", "web-search"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubTool {
    /// Expanded, sorted toolset names
    pub toolsets: Vec<String>,
    pub read_only: bool,
    /// Restrict to these tool names; empty allows the whole toolset
    pub allowed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BashTool {
    Any,
    Commands(Vec<String>),
}

/// A user-declared MCP server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpServer {
    pub name: String,
    pub container: Option<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub allowed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tools {
    pub github: Option<GitHubTool>,
    pub bash: Option<BashTool>,
    pub edit: bool,
    pub web_fetch: bool,
    pub web_search: bool,
    /// Sorted by name
    pub mcp_servers: Vec<McpServer>,
}

impl Tools {
    pub fn parse(value: Option<&Value>, errors: &mut Collector) -> Tools {
        let mut tools = Tools::default();
        let mapping = match value {
            None | Some(Value::Null) => return tools,
            Some(Value::Mapping(mapping)) => mapping,
            Some(_) => {
                errors.push(ErrorCode::VALIDATION_TOOLS, "tools", "tools must be a mapping");
                return tools;
            }
        };

        for (key, entry) in mapping {
            let Some(name) = key.as_str() else {
                errors.push(ErrorCode::VALIDATION_TOOLS, "tools", "tool names must be strings");
                continue;
            };
            let path = format!("tools.{name}");
            match name {
                "github" => tools.github = parse_github(entry, &path, errors),
                "bash" => tools.bash = parse_bash(entry, &path, errors),
                "edit" => tools.edit = bool_value(entry, &path, errors),
                "web-fetch" => tools.web_fetch = bool_value(entry, &path, errors),
                "web-search" => tools.web_search = bool_value(entry, &path, errors),
                custom => {
                    if let Some(server) = parse_mcp_server(custom, entry, &path, errors) {
                        tools.mcp_servers.push(server);
                    }
                }
            }
        }

        tools.mcp_servers.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Grants the declared tools need, plus `contents: read` for checkout
    pub fn implied_permissions(&self) -> Permissions {
        let mut permissions = Permissions::new().with(PermissionScope::Contents, PermissionLevel::Read);
        if let Some(github) = &self.github {
            let level = if github.read_only {
                PermissionLevel::Read
            } else {
                PermissionLevel::Write
            };
            for toolset in &github.toolsets {
                if let Some(scope) = toolset_scope(toolset) {
                    permissions.grant(scope, level);
                }
            }
        }
        permissions
    }

    pub fn is_empty(&self) -> bool {
        self == &Tools::default()
    }
}

fn toolset_scope(toolset: &str) -> Option<PermissionScope> {
    match toolset {
        "repos" => Some(PermissionScope::Contents),
        "issues" | "labels" => Some(PermissionScope::Issues),
        "pull_requests" => Some(PermissionScope::PullRequests),
        "actions" => Some(PermissionScope::Actions),
        "discussions" => Some(PermissionScope::Discussions),
        "code_security" => Some(PermissionScope::SecurityEvents),
        "projects" => Some(PermissionScope::RepositoryProjects),
        _ => None,
    }
}

fn parse_github(value: &Value, path: &str, errors: &mut Collector) -> Option<GitHubTool> {
    let mut tool = GitHubTool {
        toolsets: Vec::new(),
        read_only: true,
        allowed: Vec::new(),
    };
    let mut requested: Vec<String> = vec!["default".to_string()];

    match value {
        Value::Null | Value::Bool(true) => {}
        Value::Bool(false) => return None,
        Value::Mapping(settings) => {
            for (key, entry) in settings {
                let key = key.as_str().unwrap_or_default();
                let entry_path = format!("{path}.{key}");
                match key {
                    "toolsets" => requested = string_list(entry, &entry_path, errors),
                    "read-only" => tool.read_only = bool_value(entry, &entry_path, errors),
                    "allowed" => tool.allowed = string_list(entry, &entry_path, errors),
                    other => errors.push_unknown(
                        ErrorCode::VALIDATION_UNKNOWN_KEY,
                        entry_path,
                        format!("unknown github tool setting `{other}`"),
                        other,
                        &["toolsets", "read-only", "allowed"],
                    ),
                }
            }
        }
        _ => {
            errors.push(ErrorCode::VALIDATION_TOOLS, path, "github must be a mapping or `true`");
            return None;
        }
    }

    for toolset in requested {
        match toolset.as_str() {
            "default" => tool.toolsets.extend(DEFAULT_TOOLSETS.iter().map(|t| t.to_string())),
            "all" => tool.toolsets.extend(TOOLSETS.iter().map(|t| t.to_string())),
            name if TOOLSETS.contains(&name) => tool.toolsets.push(name.to_string()),
            name => {
                let mut candidates = TOOLSETS.to_vec();
                candidates.extend_from_slice(&["default", "all"]);
                errors.push_unknown(
                    ErrorCode::VALIDATION_TOOLS,
                    format!("{path}.toolsets"),
                    format!("unknown github toolset `{name}`"),
                    name,
                    &candidates,
                );
            }
        }
    }
    tool.toolsets.sort();
    tool.toolsets.dedup();
    Some(tool)
}

fn parse_bash(value: &Value, path: &str, errors: &mut Collector) -> Option<BashTool> {
    match value {
        Value::Null => Some(BashTool::Commands(
            DEFAULT_BASH_COMMANDS.iter().map(|c| c.to_string()).collect(),
        )),
        Value::Bool(true) => Some(BashTool::Any),
        Value::Bool(false) => None,
        Value::Sequence(_) => {
            let commands = string_list(value, path, errors);
            if commands.iter().any(|c| c == "*" || c == ":*") {
                Some(BashTool::Any)
            } else {
                Some(BashTool::Commands(commands))
            }
        }
        _ => {
            errors.push(ErrorCode::VALIDATION_TOOLS, path, "bash must be `true` or a list of commands");
            None
        }
    }
}

fn parse_mcp_server(name: &str, value: &Value, path: &str, errors: &mut Collector) -> Option<McpServer> {
    let Value::Mapping(settings) = value else {
        errors.push_unknown(
            ErrorCode::VALIDATION_TOOLS,
            path,
            format!("unknown tool `{name}`; custom MCP servers need a `container` or `command`"),
            name,
            BUILTIN_TOOLS,
        );
        return None;
    };

    let mut server = McpServer {
        name: name.to_string(),
        container: None,
        command: None,
        args: Vec::new(),
        env: BTreeMap::new(),
        allowed: Vec::new(),
    };
    for (key, entry) in settings {
        let key = key.as_str().unwrap_or_default();
        let entry_path = format!("{path}.{key}");
        match key {
            "container" => server.container = string_value(entry, &entry_path, errors),
            "command" => server.command = string_value(entry, &entry_path, errors),
            "args" => server.args = string_list(entry, &entry_path, errors),
            "env" => server.env = string_map(entry, &entry_path, errors),
            "allowed" => server.allowed = string_list(entry, &entry_path, errors),
            other => errors.push_unknown(
                ErrorCode::VALIDATION_UNKNOWN_KEY,
                entry_path,
                format!("unknown MCP server setting `{other}`"),
                other,
                &["container", "command", "args", "env", "allowed"],
            ),
        }
    }

    match (&server.container, &server.command) {
        (None, None) => {
            errors.push(
                ErrorCode::VALIDATION_TOOLS,
                path,
                format!("MCP server `{name}` needs a `container` or a `command`"),
            );
            None
        }
        (Some(_), Some(_)) => {
            errors.push(
                ErrorCode::VALIDATION_TOOLS,
                path,
                format!("MCP server `{name}` cannot set both `container` and `command`"),
            );
            None
        }
        _ => Some(server),
    }
}
