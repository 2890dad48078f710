//! Job permission sets

use super::validation::Collector;
use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Resource categories a job token can be granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionScope {
    Actions,
    Attestations,
    Checks,
    Contents,
    Deployments,
    Discussions,
    IdToken,
    Issues,
    Models,
    Packages,
    Pages,
    PullRequests,
    RepositoryProjects,
    SecurityEvents,
    Statuses,
}

impl PermissionScope {
    pub const ALL: [PermissionScope; 15] = [
        Self::Actions,
        Self::Attestations,
        Self::Checks,
        Self::Contents,
        Self::Deployments,
        Self::Discussions,
        Self::IdToken,
        Self::Issues,
        Self::Models,
        Self::Packages,
        Self::Pages,
        Self::PullRequests,
        Self::RepositoryProjects,
        Self::SecurityEvents,
        Self::Statuses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Actions => "actions",
            Self::Attestations => "attestations",
            Self::Checks => "checks",
            Self::Contents => "contents",
            Self::Deployments => "deployments",
            Self::Discussions => "discussions",
            Self::IdToken => "id-token",
            Self::Issues => "issues",
            Self::Models => "models",
            Self::Packages => "packages",
            Self::Pages => "pages",
            Self::PullRequests => "pull-requests",
            Self::RepositoryProjects => "repository-projects",
            Self::SecurityEvents => "security-events",
            Self::Statuses => "statuses",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(Self::as_str).collect()
    }
}

impl FromStr for PermissionScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|scope| scope.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown permission scope `{s}`"))
    }
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access level, ordered so that `max` picks the stronger grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    None,
    Read,
    Write,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            other => Err(format!("invalid permission level `{other}` (expected read, write or none)")),
        }
    }
}

/// Scope to level map; absent scopes have no access
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions(BTreeMap<PermissionScope, PermissionLevel>);

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every scope at the same level
    pub fn all(level: PermissionLevel) -> Self {
        Self(PermissionScope::ALL.iter().map(|scope| (*scope, level)).collect())
    }

    pub fn with(mut self, scope: PermissionScope, level: PermissionLevel) -> Self {
        self.grant(scope, level);
        self
    }

    /// Raise `scope` to at least `level`
    pub fn grant(&mut self, scope: PermissionScope, level: PermissionLevel) {
        let entry = self.0.entry(scope).or_insert(level);
        if level > *entry {
            *entry = level;
        }
    }

    /// Union, keeping the stronger level per scope
    pub fn merge(&mut self, other: &Permissions) {
        for (scope, level) in &other.0 {
            self.grant(*scope, *level);
        }
    }

    pub fn level(&self, scope: PermissionScope) -> PermissionLevel {
        self.0.get(&scope).copied().unwrap_or(PermissionLevel::None)
    }

    /// Scopes granted write access
    pub fn writes(&self) -> impl Iterator<Item = PermissionScope> + '_ {
        self.0
            .iter()
            .filter(|(_, level)| **level == PermissionLevel::Write)
            .map(|(scope, _)| *scope)
    }

    pub fn has_write(&self) -> bool {
        self.writes().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|level| *level == PermissionLevel::None)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PermissionScope, PermissionLevel)> + '_ {
        self.0.iter().map(|(scope, level)| (*scope, *level))
    }

    /// Render as a YAML mapping in scope order, omitting `none`
    pub fn to_yaml(&self) -> Value {
        let mut mapping = Mapping::new();
        for (scope, level) in self.iter() {
            if level != PermissionLevel::None {
                mapping.insert(Value::from(scope.as_str()), Value::from(level.as_str()));
            }
        }
        Value::Mapping(mapping)
    }

    /// Parse a `permissions` value, recording problems in `errors`
    pub fn parse(value: &Value, path: &str, errors: &mut Collector) -> Permissions {
        match value {
            Value::Null => Permissions::new(),
            Value::String(shorthand) => match shorthand.as_str() {
                "read-all" => Permissions::all(PermissionLevel::Read),
                "write-all" => Permissions::all(PermissionLevel::Write),
                "none" => Permissions::new(),
                other => {
                    errors.push_unknown(
                        ErrorCode::VALIDATION_PERMISSION,
                        path,
                        format!("unknown permissions shorthand `{other}`"),
                        other,
                        &["read-all", "write-all", "none"],
                    );
                    Permissions::new()
                }
            },
            Value::Mapping(entries) => {
                let mut permissions = Permissions::new();
                for (key, level) in entries {
                    let Some(key) = key.as_str() else {
                        errors.push(ErrorCode::VALIDATION_PERMISSION, path, "permission scopes must be strings");
                        continue;
                    };
                    let entry_path = format!("{path}.{key}");
                    let Some(level_name) = level.as_str() else {
                        errors.push(ErrorCode::VALIDATION_PERMISSION, entry_path, "permission level must be a string");
                        continue;
                    };
                    let level = match level_name.parse::<PermissionLevel>() {
                        Ok(level) => level,
                        Err(message) => {
                            errors.push(ErrorCode::VALIDATION_PERMISSION, entry_path, message);
                            continue;
                        }
                    };

                    if key == "all" {
                        if level == PermissionLevel::Read {
                            permissions.merge(&Permissions::all(PermissionLevel::Read));
                        } else {
                            errors.push(
                                ErrorCode::VALIDATION_PERMISSION,
                                entry_path,
                                "`all` only accepts `read`; list write scopes explicitly",
                            );
                        }
                        continue;
                    }

                    match key.parse::<PermissionScope>() {
                        Ok(scope) => permissions.grant(scope, level),
                        Err(message) => errors.push_unknown(
                            ErrorCode::VALIDATION_PERMISSION,
                            entry_path,
                            message,
                            key,
                            &PermissionScope::names(),
                        ),
                    }
                }
                permissions
            }
            _ => {
                errors.push(
                    ErrorCode::VALIDATION_PERMISSION,
                    path,
                    "permissions must be a mapping or one of read-all, write-all, none",
                );
                Permissions::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> (Permissions, Collector) {
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        let mut errors = Collector::new();
        let permissions = Permissions::parse(&value, "permissions", &mut errors);
        (permissions, errors)
    }

    #[test]
    fn test_parse_mapping() {
        let (permissions, errors) = parse("contents: read\nissues: write\n");
        assert!(errors.is_empty());
        assert_eq!(permissions.level(PermissionScope::Issues), PermissionLevel::Write);
        assert_eq!(permissions.level(PermissionScope::Contents), PermissionLevel::Read);
        assert_eq!(permissions.level(PermissionScope::Actions), PermissionLevel::None);
    }

    #[test]
    fn test_parse_shorthand() {
        let (permissions, errors) = parse("read-all");
        assert!(errors.is_empty());
        assert!(!permissions.has_write());
        assert_eq!(permissions.level(PermissionScope::Statuses), PermissionLevel::Read);
    }

    #[test]
    fn test_all_write_rejected() {
        let (_, errors) = parse("all: write\n");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_unknown_scope_and_level_collected() {
        let (permissions, errors) = parse("isues: read\ncontents: admin\npull-requests: read\n");
        assert_eq!(errors.len(), 2);
        assert_eq!(permissions.level(PermissionScope::PullRequests), PermissionLevel::Read);
    }

    #[test]
    fn test_grant_keeps_stronger_level() {
        let mut permissions = Permissions::new().with(PermissionScope::Issues, PermissionLevel::Write);
        permissions.grant(PermissionScope::Issues, PermissionLevel::Read);
        assert_eq!(permissions.level(PermissionScope::Issues), PermissionLevel::Write);
    }

    #[test]
    fn test_to_yaml_is_sorted_and_skips_none() {
        let permissions = Permissions::new()
            .with(PermissionScope::PullRequests, PermissionLevel::Write)
            .with(PermissionScope::Contents, PermissionLevel::Read)
            .with(PermissionScope::Actions, PermissionLevel::None);
        let rendered = serde_yaml::to_string(&permissions.to_yaml()).unwrap();
        assert_eq!(rendered, "contents: read\npull-requests: write\n");
    }
}
