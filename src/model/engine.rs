//! Engine selection

use super::safe_outputs::{positive_int, string_list, string_map, string_value};
use super::validation::Collector;
use crate::error::ErrorCode;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// AI backends the compiler knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineId {
    Claude,
    Codex,
    Copilot,
    Custom,
}

impl EngineId {
    pub const ALL: [EngineId; 4] = [Self::Claude, Self::Codex, Self::Copilot, Self::Custom];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Copilot => "copilot",
            Self::Custom => "custom",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(Self::as_str).collect()
    }

    pub fn supports_max_turns(&self) -> bool {
        matches!(self, Self::Claude)
    }
}

impl FromStr for EngineId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("unknown engine `{s}`"))
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub id: EngineId,
    /// CLI version to install; `None` installs the latest release
    pub version: Option<String>,
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub env: BTreeMap<String, String>,
    pub args: Vec<String>,
    /// Steps that run the agent, only for `custom`
    pub steps: Vec<Value>,
}

impl EngineConfig {
    pub fn new(id: EngineId) -> Self {
        Self {
            id,
            version: None,
            model: None,
            max_turns: None,
            env: BTreeMap::new(),
            args: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Parse `engine`, falling back to `default` when absent
    pub fn parse(value: Option<&Value>, default: &str, errors: &mut Collector) -> EngineConfig {
        let fallback = default.parse().unwrap_or(EngineId::Claude);
        let Some(value) = value else {
            return EngineConfig::new(fallback);
        };

        let Some(name) = engine_name(value) else {
            errors.push(
                ErrorCode::VALIDATION_ENGINE,
                "engine",
                "engine must be a name or a mapping with an `id`",
            );
            return EngineConfig::new(fallback);
        };
        let id = match name.parse::<EngineId>() {
            Ok(id) => id,
            Err(message) => {
                errors.push_unknown(ErrorCode::VALIDATION_ENGINE, "engine", message, &name, &EngineId::names());
                return EngineConfig::new(fallback);
            }
        };

        let mut engine = EngineConfig::new(id);
        if let Value::Mapping(settings) = value {
            for (key, entry) in settings {
                let key = key.as_str().unwrap_or_default();
                let path = format!("engine.{key}");
                match key {
                    "id" => {}
                    "version" => engine.version = string_value(entry, &path, errors),
                    "model" => engine.model = string_value(entry, &path, errors),
                    "max-turns" => engine.max_turns = positive_int(entry, &path, errors),
                    "env" => engine.env = string_map(entry, &path, errors),
                    "args" => engine.args = string_list(entry, &path, errors),
                    "steps" => match entry {
                        Value::Sequence(steps) => engine.steps = steps.clone(),
                        _ => errors.push(ErrorCode::VALIDATION_ENGINE, path, "steps must be a list"),
                    },
                    other => errors.push_unknown(
                        ErrorCode::VALIDATION_UNKNOWN_KEY,
                        path,
                        format!("unknown engine setting `{other}`"),
                        other,
                        &["id", "version", "model", "max-turns", "env", "args", "steps"],
                    ),
                }
            }
        }

        if engine.max_turns.is_some() && !id.supports_max_turns() {
            errors.push(
                ErrorCode::VALIDATION_ENGINE,
                "engine.max-turns",
                format!("engine `{id}` does not support max-turns"),
            );
        }
        match (id, engine.steps.is_empty()) {
            (EngineId::Custom, true) => errors.push(
                ErrorCode::VALIDATION_ENGINE,
                "engine.steps",
                "the custom engine needs `steps` that run the agent",
            ),
            (EngineId::Custom, false) | (_, true) => {}
            (_, false) => errors.push(
                ErrorCode::VALIDATION_ENGINE,
                "engine.steps",
                format!("`steps` are only supported by the custom engine, not `{id}`"),
            ),
        }

        engine
    }
}

/// Engine name of an `engine` value, string or `{id: ...}`
pub fn engine_name(value: &Value) -> Option<String> {
    match value {
        Value::String(name) => Some(name.trim().to_string()),
        Value::Mapping(settings) => settings.get("id").and_then(Value::as_str).map(|id| id.trim().to_string()),
        _ => None,
    }
}
