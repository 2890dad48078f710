//! Trigger normalization
//!
//! Accepts the shorthand forms users write in `on:` and produces the
//! canonical event mapping for the pipeline, plus the filters the host
//! platform cannot express natively (label names, slash commands,
//! stop-after deadlines). Those filters are evaluated by the activation job.

use super::schedule;
use super::validation::Collector;
use crate::error::ErrorCode;
use chrono::{NaiveDate, NaiveDateTime};
use serde_yaml::{Mapping, Value};

const EVENTS: &[&str] = &[
    "branch_protection_rule",
    "check_run",
    "check_suite",
    "create",
    "delete",
    "deployment",
    "deployment_status",
    "discussion",
    "discussion_comment",
    "fork",
    "gollum",
    "issue_comment",
    "issues",
    "label",
    "merge_group",
    "milestone",
    "page_build",
    "public",
    "pull_request",
    "pull_request_review",
    "pull_request_review_comment",
    "pull_request_target",
    "push",
    "registry_package",
    "release",
    "repository_dispatch",
    "schedule",
    "status",
    "watch",
    "workflow_call",
    "workflow_dispatch",
    "workflow_run",
];

/// Keys under `on:` that are not platform events
const EXTENSIONS: &[&str] = &["command", "stop-after"];

/// Entity a label filter applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelEntity {
    Issues,
    PullRequest,
    Discussion,
}

impl LabelEntity {
    pub fn event(&self) -> &'static str {
        match self {
            Self::Issues => "issues",
            Self::PullRequest => "pull_request",
            Self::Discussion => "discussion",
        }
    }

    fn from_word(word: &str) -> Option<Self> {
        match word {
            "issue" | "issues" => Some(Self::Issues),
            "pull_request" | "pull-request" | "pr" => Some(Self::PullRequest),
            "discussion" | "discussions" => Some(Self::Discussion),
            _ => None,
        }
    }
}

/// Only proceed when the event's label is one of `names`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    pub entity: LabelEntity,
    pub names: Vec<String>,
}

/// Only proceed when the triggering text starts with `/name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFilter {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Triggers {
    /// Canonical `on:` mapping emitted into the pipeline
    pub events: Mapping,
    pub label_filter: Option<LabelFilter>,
    pub command: Option<CommandFilter>,
    pub stop_after: Option<NaiveDateTime>,
}

impl Triggers {
    /// Whether the activation job has something to evaluate
    pub fn needs_activation_check(&self) -> bool {
        self.label_filter.is_some() || self.command.is_some() || self.stop_after.is_some()
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.events.contains_key(event)
    }

    pub fn to_yaml(&self) -> Value {
        Value::Mapping(self.events.clone())
    }

    /// Parse the `on:` value
    pub fn parse(value: Option<&Value>, errors: &mut Collector) -> Triggers {
        let mut triggers = Triggers::default();
        match value {
            None | Some(Value::Null) => errors.push(
                ErrorCode::VALIDATION_MISSING_FIELD,
                "on",
                "a trigger is required (for example `on: workflow_dispatch`)",
            ),
            Some(Value::String(shorthand)) => triggers.parse_shorthand(shorthand, errors),
            Some(Value::Sequence(events)) => {
                for event in events {
                    match event.as_str() {
                        Some(event) => triggers.add_event(event, Value::Null, "on", errors),
                        None => errors.push(ErrorCode::VALIDATION_TRIGGER, "on", "event list entries must be strings"),
                    }
                }
            }
            Some(Value::Mapping(mapping)) => {
                for (key, entry) in mapping {
                    let Some(key) = key.as_str() else {
                        errors.push(ErrorCode::VALIDATION_TRIGGER, "on", "event names must be strings");
                        continue;
                    };
                    triggers.parse_entry(key, entry, errors);
                }
            }
            Some(_) => errors.push(
                ErrorCode::VALIDATION_TRIGGER,
                "on",
                "`on` must be an event name, a list of events or a mapping",
            ),
        }

        if triggers.label_filter.is_some() && triggers.command.is_some() {
            errors.push(
                ErrorCode::VALIDATION_TRIGGER,
                "on",
                "label filters and command triggers cannot be combined",
            );
        }
        triggers
    }

    fn parse_shorthand(&mut self, shorthand: &str, errors: &mut Collector) {
        let shorthand = shorthand.trim();
        let words: Vec<&str> = shorthand.split_whitespace().collect();

        if let Some(name) = shorthand.strip_prefix('/') {
            self.set_command(name, errors);
            return;
        }

        let label_entity = match words.as_slice() {
            ["labeled", ..] => Some((LabelEntity::Issues, &words[1..])),
            [entity, "labeled", ..] => LabelEntity::from_word(entity).map(|e| (e, &words[2..])),
            _ => None,
        };
        if let Some((entity, names)) = label_entity {
            if names.is_empty() {
                errors.push(
                    ErrorCode::VALIDATION_TRIGGER,
                    "on",
                    format!("`{shorthand}` needs at least one label name"),
                );
                return;
            }
            self.set_label_filter(entity, names.iter().map(|n| n.to_string()).collect());
            return;
        }

        if schedule::is_friendly(shorthand) {
            match schedule::to_cron(shorthand) {
                Ok(cron) => self.push_schedule(cron),
                Err(message) => errors.push(ErrorCode::VALIDATION_TRIGGER, "on", message),
            }
            return;
        }

        self.add_event(shorthand, Value::Null, "on", errors);
    }

    fn parse_entry(&mut self, key: &str, entry: &Value, errors: &mut Collector) {
        let path = format!("on.{key}");
        match key {
            "command" => match entry {
                Value::String(name) => self.set_command(name, errors),
                Value::Mapping(settings) => match settings.get("name").and_then(Value::as_str) {
                    Some(name) => self.set_command(name, errors),
                    None => errors.push(ErrorCode::VALIDATION_TRIGGER, path, "command needs a `name`"),
                },
                _ => errors.push(ErrorCode::VALIDATION_TRIGGER, path, "command must be a name or a mapping"),
            },
            "stop-after" => match entry.as_str().map(parse_deadline) {
                Some(Ok(deadline)) => self.stop_after = Some(deadline),
                Some(Err(message)) => errors.push(ErrorCode::VALIDATION_TRIGGER, path, message),
                None => errors.push(ErrorCode::VALIDATION_TRIGGER, path, "stop-after must be a date string"),
            },
            "schedule" => self.parse_schedule(entry, &path, errors),
            "issues" | "pull_request" | "discussion" => {
                let mut settings = entry.clone();
                if let Value::Mapping(mapping) = &mut settings {
                    if let Some(names) = mapping.remove("names") {
                        let names = super::safe_outputs::string_list(&names, &format!("{path}.names"), errors);
                        if let Some(entity) = LabelEntity::from_word(key) {
                            if !mapping.contains_key("types") {
                                mapping.insert(Value::from("types"), Value::Sequence(vec![Value::from("labeled")]));
                            }
                            self.label_filter = Some(LabelFilter { entity, names });
                        }
                    }
                }
                self.add_event(key, settings, "on", errors);
            }
            _ => self.add_event(key, entry.clone(), "on", errors),
        }
    }

    fn parse_schedule(&mut self, entry: &Value, path: &str, errors: &mut Collector) {
        let items: Vec<Value> = match entry {
            Value::Sequence(items) => items.clone(),
            other => vec![other.clone()],
        };
        for item in items {
            let expression = match &item {
                Value::String(expression) => Some(expression.clone()),
                Value::Mapping(mapping) => mapping.get("cron").and_then(Value::as_str).map(str::to_string),
                _ => None,
            };
            match expression.map(|expression| schedule::to_cron(&expression)) {
                Some(Ok(cron)) => self.push_schedule(cron),
                Some(Err(message)) => errors.push(ErrorCode::VALIDATION_TRIGGER, path, message),
                None => errors.push(
                    ErrorCode::VALIDATION_TRIGGER,
                    path,
                    "schedule entries must be strings or `{cron: ...}` mappings",
                ),
            }
        }
    }

    fn add_event(&mut self, event: &str, settings: Value, path: &str, errors: &mut Collector) {
        if !EVENTS.contains(&event) {
            let mut candidates = EVENTS.to_vec();
            candidates.extend_from_slice(EXTENSIONS);
            errors.push_unknown(
                ErrorCode::VALIDATION_TRIGGER,
                path,
                format!("unknown trigger event `{event}`"),
                event,
                &candidates,
            );
            return;
        }
        self.events.insert(Value::from(event), settings);
    }

    fn push_schedule(&mut self, cron: String) {
        let mut entry = Mapping::new();
        entry.insert(Value::from("cron"), Value::from(cron));
        match self.events.get_mut("schedule") {
            Some(Value::Sequence(items)) => items.push(Value::Mapping(entry)),
            _ => {
                self.events
                    .insert(Value::from("schedule"), Value::Sequence(vec![Value::Mapping(entry)]));
            }
        }
    }

    fn set_label_filter(&mut self, entity: LabelEntity, names: Vec<String>) {
        let mut settings = Mapping::new();
        settings.insert(Value::from("types"), Value::Sequence(vec![Value::from("labeled")]));
        self.events.insert(Value::from(entity.event()), Value::Mapping(settings));
        self.label_filter = Some(LabelFilter { entity, names });
    }

    fn set_command(&mut self, name: &str, errors: &mut Collector) {
        let name = name.trim().trim_start_matches('/');
        if name.is_empty() || name.contains(char::is_whitespace) {
            errors.push(
                ErrorCode::VALIDATION_TRIGGER,
                "on.command",
                "command name must be a single word",
            );
            return;
        }

        let types = |names: &[&str]| {
            let mut settings = Mapping::new();
            settings.insert(
                Value::from("types"),
                Value::Sequence(names.iter().map(|n| Value::from(*n)).collect()),
            );
            Value::Mapping(settings)
        };
        self.events.insert(Value::from("issues"), types(&["opened", "edited", "reopened"]));
        self.events.insert(Value::from("issue_comment"), types(&["created", "edited"]));
        self.events.insert(Value::from("pull_request"), types(&["opened", "edited", "reopened"]));
        self.command = Some(CommandFilter {
            name: name.to_string(),
        });
    }
}

/// Absolute deadline; relative forms would make output depend on compile time
fn parse_deadline(raw: &str) -> Result<NaiveDateTime, String> {
    let raw = raw.trim();
    if raw.starts_with('+') {
        return Err(format!(
            "relative stop-after `{raw}` is not supported; use an absolute date such as 2026-12-31"
        ));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(deadline) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(deadline);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("invalid stop-after date `{raw}` (expected YYYY-MM-DD[ HH:MM[:SS]])"))
}
