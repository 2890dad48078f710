//! Activation check
//!
//! Runs inside the activation job and decides whether the agent should
//! run for this event. Inputs come from the environment the compiler set
//! on the step; the decision is written as `activated=true|false`.

use crate::error::{Error, ErrorCode, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::env;
use tracing::{debug, info};

pub const STOP_AFTER_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivationInputs {
    /// Labels that may trigger the run; empty means no label filter
    pub label_names: Vec<String>,
    pub event_label: Option<String>,
    /// Slash command, including the leading `/`
    pub command: Option<String>,
    pub event_body: Option<String>,
    /// Deadline in UTC
    pub stop_after: Option<NaiveDateTime>,
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl ActivationInputs {
    pub fn from_env() -> Result<Self> {
        let stop_after = match non_empty("AW_STOP_AFTER") {
            Some(raw) => Some(
                NaiveDateTime::parse_from_str(raw.trim(), STOP_AFTER_FORMAT).map_err(|e| {
                    Error::Config {
                        code: ErrorCode::CONFIG_INVALID_VALUE,
                        message: format!("invalid AW_STOP_AFTER `{raw}`"),
                        path: None,
                        source: None,
                    }
                    .with_source(e)
                })?,
            ),
            None => None,
        };
        Ok(Self {
            label_names: non_empty("AW_LABEL_NAMES")
                .map(|names| {
                    names
                        .split(',')
                        .map(|name| name.trim().to_string())
                        .filter(|name| !name.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            event_label: non_empty("AW_EVENT_LABEL"),
            command: non_empty("AW_COMMAND"),
            event_body: non_empty("AW_EVENT_BODY"),
            stop_after,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub activated: bool,
    pub reason: String,
}

impl Decision {
    fn yes(reason: impl Into<String>) -> Self {
        Self {
            activated: true,
            reason: reason.into(),
        }
    }

    fn no(reason: impl Into<String>) -> Self {
        Self {
            activated: false,
            reason: reason.into(),
        }
    }
}

/// Whether `body` starts with `command` as a whole word
pub fn matches_command(body: &str, command: &str) -> bool {
    body.split_whitespace().next() == Some(command)
}

pub fn evaluate(inputs: &ActivationInputs, now: DateTime<Utc>) -> Decision {
    if let Some(deadline) = inputs.stop_after {
        if now.naive_utc() > deadline {
            return Decision::no(format!("stop-after {} has passed", deadline.format(STOP_AFTER_FORMAT)));
        }
    }

    // Events without a label (manual dispatch, schedules) are not label-filtered.
    if !inputs.label_names.is_empty() {
        if let Some(label) = &inputs.event_label {
            if !inputs.label_names.iter().any(|name| name == label) {
                return Decision::no(format!("label `{label}` is not one of {}", inputs.label_names.join(", ")));
            }
            debug!("label `{}` matched", label);
        }
    }

    if let Some(command) = &inputs.command {
        let body = inputs.event_body.as_deref().unwrap_or_default();
        if !matches_command(body, command) {
            return Decision::no(format!("event text does not start with {command}"));
        }
    }

    Decision::yes("all filters passed")
}

/// Evaluate the environment and return the step outputs
pub fn check_from_env(now: DateTime<Utc>) -> Result<Decision> {
    let inputs = ActivationInputs::from_env()?;
    let decision = evaluate(&inputs, now);
    info!("activated={} ({})", decision.activated, decision.reason);
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(date: &str) -> DateTime<Utc> {
        Utc.from_utc_datetime(&NaiveDateTime::parse_from_str(date, STOP_AFTER_FORMAT).unwrap())
    }

    #[test]
    fn test_no_filters_activates() {
        assert!(evaluate(&ActivationInputs::default(), Utc::now()).activated);
    }

    #[test]
    fn test_label_filter() {
        let mut inputs = ActivationInputs {
            label_names: vec!["bug".into(), "triage".into()],
            event_label: Some("triage".into()),
            ..Default::default()
        };
        assert!(evaluate(&inputs, Utc::now()).activated);

        inputs.event_label = Some("docs".into());
        assert!(!evaluate(&inputs, Utc::now()).activated);

        inputs.event_label = None;
        assert!(evaluate(&inputs, Utc::now()).activated);
    }

    #[test]
    fn test_command_filter() {
        let mut inputs = ActivationInputs {
            command: Some("/triage".into()),
            event_body: Some("/triage please look".into()),
            ..Default::default()
        };
        assert!(evaluate(&inputs, Utc::now()).activated);

        inputs.event_body = Some("/triage-bot".into());
        assert!(!evaluate(&inputs, Utc::now()).activated);

        inputs.event_body = None;
        assert!(!evaluate(&inputs, Utc::now()).activated);
    }

    #[test]
    fn test_stop_after() {
        let inputs = ActivationInputs {
            stop_after: Some(NaiveDateTime::parse_from_str("2030-01-01 00:00:00", STOP_AFTER_FORMAT).unwrap()),
            ..Default::default()
        };
        assert!(evaluate(&inputs, at("2029-12-31 23:59:59")).activated);
        let decision = evaluate(&inputs, at("2030-01-01 00:00:01"));
        assert!(!decision.activated);
        assert!(decision.reason.contains("2030-01-01 00:00:00"));
    }
}
