//! Threat-detection verdict
//!
//! The detection engine ends its output with a single
//! `THREAT_DETECTION_RESULT:{...}` line. A missing or unreadable verdict
//! counts as a failure so effects never run on an inconclusive review.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const VERDICT_PREFIX: &str = "THREAT_DETECTION_RESULT:";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerdictError {
    #[error("[E6007] detection output has no {VERDICT_PREFIX} line")]
    Missing,
    #[error("[E6007] invalid verdict: {0}")]
    Invalid(String),
}

impl VerdictError {
    pub fn code(&self) -> u16 {
        ErrorCode::VERDICT_MISSING
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreatVerdict {
    #[serde(default)]
    pub prompt_injection: bool,
    #[serde(default)]
    pub secret_leak: bool,
    #[serde(default)]
    pub malicious_patch: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl ThreatVerdict {
    pub fn is_safe(&self) -> bool {
        !(self.prompt_injection || self.secret_leak || self.malicious_patch)
    }

    pub fn threats(&self) -> Vec<&'static str> {
        let mut threats = Vec::new();
        if self.prompt_injection {
            threats.push("prompt injection");
        }
        if self.secret_leak {
            threats.push("secret leak");
        }
        if self.malicious_patch {
            threats.push("malicious patch");
        }
        threats
    }

    /// Parse the last verdict line in `log`
    pub fn from_log(log: &str) -> Result<Self, VerdictError> {
        let line = log
            .lines()
            .rev()
            .find_map(|line| {
                line.find(VERDICT_PREFIX)
                    .map(|start| &line[start + VERDICT_PREFIX.len()..])
            })
            .ok_or(VerdictError::Missing)?;
        serde_json::from_str(line.trim()).map_err(|e| VerdictError::Invalid(e.to_string()))
    }
}
