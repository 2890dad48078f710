//! Collected validation errors
//!
//! Model building never stops at the first problem. Every check pushes into
//! a [`Collector`] and the compile aborts once at the end with the full list.

use crate::error::ErrorCode;
use std::fmt;
use thiserror::Error;

/// One semantic problem in the merged configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: u16,
    /// Dotted configuration path, e.g. `safe-outputs.create-issue.max`
    pub path: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[E{:04}] {}: {}", self.code, self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (did you mean `{suggestion}`?)")?;
        }
        Ok(())
    }
}

/// Every validation error found in one build
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    pub errors: Vec<ValidationError>,
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[E{:04}] workflow validation failed with {} error(s)",
            ErrorCode::VALIDATION_FAILED,
            self.errors.len()
        )?;
        for error in &self.errors {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl ValidationErrors {
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors carrying the given code
    pub fn with_code(&self, code: u16) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().filter(move |error| error.code == code)
    }
}

#[derive(Debug, Default)]
pub struct Collector {
    errors: Vec<ValidationError>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, code: u16, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            code,
            path: path.into(),
            message: message.into(),
            suggestion: None,
        });
    }

    /// Push an error for an unrecognized name, suggesting the closest candidate
    pub fn push_unknown(
        &mut self,
        code: u16,
        path: impl Into<String>,
        message: impl Into<String>,
        name: &str,
        candidates: &[&str],
    ) {
        self.errors.push(ValidationError {
            code,
            path: path.into(),
            message: message.into(),
            suggestion: closest_match(name, candidates).map(str::to_string),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Return `value` if nothing was collected
    pub fn finish<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(ValidationErrors {
                errors: self.errors,
            })
        }
    }
}

/// Closest candidate within a small edit distance
pub fn closest_match<'a>(name: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let limit = (name.chars().count() / 3).clamp(1, 3);
    candidates
        .iter()
        .map(|candidate| (edit_distance(name, candidate), *candidate))
        .filter(|(distance, _)| *distance <= limit)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate)
}

/// Levenshtein distance, case-insensitive
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        current[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            current[j] = (previous[j] + 1)
                .min(current[j - 1] + 1)
                .min(previous[j - 1] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("create-issue", "create-issue"), 0);
        assert_eq!(edit_distance("create-isue", "create-issue"), 1);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("Kitten", "sitting"), 3);
    }

    #[test]
    fn test_closest_match() {
        let candidates = ["create-issue", "add-comment", "add-labels"];
        assert_eq!(closest_match("create-isue", &candidates), Some("create-issue"));
        assert_eq!(closest_match("add-label", &candidates), Some("add-labels"));
        assert_eq!(closest_match("deploy-prod", &candidates), None);
    }

    #[test]
    fn test_collector_reports_everything() {
        let mut collector = Collector::new();
        collector.push(ErrorCode::VALIDATION_MISSING_FIELD, "on", "a trigger is required");
        collector.push_unknown(
            ErrorCode::VALIDATION_UNKNOWN_EFFECT_KIND,
            "safe-outputs.create-isue",
            "unknown safe-output kind `create-isue`",
            "create-isue",
            &["create-issue"],
        );

        let errors = collector.finish(()).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.errors[1].to_string(),
            "[E4004] safe-outputs.create-isue: unknown safe-output kind `create-isue` (did you mean `create-issue`?)"
        );
        assert!(errors.to_string().starts_with("[E4000] workflow validation failed with 2 error(s)"));
    }

    #[test]
    fn test_empty_collector_passes_value_through() {
        assert_eq!(Collector::new().finish(7).unwrap(), 7);
    }
}
