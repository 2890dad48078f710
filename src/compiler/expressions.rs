//! Helpers for GitHub Actions expressions

use once_cell::sync::Lazy;
use regex::Regex;

static NEEDS_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bneeds\.([A-Za-z_][A-Za-z0-9_-]*)\.").expect("Valid regex pattern"));

/// Job names referenced as `needs.<job>.` in an expression, deduplicated in order
pub fn needs_references(expression: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for capture in NEEDS_REFERENCE.captures_iter(expression) {
        let name = capture[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// `${{ expr }}`
pub fn wrap(expression: &str) -> String {
    format!("${{{{ {expression} }}}}")
}

pub fn secret(name: &str) -> String {
    wrap(&format!("secrets.{name}"))
}

pub fn job_output(job: &str, output: &str) -> String {
    format!("needs.{job}.outputs.{output}")
}

pub fn step_output(step: &str, output: &str) -> String {
    wrap(&format!("steps.{step}.outputs.{output}"))
}

/// Join conditions with `&&`, parenthesizing compound ones
pub fn all_of<I, S>(conditions: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    conditions
        .into_iter()
        .map(|condition| {
            let condition = condition.as_ref().trim();
            if condition.contains("||") {
                format!("({condition})")
            } else {
                condition.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" && ")
}

/// Strip a surrounding `${{ }}` so conditions can be combined
pub fn unwrap(expression: &str) -> &str {
    let trimmed = expression.trim();
    trimmed
        .strip_prefix("${{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_references() {
        assert_eq!(
            needs_references("always() && needs.agent.result != 'skipped' && needs.detection.outputs.success == 'true' && needs.agent.outputs.x"),
            vec!["agent", "detection"]
        );
        assert!(needs_references("contains(github.event.issue.body, 'needs')").is_empty());
    }

    #[test]
    fn test_wrap_and_unwrap() {
        assert_eq!(wrap("github.token"), "${{ github.token }}");
        assert_eq!(secret("ANTHROPIC_API_KEY"), "${{ secrets.ANTHROPIC_API_KEY }}");
        assert_eq!(unwrap("${{ github.actor == 'bot' }}"), "github.actor == 'bot'");
        assert_eq!(unwrap("github.actor == 'bot'"), "github.actor == 'bot'");
    }

    #[test]
    fn test_all_of_parenthesizes_disjunctions() {
        assert_eq!(all_of(["a == 1", "b || c"]), "a == 1 && (b || c)");
    }
}
