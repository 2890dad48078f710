//! Frontmatter splitting
//!
//! A document may start with a `---` line; everything up to the next `---`
//! line is YAML configuration and the rest is the body.

use super::ParseError;
use crate::error::ErrorCode;
use serde_yaml::{Mapping, Value};

const DELIMITER: &str = "---";

/// A document split into configuration and body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frontmatter {
    pub config: Mapping,
    pub body: String,
    /// 1-based line of the first body line
    pub body_line: usize,
}

/// Split `text` into its configuration mapping and body
pub fn split(text: &str, file: &str) -> Result<Frontmatter, ParseError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.split_inclusive('\n');

    let Some(first) = lines.next() else {
        return Ok(Frontmatter {
            body_line: 1,
            ..Default::default()
        });
    };
    if first.trim_end() != DELIMITER {
        return Ok(Frontmatter {
            config: Mapping::new(),
            body: text.to_string(),
            body_line: 1,
        });
    }

    let mut yaml = String::new();
    let mut offset = first.len();
    let mut line_no = 1;
    let mut closed = false;
    for line in lines {
        line_no += 1;
        offset += line.len();
        if line.trim_end() == DELIMITER {
            closed = true;
            break;
        }
        yaml.push_str(line);
    }

    if !closed {
        return Err(ParseError::new(
            ErrorCode::PARSE_UNTERMINATED_FRONTMATTER,
            file,
            Some(1),
            "frontmatter opened with `---` is never closed",
        ));
    }

    Ok(Frontmatter {
        config: parse_config(&yaml, file)?,
        body: text[offset..].to_string(),
        body_line: line_no + 1,
    })
}

fn parse_config(yaml: &str, file: &str) -> Result<Mapping, ParseError> {
    if yaml.trim().is_empty() {
        return Ok(Mapping::new());
    }

    let value: Value = serde_yaml::from_str(yaml).map_err(|e| {
        // YAML line 1 is document line 2
        let line = e.location().map(|location| location.line() + 1);
        ParseError::new(ErrorCode::PARSE_INVALID_YAML, file, line, strip_location(&e.to_string()))
    })?;

    match value {
        Value::Mapping(mapping) => Ok(mapping),
        Value::Null => Ok(Mapping::new()),
        other => Err(ParseError::new(
            ErrorCode::PARSE_NOT_A_MAPPING,
            file,
            Some(2),
            format!("frontmatter must be a mapping, found {}", kind_of(&other)),
        )),
    }
}

/// serde_yaml appends "at line X column Y"; the error already carries the
/// document-relative line, so drop the YAML-relative one
fn strip_location(message: &str) -> String {
    match message.find(" at line ") {
        Some(index) => message[..index].to_string(),
        None => message.to_string(),
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_config_and_body() {
        let doc = "---\non: push\nengine: claude\n---\n# Task\n\nDo things.\n";
        let parsed = split(doc, "task.md").unwrap();

        assert_eq!(parsed.config.get("engine"), Some(&Value::from("claude")));
        assert_eq!(parsed.body, "# Task\n\nDo things.\n");
        assert_eq!(parsed.body_line, 5);
    }

    #[test]
    fn test_no_frontmatter_is_all_body() {
        let parsed = split("# Just text\n", "x.md").unwrap();
        assert!(parsed.config.is_empty());
        assert_eq!(parsed.body, "# Just text\n");
    }

    #[test]
    fn test_empty_frontmatter() {
        let parsed = split("---\n---\nbody", "x.md").unwrap();
        assert!(parsed.config.is_empty());
        assert_eq!(parsed.body, "body");
    }

    #[test]
    fn test_unterminated_frontmatter() {
        let err = split("---\non: push\n", "x.md").unwrap_err();
        assert_eq!(err.code, ErrorCode::PARSE_UNTERMINATED_FRONTMATTER);
        assert_eq!(err.file, "x.md");
    }

    #[test]
    fn test_yaml_error_reports_document_line() {
        let doc = "---\non: push\npermissions: [\n---\nbody\n";
        let err = split(doc, "bad.md").unwrap_err();
        assert_eq!(err.code, ErrorCode::PARSE_INVALID_YAML);
        assert!(err.line.unwrap() >= 3, "line was {:?}", err.line);
        assert!(err.to_string().starts_with("[E3002] bad.md:"));
    }

    #[test]
    fn test_scalar_frontmatter_rejected() {
        let err = split("---\njust a string\n---\n", "x.md").unwrap_err();
        assert_eq!(err.code, ErrorCode::PARSE_NOT_A_MAPPING);
    }

    #[test]
    fn test_crlf_delimiters() {
        let parsed = split("---\r\non: push\r\n---\r\nbody\r\n", "x.md").unwrap();
        assert_eq!(parsed.config.get("on"), Some(&Value::from("push")));
        assert_eq!(parsed.body, "body\r\n");
    }
}
