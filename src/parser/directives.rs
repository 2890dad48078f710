//! Body import directives
//!
//! A line consisting solely of `{{#import path}}` or `@include path` is
//! replaced with the referenced document's body. The `?` forms
//! (`{{#import? path}}`, `@include? path`) tolerate a missing file.
//! Directives inside fenced code blocks are left alone.

use once_cell::sync::Lazy;
use regex::Regex;

static DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\{\{#import(\?)?\s+([^}\s][^}]*?)\s*\}\}|@include(\?)?\s+(\S+))\s*$")
        .expect("Valid regex pattern")
});

/// A run of body text or an import directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Import { reference: String, optional: bool, line: usize },
}

/// Split a body into text runs and directives
pub fn segments(body: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut text = String::new();
    let mut fence: Option<String> = None;

    for (index, line) in body.split_inclusive('\n').enumerate() {
        let trimmed = line.trim_start();
        if let Some(marker) = fence_marker(trimmed) {
            match &fence {
                Some(open) if marker.starts_with(open.as_str()) => fence = None,
                Some(_) => {}
                None => fence = Some(marker),
            }
            text.push_str(line);
            continue;
        }

        if fence.is_none() {
            if let Some(captures) = DIRECTIVE.captures(line.trim_end_matches(['\n', '\r'])) {
                if !text.is_empty() {
                    out.push(Segment::Text(std::mem::take(&mut text)));
                }
                let (optional, reference) = match (captures.get(2), captures.get(4)) {
                    (Some(reference), _) => (captures.get(1).is_some(), reference.as_str()),
                    (None, Some(reference)) => (captures.get(3).is_some(), reference.as_str()),
                    (None, None) => continue,
                };
                out.push(Segment::Import {
                    reference: reference.trim().to_string(),
                    optional,
                    line: index + 1,
                });
                continue;
            }
        }

        text.push_str(line);
    }

    if !text.is_empty() {
        out.push(Segment::Text(text));
    }
    out
}

fn fence_marker(line: &str) -> Option<String> {
    for marker in ["```", "~~~"] {
        if line.starts_with(marker) {
            let ch = marker.chars().next().unwrap_or('`');
            let run: String = line.chars().take_while(|c| *c == ch).collect();
            return Some(run);
        }
    }
    None
}
