//! Markdown section extraction for `#Section` import suffixes

use once_cell::sync::Lazy;
use regex::Regex;

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.*?)\s*#*\s*$").expect("Valid regex pattern"));

/// Return the section titled `name` (heading included), up to the next
/// heading of the same or a higher level. Titles compare case-insensitively.
pub fn extract_section(markdown: &str, name: &str) -> Option<String> {
    let wanted = name.trim().to_lowercase();
    let mut level: Option<usize> = None;
    let mut out = String::new();
    let mut in_fence = false;

    for line in markdown.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        if content.trim_start().starts_with("```") || content.trim_start().starts_with("~~~") {
            in_fence = !in_fence;
        }

        let heading = if in_fence {
            None
        } else {
            HEADING
                .captures(content)
                .map(|c| (c[1].len(), c[2].to_lowercase()))
        };

        match (level, heading) {
            (None, Some((depth, title))) if title == wanted => {
                level = Some(depth);
                out.push_str(line);
            }
            (Some(current), Some((depth, _))) if depth <= current => break,
            (Some(_), _) => out.push_str(line),
            (None, _) => {}
        }
    }

    level.map(|_| out.trim_end().to_string() + "\n")
}
