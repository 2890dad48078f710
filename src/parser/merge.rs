//! Deep merge of configuration layers
//!
//! The overlay wins on scalar conflicts and mappings merge key by key.
//! A handful of list-valued fields accumulate across layers instead of
//! being replaced; every other list is replaced wholesale.

use crate::model::EffectKind;
use serde_yaml::{Mapping, Value};

/// Dotted paths of lists that concatenate; `*` matches one key
const CONCAT_LISTS: &[&str] = &[
    "steps",
    "post-steps",
    "network.allowed",
    "tools.bash",
    "tools.*.allowed",
    "tools.*.toolsets",
    "sandbox.mounts",
    "safe-outputs.*.allowed",
];

/// Merge `overlay` on top of `base`
pub fn merge_layer(base: &mut Mapping, overlay: Mapping) {
    let mut path = Vec::new();
    merge_mapping(base, overlay, &mut path);
}

/// Rewrite effect-kind keys under `safe-outputs` to their `-` spelling so
/// `add_labels` and `add-labels` from different layers merge as one key.
/// A key whose normalized form is already present is left as written.
pub fn normalize_kind_keys(config: &mut Mapping) {
    let Some(Value::Mapping(outputs)) = config.get_mut("safe-outputs") else {
        return;
    };
    let mut normalized = Mapping::with_capacity(outputs.len());
    for (key, value) in std::mem::take(outputs) {
        let canonical = key
            .as_str()
            .and_then(EffectKind::from_key)
            .map(|kind| Value::from(kind.key()))
            .filter(|canonical| !normalized.contains_key(canonical));
        normalized.insert(canonical.unwrap_or(key), value);
    }
    *outputs = normalized;
}

fn merge_mapping(base: &mut Mapping, overlay: Mapping, path: &mut Vec<String>) {
    for (key, value) in overlay {
        let segment = match &key {
            Value::String(s) => s.clone(),
            other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
        };
        path.push(segment);
        match base.get_mut(&key) {
            Some(existing) => merge_value(existing, value, path),
            None => {
                base.insert(key, value);
            }
        }
        path.pop();
    }
}

fn merge_value(base: &mut Value, overlay: Value, path: &mut Vec<String>) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => merge_mapping(base, overlay, path),
        (Value::Sequence(base), Value::Sequence(overlay)) if is_concat_path(path) => {
            for item in overlay {
                let duplicate = !matches!(item, Value::Mapping(_) | Value::Sequence(_))
                    && base.contains(&item);
                if !duplicate {
                    base.push(item);
                }
            }
        }
        // `key:` with no value declares the key without overriding settings
        (Value::Mapping(_), Value::Null) => {}
        (base, overlay) => *base = overlay,
    }
}

fn is_concat_path(path: &[String]) -> bool {
    CONCAT_LISTS.iter().any(|pattern| {
        let parts: Vec<&str> = pattern.split('.').collect();
        parts.len() == path.len()
            && parts
                .iter()
                .zip(path)
                .all(|(pattern, segment)| *pattern == "*" || pattern == segment)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_overlay_wins_on_scalars() {
        let mut base = mapping("engine: codex\ntimeout-minutes: 10\n");
        merge_layer(&mut base, mapping("engine: claude\n"));

        assert_eq!(base, mapping("engine: claude\ntimeout-minutes: 10\n"));
    }

    #[test]
    fn test_nested_mappings_merge() {
        let mut base = mapping("tools:\n  github:\n    toolsets: [issues]\n  edit:\n");
        merge_layer(&mut base, mapping("tools:\n  web-fetch:\n"));

        let tools = base.get("tools").unwrap().as_mapping().unwrap();
        assert!(tools.contains_key("github"));
        assert!(tools.contains_key("edit"));
        assert!(tools.contains_key("web-fetch"));
    }

    #[test]
    fn test_declared_lists_concatenate_without_duplicates() {
        let mut base = mapping("network:\n  allowed: [a.com, b.com]\ntools:\n  github:\n    toolsets: [issues]\n");
        merge_layer(
            &mut base,
            mapping("network:\n  allowed: [b.com, c.com]\ntools:\n  github:\n    toolsets: [repos]\n"),
        );

        assert_eq!(
            base,
            mapping("network:\n  allowed: [a.com, b.com, c.com]\ntools:\n  github:\n    toolsets: [issues, repos]\n")
        );
    }

    #[test]
    fn test_undeclared_lists_are_replaced() {
        let mut base = mapping("runs-on: [self-hosted, linux]\n");
        merge_layer(&mut base, mapping("runs-on: [ubuntu-latest]\n"));
        assert_eq!(base, mapping("runs-on: [ubuntu-latest]\n"));
    }

    #[test]
    fn test_steps_concatenate_in_layer_order() {
        let mut base = mapping("steps:\n  - run: one\n");
        merge_layer(&mut base, mapping("steps:\n  - run: two\n"));
        assert_eq!(base, mapping("steps:\n  - run: one\n  - run: two\n"));
    }

    #[test]
    fn test_kind_keys_use_dash_spelling() {
        let mut config = mapping("safe-outputs:\n  add_labels:\n  create-issue:\n  github_token: x\n");
        normalize_kind_keys(&mut config);
        assert_eq!(
            config,
            mapping("safe-outputs:\n  add-labels:\n  create-issue:\n  github_token: x\n")
        );
    }

    #[test]
    fn test_kind_key_collision_is_left_for_validation() {
        let mut config = mapping("safe-outputs:\n  add-labels:\n  add_labels:\n");
        normalize_kind_keys(&mut config);
        let outputs = config.get("safe-outputs").unwrap().as_mapping().unwrap();
        assert!(outputs.contains_key("add-labels"));
        assert!(outputs.contains_key("add_labels"));
    }

    #[test]
    fn test_null_overlay_keeps_base_settings() {
        let mut base = mapping("safe-outputs:\n  create-issue:\n    max: 3\n");
        merge_layer(&mut base, mapping("safe-outputs:\n  create-issue:\n"));
        assert_eq!(base, mapping("safe-outputs:\n  create-issue:\n    max: 3\n"));
    }
}
