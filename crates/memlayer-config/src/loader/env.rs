//! Environment variable overrides.
//!
//! `MEMLAYER_EMBEDDING__ASYNC_MODE=true` maps to `{ embedding: { async_mode: true } }`.
//! Values are parsed as JSON5 scalars when possible and fall back to strings.

use serde_json::{Map, Value};

/// Build an override layer from prefixed environment variables.
pub(super) fn env_overrides(vars: &[(String, String)], prefix: &str) -> Option<Value> {
    let mut root = Map::new();
    for (key, raw) in vars {
        let Some(stripped) = key.strip_prefix(prefix) else {
            continue;
        };
        let segments: Vec<String> = stripped
            .split("__")
            .map(|segment| segment.to_ascii_lowercase())
            .collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            continue;
        }
        insert_path(&mut root, &segments, parse_scalar(raw));
    }
    if root.is_empty() {
        None
    } else {
        Some(Value::Object(root))
    }
}

fn parse_scalar(raw: &str) -> Value {
    match json5::from_str::<Value>(raw) {
        Ok(value @ (Value::Bool(_) | Value::Number(_) | Value::Null)) => value,
        _ => Value::String(raw.to_string()),
    }
}

fn insert_path(map: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.insert(head.clone(), value);
        return;
    }
    let entry = map
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(child) = entry {
        insert_path(child, rest, value);
    }
}

#[cfg(test)]
mod tests {
    use super::env_overrides;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn nests_double_underscore_segments() {
        let vars = vec![
            ("MEMLAYER_EMBEDDING__ASYNC_MODE".to_string(), "true".to_string()),
            ("MEMLAYER_EMBEDDING__PROVIDER".to_string(), "openai".to_string()),
            ("MEMLAYER_RANKING__CANDIDATE_LIMIT".to_string(), "50".to_string()),
            ("OTHER".to_string(), "ignored".to_string()),
        ];
        let value = env_overrides(&vars, "MEMLAYER_").expect("overrides");
        assert_eq!(
            value,
            json!({
                "embedding": { "async_mode": true, "provider": "openai" },
                "ranking": { "candidate_limit": 50 }
            })
        );
    }

    #[test]
    fn ignores_malformed_keys() {
        let vars = vec![("MEMLAYER_EMBEDDING____X".to_string(), "1".to_string())];
        assert_eq!(env_overrides(&vars, "MEMLAYER_"), None);
    }
}
