//! Schema validation helpers for memlayer JSON5 configuration.

use super::SchemaMode;
use crate::ConfigError;
use serde_json::{Map, Value};

/// Validate a single config layer against the schema.
pub(super) fn validate_layer_schema(
    value: &Value,
    mode: SchemaMode,
    layer: &str,
) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, "")?;
    let allowed = [
        "$schema",
        "embedding",
        "importance",
        "ranking",
        "retention",
        "cache",
        "store",
        "ingest",
        "logging",
    ];
    ensure_allowed_keys(map, &allowed, layer, "")?;

    if let Some(value) = map.get("$schema") {
        expect_kind(Kind::String, value, layer, "$schema")?;
    }
    if let Some(value) = map.get("embedding") {
        validate_embedding(value, layer, "embedding")?;
    }
    if let Some(value) = map.get("importance") {
        validate_numbers(
            value,
            layer,
            "importance",
            &[
                "recency_weight",
                "role_weight",
                "explicit_weight",
                "base_explicit",
                "recency_scale_days",
            ],
        )?;
    }
    if let Some(value) = map.get("ranking") {
        validate_ranking(value, layer, "ranking")?;
    }
    if let Some(value) = map.get("retention") {
        validate_retention(value, layer, "retention", mode)?;
    }
    if let Some(value) = map.get("cache") {
        validate_cache(value, layer, "cache")?;
    }
    if let Some(value) = map.get("store") {
        validate_store(value, layer, "store")?;
    }
    if let Some(value) = map.get("ingest") {
        let ingest = expect_object(value, layer, "ingest")?;
        ensure_allowed_keys(ingest, &["max_content_chars"], layer, "ingest")?;
        if let Some(value) = ingest.get("max_content_chars") {
            expect_kind(Kind::Count, value, layer, "ingest.max_content_chars")?;
        }
    }
    if let Some(value) = map.get("logging") {
        validate_logging(value, layer, "logging")?;
    }

    Ok(())
}

/// Validate the "embedding" block.
fn validate_embedding(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    let allowed = [
        "provider",
        "dimension",
        "model",
        "base_url",
        "api_key_env",
        "timeout_secs",
        "async_mode",
        "queue_capacity",
    ];
    ensure_allowed_keys(map, &allowed, layer, path)?;

    if let Some(value) = map.get("provider") {
        expect_enum(
            value,
            layer,
            &join_path(path, "provider"),
            &["hash", "openai"],
        )?;
    }
    for key in ["dimension", "timeout_secs", "queue_capacity"] {
        if let Some(value) = map.get(key) {
            expect_kind(Kind::Count, value, layer, &join_path(path, key))?;
        }
    }
    for key in ["model", "base_url", "api_key_env"] {
        if let Some(value) = map.get(key) {
            expect_kind(Kind::String, value, layer, &join_path(path, key))?;
        }
    }
    if let Some(value) = map.get("async_mode") {
        expect_kind(Kind::Bool, value, layer, &join_path(path, "async_mode"))?;
    }
    Ok(())
}

/// Validate the "ranking" block.
fn validate_ranking(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    let floats = [
        "similarity_weight",
        "importance_weight",
        "decay_weight",
        "half_life_days",
    ];
    let integers = ["candidate_limit", "default_top_k", "max_top_k"];
    let allowed: Vec<&str> = floats.iter().chain(integers.iter()).copied().collect();
    ensure_allowed_keys(map, &allowed, layer, path)?;

    for key in floats {
        if let Some(value) = map.get(key) {
            expect_kind(Kind::Number, value, layer, &join_path(path, key))?;
        }
    }
    for key in integers {
        if let Some(value) = map.get(key) {
            expect_kind(Kind::Count, value, layer, &join_path(path, key))?;
        }
    }
    Ok(())
}

/// Validate the "retention" block.
fn validate_retention(
    value: &Value,
    layer: &str,
    path: &str,
    mode: SchemaMode,
) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &["enabled", "interval_secs", "default", "tenants"],
        layer,
        path,
    )?;

    if let Some(value) = map.get("enabled") {
        expect_kind(Kind::Bool, value, layer, &join_path(path, "enabled"))?;
    }
    if let Some(value) = map.get("interval_secs") {
        expect_kind(Kind::Count, value, layer, &join_path(path, "interval_secs"))?;
    }
    if let Some(value) = map.get("default") {
        validate_retention_policy(value, layer, &join_path(path, "default"))?;
    }
    if let Some(value) = map.get("tenants") {
        let tenants_path = join_path(path, "tenants");
        let tenants = expect_object(value, layer, &tenants_path)?;
        for (tenant, policy) in tenants {
            if mode == SchemaMode::Full && tenant.trim().is_empty() {
                return Err(invalid_field(layer, &tenants_path, "empty tenant id"));
            }
            validate_retention_policy(policy, layer, &join_path(&tenants_path, tenant))?;
        }
    }
    Ok(())
}

/// Validate a single retention policy object.
fn validate_retention_policy(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &["max_age_days", "importance_threshold", "purge_after_days"],
        layer,
        path,
    )?;
    if let Some(value) = map.get("max_age_days") {
        expect_kind(Kind::Count, value, layer, &join_path(path, "max_age_days"))?;
    }
    if let Some(value) = map.get("importance_threshold") {
        expect_kind(Kind::Number, value, layer, &join_path(path, "importance_threshold"))?;
    }
    if let Some(value) = map.get("purge_after_days") {
        expect_kind(Kind::Count, value, layer, &join_path(path, "purge_after_days"))?;
    }
    Ok(())
}

/// Validate the "cache" block.
fn validate_cache(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &["enabled", "max_items", "search_ttl_secs", "embedding_ttl_secs"],
        layer,
        path,
    )?;
    if let Some(value) = map.get("enabled") {
        expect_kind(Kind::Bool, value, layer, &join_path(path, "enabled"))?;
    }
    for key in ["max_items", "search_ttl_secs", "embedding_ttl_secs"] {
        if let Some(value) = map.get(key) {
            expect_kind(Kind::Count, value, layer, &join_path(path, key))?;
        }
    }
    Ok(())
}

/// Validate the "store" block.
fn validate_store(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["provider", "path"], layer, path)?;
    if let Some(value) = map.get("provider") {
        expect_enum(
            value,
            layer,
            &join_path(path, "provider"),
            &["memory", "file", "sqlite"],
        )?;
    }
    if let Some(value) = map.get("path") {
        expect_kind(Kind::String, value, layer, &join_path(path, "path"))?;
    }
    Ok(())
}

/// Validate the "logging" block.
fn validate_logging(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["level", "json"], layer, path)?;
    if let Some(value) = map.get("level") {
        expect_kind(Kind::String, value, layer, &join_path(path, "level"))?;
    }
    if let Some(value) = map.get("json") {
        expect_kind(Kind::Bool, value, layer, &join_path(path, "json"))?;
    }
    Ok(())
}

/// Validate an object whose keys are all numbers.
fn validate_numbers(
    value: &Value,
    layer: &str,
    path: &str,
    keys: &[&str],
) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, keys, layer, path)?;
    for (key, value) in map {
        expect_kind(Kind::Number, value, layer, &join_path(path, key))?;
    }
    Ok(())
}

/// Expect a JSON object or return a typed error.
fn expect_object<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(invalid_field(layer, path, "expected object")),
    }
}

/// JSON type expected at a leaf.
#[derive(Clone, Copy)]
enum Kind {
    String,
    Bool,
    /// Non-negative integer.
    Count,
    Number,
}

impl Kind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Kind::String => value.is_string(),
            Kind::Bool => value.is_boolean(),
            Kind::Count => value.is_u64(),
            Kind::Number => value.is_number(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Kind::String => "expected string",
            Kind::Bool => "expected bool",
            Kind::Count => "expected non-negative integer",
            Kind::Number => "expected number",
        }
    }
}

fn expect_kind(kind: Kind, value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if kind.accepts(value) {
        Ok(())
    } else {
        Err(invalid_field(layer, path, kind.describe()))
    }
}

/// Expect one of a fixed set of lowercase strings.
fn expect_enum(value: &Value, layer: &str, path: &str, allowed: &[&str]) -> Result<(), ConfigError> {
    match value.as_str() {
        Some(raw) if allowed.contains(&raw) => Ok(()),
        Some(_) => Err(invalid_field(
            layer,
            path,
            &format!("expected one of: {}", allowed.join(", ")),
        )),
        None => Err(invalid_field(layer, path, "expected string")),
    }
}

/// Ensure an object contains only allowed keys.
fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(invalid_field(layer, &join_path(path, key), "unknown key"));
        }
    }
    Ok(())
}

/// Join nested paths for better error messages.
fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Build a structured invalid-field error.
fn invalid_field(layer: &str, path: &str, message: &str) -> ConfigError {
    let normalized_path = if path.is_empty() { "root" } else { path };
    ConfigError::Field {
        location: format!("{layer}:{normalized_path}"),
        message: message.to_string(),
    }
}
