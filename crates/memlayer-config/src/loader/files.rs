//! Reading and schema-checking individual layers.

use super::{ConfigLayer, ConfigLayerSource, LoadedLayer, SchemaMode, schema};
use crate::ConfigError;
use log::debug;
use serde_json::Value;
use std::path::Path;

/// Parse JSON5 text; `origin` names the source in errors.
pub(super) fn parse(origin: &str, contents: &str) -> Result<Value, ConfigError> {
    json5::from_str(contents).map_err(|source| ConfigError::Syntax {
        origin: origin.to_string(),
        source,
    })
}

/// Read and parse one JSON5 file.
pub(super) fn read(path: &Path) -> Result<Value, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&path.display().to_string(), &contents)
}

/// Load a layer. A missing file is `Ok(None)` unless `required`.
pub(super) fn load_layer(
    source: ConfigLayerSource,
    path: &Path,
    required: bool,
) -> Result<Option<LoadedLayer>, ConfigError> {
    if !required && !path.exists() {
        debug!(
            "config layer not present (source={}, path={})",
            source.name(),
            path.display()
        );
        return Ok(None);
    }
    let value = read(path)?;
    let label = format!("{}({})", source.name(), path.display());
    schema::validate_layer_schema(&value, SchemaMode::Partial, &label)?;
    debug!(
        "config layer loaded (source={}, path={})",
        source.name(),
        path.display()
    );
    Ok(Some(LoadedLayer {
        meta: ConfigLayer {
            source,
            path: Some(path.to_path_buf()),
        },
        value,
    }))
}
