//! Layered configuration loader with locked requirements and env overrides.
//!
//! Layers, lowest precedence first: system, user, project root, cwd, runtime
//! paths, then `MEMLAYER_*` environment variables. Every layer is checked
//! against the schema on its own before merging. Keys set by the
//! requirements file are locked and win over all layers.

mod env;
mod files;
mod merge;
mod paths;
mod schema;


use crate::{ConfigError, MemlayerConfig, RetentionPolicyConfig, StoreProviderKind};
use log::{debug, info};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "memlayer.json5";
/// Per-user config directory under the home directory.
const DEFAULT_CONFIG_DIR: &str = ".memlayer";
const DEFAULT_PROJECT_ROOT_MARKERS: &[&str] = &[".git"];
const ENV_PREFIX: &str = "MEMLAYER_";

/// Effective config plus metadata about which layers were loaded.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    /// The merged, validated config.
    pub config: MemlayerConfig,
    /// Metadata for each layer that contributed to the result.
    pub layers: Vec<ConfigLayer>,
}

/// Origin for a single config layer in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayerSource {
    /// Locked settings that later layers cannot override.
    Requirements,
    /// System-wide configuration.
    System,
    /// User-specific configuration.
    User,
    /// Project root configuration.
    Project,
    /// Current working directory configuration.
    Cwd,
    /// Explicit config files passed at runtime.
    Runtime,
    /// `MEMLAYER_*` environment variables (highest precedence).
    Env,
}

/// Metadata about a loaded config layer.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    /// Layer origin (system, user, runtime, etc).
    pub source: ConfigLayerSource,
    /// Location on disk, if the layer came from a file.
    pub path: Option<PathBuf>,
}

/// Schema validation mode for layered configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaMode {
    /// Partial validation for non-final layers.
    Partial,
    /// Full validation for the effective config.
    Full,
}

/// Options controlling layered config discovery and overrides.
#[derive(Debug, Clone)]
pub struct LayeredConfigOptions {
    /// Working directory used to resolve local layers.
    pub cwd: PathBuf,
    /// Optional system config path (defaults to `/etc/memlayer/memlayer.json5` on Unix).
    pub system_config_path: Option<PathBuf>,
    /// Optional user config path (defaults to `~/.memlayer/memlayer.json5`).
    pub user_config_path: Option<PathBuf>,
    /// Optional requirements path for locked settings.
    pub requirements_path: Option<PathBuf>,
    /// Runtime override config paths applied after file discovery.
    pub runtime_paths: Vec<PathBuf>,
    /// Marker files/dirs used to detect the project root.
    pub project_root_markers: Vec<String>,
    /// Environment variables considered for overrides.
    pub env: Vec<(String, String)>,
}

impl LayeredConfigOptions {
    /// Default layer locations plus the `MEMLAYER_*` variables of this process.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            system_config_path: paths::system_config(),
            user_config_path: paths::user_config(),
            requirements_path: paths::system_requirements(),
            runtime_paths: Vec::new(),
            project_root_markers: DEFAULT_PROJECT_ROOT_MARKERS
                .iter()
                .map(ToString::to_string)
                .collect(),
            env: std::env::vars()
                .filter(|(key, _)| key.starts_with(ENV_PREFIX))
                .collect(),
        }
    }

    /// Add a runtime override config path.
    pub fn with_runtime_path(mut self, path: impl AsRef<Path>) -> Self {
        self.runtime_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Replace the environment used for overrides.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self
    }
}

impl ConfigLayerSource {
    /// Short name used in logs and error locations.
    pub fn name(self) -> &'static str {
        match self {
            ConfigLayerSource::Requirements => "requirements",
            ConfigLayerSource::System => "system",
            ConfigLayerSource::User => "user",
            ConfigLayerSource::Project => "project",
            ConfigLayerSource::Cwd => "cwd",
            ConfigLayerSource::Runtime => "runtime",
            ConfigLayerSource::Env => "env",
        }
    }
}

impl MemlayerConfig {
    /// Load a single config file without layering.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("loading config (path={})", path.display());
        config_from_value(files::read(path)?, "config")
    }

    /// Load a single config from JSON5 text without layering.
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        debug!("loading config from text (len={})", contents.len());
        config_from_value(files::parse("config", contents)?, "config")
    }

    /// Load the layer stack from the default locations.
    pub fn load_layered(cwd: impl AsRef<Path>) -> Result<LayeredConfig, ConfigError> {
        Self::load_layered_with_options(LayeredConfigOptions::new(cwd))
    }

    /// Load the layer stack from explicit locations.
    pub fn load_layered_with_options(
        options: LayeredConfigOptions,
    ) -> Result<LayeredConfig, ConfigError> {
        let cwd = paths::resolve_cwd(&options.cwd)?;
        let mut layers = Vec::new();

        let lock = match options.requirements_path.as_deref() {
            Some(path) => files::load_layer(ConfigLayerSource::Requirements, path, false)?,
            None => None,
        };
        let mut merged = Value::Object(serde_json::Map::new());
        if let Some(lock) = &lock {
            merge::overlay(&mut merged, &lock.value, None);
            layers.push(lock.meta.clone());
        }
        let lock = lock.map(|layer| layer.value);

        let project = paths::project_root(&cwd, &options.project_root_markers)
            .map(|root| root.join(DEFAULT_CONFIG_FILE));
        let discovered = [
            (ConfigLayerSource::System, options.system_config_path.clone()),
            (ConfigLayerSource::User, options.user_config_path.clone()),
            (ConfigLayerSource::Project, project),
            (ConfigLayerSource::Cwd, Some(cwd.join(DEFAULT_CONFIG_FILE))),
        ];
        let mut seen = HashSet::new();
        let mut stack = Vec::new();
        for (source, path) in discovered {
            let Some(path) = path else {
                continue;
            };
            if !seen.insert(paths::identity(&path)) {
                debug!(
                    "config file already loaded (source={}, path={})",
                    source.name(),
                    path.display()
                );
                continue;
            }
            stack.extend(files::load_layer(source, &path, false)?);
        }
        for path in &options.runtime_paths {
            stack.extend(files::load_layer(ConfigLayerSource::Runtime, path, true)?);
        }
        if let Some(value) = env::env_overrides(&options.env, ENV_PREFIX) {
            schema::validate_layer_schema(&value, SchemaMode::Partial, "env")?;
            stack.push(LoadedLayer {
                meta: ConfigLayer {
                    source: ConfigLayerSource::Env,
                    path: None,
                },
                value,
            });
        }

        for layer in stack {
            merge::overlay(&mut merged, &layer.value, lock.as_ref());
            layers.push(layer.meta);
        }
        let config = config_from_value(merged, "effective")?;
        info!(
            "layered config loaded (layers={}, cwd={})",
            layers.len(),
            cwd.display()
        );
        Ok(LayeredConfig { config, layers })
    }

    /// Validate configuration invariants that cannot be expressed in serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.dimension == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimension must be greater than zero".to_string(),
            ));
        }
        if self.embedding.async_mode && self.embedding.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "embedding.queue_capacity must be greater than zero in async mode".to_string(),
            ));
        }

        let importance = &self.importance;
        for (name, weight) in [
            ("importance.recency_weight", importance.recency_weight),
            ("importance.role_weight", importance.role_weight),
            ("importance.explicit_weight", importance.explicit_weight),
            ("importance.base_explicit", importance.base_explicit),
        ] {
            ensure_unit_interval(name, weight)?;
        }
        ensure_positive("importance.recency_scale_days", importance.recency_scale_days)?;

        let ranking = &self.ranking;
        for (name, weight) in [
            ("ranking.similarity_weight", ranking.similarity_weight),
            ("ranking.importance_weight", ranking.importance_weight),
            ("ranking.decay_weight", ranking.decay_weight),
        ] {
            ensure_unit_interval(name, weight)?;
        }
        ensure_positive("ranking.half_life_days", ranking.half_life_days)?;
        if ranking.candidate_limit == 0 {
            return Err(ConfigError::Invalid(
                "ranking.candidate_limit must be greater than zero".to_string(),
            ));
        }
        if ranking.default_top_k > ranking.max_top_k {
            return Err(ConfigError::Invalid(
                "ranking.default_top_k cannot exceed ranking.max_top_k".to_string(),
            ));
        }

        if self.retention.enabled && self.retention.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "retention.interval_secs must be greater than zero".to_string(),
            ));
        }
        validate_retention_policy("retention.default", &self.retention.default)?;
        for (tenant, policy) in &self.retention.tenants {
            if tenant.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "retention.tenants keys must be non-empty tenant ids".to_string(),
                ));
            }
            validate_retention_policy(&format!("retention.tenants.{tenant}"), policy)?;
        }

        if self.store.provider != StoreProviderKind::Memory
            && self
                .store
                .path
                .as_deref()
                .is_some_and(|path| path.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "store.path must not be blank for file and sqlite stores".to_string(),
            ));
        }

        if self.ingest.max_content_chars == 0 {
            return Err(ConfigError::Invalid(
                "ingest.max_content_chars must be greater than zero".to_string(),
            ));
        }

        let level = self.logging.level.to_ascii_lowercase();
        if !["off", "error", "warn", "info", "debug", "trace"].contains(&level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level '{}' is not a known level",
                self.logging.level
            )));
        }

        Ok(())
    }
}

/// Internal representation of a loaded config layer.
#[derive(Debug, Clone)]
struct LoadedLayer {
    meta: ConfigLayer,
    value: Value,
}

fn config_from_value(value: Value, label: &str) -> Result<MemlayerConfig, ConfigError> {
    schema::validate_layer_schema(&value, SchemaMode::Full, label)?;
    let config: MemlayerConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}

/// Reject weights and thresholds outside [0, 1].
fn ensure_unit_interval(name: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be within [0, 1] (got {value})"
        )))
    }
}

fn ensure_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be positive (got {value})"
        )))
    }
}

/// Validate a single retention policy block.
fn validate_retention_policy(
    name: &str,
    policy: &RetentionPolicyConfig,
) -> Result<(), ConfigError> {
    ensure_unit_interval(
        &format!("{name}.importance_threshold"),
        policy.importance_threshold,
    )
}
