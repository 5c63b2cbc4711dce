//! memlayer configuration: the `MemlayerConfig` schema with defaults,
//! semantic validation, and a layered JSON5 loader with env overrides.

mod error;
mod loader;
mod model;

pub use error::ConfigError;
pub use loader::{ConfigLayer, ConfigLayerSource, LayeredConfig, LayeredConfigOptions};
pub use model::*;
