//! Public SDK surface for memlayer.
//!
//! Re-exports the config and core crates and wires a [`MemoryLayer`] from a
//! loaded [`config::MemlayerConfig`], so binaries and embedders build the
//! same service the same way.

mod convert;
mod layer;

/// Re-export for convenience.
pub use memlayer_config as config;
/// Re-export for convenience.
pub use memlayer_core as core;

pub use convert::{
    BootstrapError, cache_settings, configured_policies, embedding_provider, retention_policy,
    service_settings,
};
pub use layer::MemoryLayer;

use chrono::{SecondsFormat, Utc};
use memlayer_config::LoggingConfig;
use std::io::Write;

/// Initialize env_logger from the logging config.
///
/// `RUST_LOG` wins over `logging.level` when set. With `logging.json` every
/// record is written as a single JSON object. Repeated calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&config.level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    if config.json {
        builder.format(|buf, record| {
            let line = serde_json::json!({
                "ts": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                "level": record.level().as_str(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{line}")
        });
    } else {
        builder.format_timestamp_millis();
    }
    let _ = builder.try_init();
}
