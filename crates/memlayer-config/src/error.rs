//! Config loading errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file or the working directory could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A layer is not valid JSON5.
    #[error("{origin} is not valid JSON5: {source}")]
    Syntax {
        origin: String,
        #[source]
        source: json5::Error,
    },
    /// The merged document does not deserialize into `MemlayerConfig`.
    #[error("config does not match the memlayer schema: {0}")]
    Decode(#[from] serde_json::Error),
    /// A key has the wrong type or is unknown; `location` is `<layer>:<dotted.path>`.
    #[error("invalid config at {location}: {message}")]
    Field { location: String, message: String },
    /// A semantic check failed after decoding.
    #[error("invalid config: {0}")]
    Invalid(String),
}
