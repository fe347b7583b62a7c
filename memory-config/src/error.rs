//! Configuration errors.

use thiserror::Error;

/// Result alias for configuration parsing and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while reading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value was structurally valid but semantically wrong.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
    /// The configuration could not be decoded.
    #[error("malformed configuration: {source}")]
    Malformed {
        /// Source decoding error.
        #[from]
        source: serde_json::Error,
    },
    /// The configuration file could not be read.
    #[error("failed to read configuration file: {source}")]
    Io {
        /// Source I/O error.
        #[from]
        source: std::io::Error,
    },
    /// A store kind tag was not recognised.
    #[error("unknown store type `{0}`")]
    UnknownStoreKind(String),
}
