//! # 📖 Configuration management
//!
//! cachewire obtains run-time configuration from the following sources, highest priority first:
//! 1. Command-line options
//! 2. Environment variables, named after the field with a `CACHEWIRE_` prefix (e.g. `CACHEWIRE_PORT`)
//! 3. A configuration file: the one given by `--config`, or else `/etc/cachewire.toml` if it exists
//! 4. Hard-wired defaults
//!
//! Run `cachewire --show-config` to see the result, and where each value came from.
//!
//! ## File format
//!
//! Configuration files are [TOML](https://toml.io/). Field names are `snake_case`.
//!
//! ```toml
//! listen = "127.0.0.1"
//! port = 8126
//! engine = "fs"
//! cache_dir = "/var/cache/cachewire"
//! time_format = "utc"
//! ```
//!
//! ## Configurable options
//!
//! The set of supported fields is the [Configuration] structure.

use std::path::PathBuf;

mod manager;
pub use manager::{ENV_PREFIX, Manager, SYSTEM_CONFIG_FILE};

pub(crate) mod structure;
pub use structure::{Configuration, ConfigurationOverrides, DEFAULT_PORT};

mod prettyprint;
pub use prettyprint::DisplayAdapter;

/// Problems with the configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A source could not be parsed, or a value had the wrong type
    #[error(transparent)]
    Figment(#[from] figment::Error),
    /// A configuration file named on the command line does not exist
    #[error("configuration file {0:?} not found")]
    MissingFile(PathBuf),
    /// The merged configuration makes no sense
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
