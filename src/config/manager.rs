//! Configuration source wrangling

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format as _, Serialized, Toml};
use figment::{Figment, Provider};
use serde::Deserialize;
use tracing::debug;

use super::{ConfigError, Configuration, ConfigurationOverrides};

/// System-wide configuration file, read if present
pub const SYSTEM_CONFIG_FILE: &str = "/etc/cachewire.toml";

/// Prefix of environment variables that set configuration fields
pub const ENV_PREFIX: &str = "CACHEWIRE_";

/// Processes and merges all possible configuration sources.
#[derive(Debug)]
pub struct Manager {
    /// Configuration data
    pub(super) data: Figment,
}

impl Manager {
    /// Constructor. System defaults are always applied.
    pub(super) fn new(apply_env: bool, config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut new1 = Self {
            data: Figment::new(),
        };
        new1.apply_system_default();
        match config_file {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::MissingFile(path.to_path_buf()));
                }
                new1.merge_file(path);
            }
            None => {
                let path = Path::new(SYSTEM_CONFIG_FILE);
                if path.exists() {
                    new1.merge_file(path);
                } else {
                    debug!("system configuration file {path:?} not present");
                }
            }
        }
        if apply_env {
            new1.merge_provider(Env::prefixed(ENV_PREFIX));
        }
        Ok(new1)
    }

    /// General constructor for production use.
    ///
    /// Reads the given configuration file if there is one, or the system file if not;
    /// then applies the environment.
    pub fn standard(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::new(true, config_file)
    }

    /// Testing constructor: system defaults only
    #[cfg(test)]
    #[must_use]
    pub(crate) fn without_files() -> Self {
        let mut new1 = Self {
            data: Figment::new(),
        };
        new1.apply_system_default();
        new1
    }

    /// Merges in a data set, which is some sort of [figment::Provider](https://docs.rs/figment/latest/figment/trait.Provider.html).
    /// This uses figment's `merge` operation, which prefers to _replace_ existing items.
    pub fn merge_provider<T>(&mut self, provider: T)
    where
        T: Provider,
    {
        let f = std::mem::take(&mut self.data);
        self.data = f.merge(provider); // in the error case, this leaves the provider in a fused state
    }

    /// Merges in a TOML configuration file
    pub fn merge_file<F>(&mut self, file: F)
    where
        F: AsRef<Path>,
    {
        debug!("reading configuration from {:?}", file.as_ref());
        self.merge_provider(Toml::file(file.as_ref()));
    }

    /// Merges in command-line overrides. These take priority over everything else.
    pub fn merge_overrides(&mut self, overrides: &ConfigurationOverrides) {
        self.merge_provider(Serialized::defaults(overrides));
    }

    /// Applies the system default settings, at a lower priority than everything else
    pub fn apply_system_default(&mut self) {
        let f = std::mem::take(&mut self.data);
        self.data = f.join(Serialized::defaults(Configuration::system_default()));
    }

    /// Attempts to extract a particular struct from the data.
    ///
    /// `T` is usually [Configuration], but it isn't intrinsically required to be.
    pub fn get<'de, T>(&self) -> Result<T, ConfigError>
    where
        T: Deserialize<'de>,
    {
        self.data.extract::<T>().map_err(ConfigError::from)
    }

    /// Extracts and validates a [`Configuration`]
    pub fn configuration(&self) -> Result<Configuration, ConfigError> {
        self.get::<Configuration>()?.validate()
    }

    /// The configuration files that would be considered, in priority order
    #[must_use]
    pub fn config_files(explicit: Option<&Path>) -> Vec<PathBuf> {
        vec![explicit.map_or_else(|| PathBuf::from(SYSTEM_CONFIG_FILE), Path::to_path_buf)]
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::io::Write as _;
    use std::net::{IpAddr, Ipv6Addr};
    use std::path::Path;

    use super::Manager;
    use crate::cache::EngineKind;
    use crate::config::{ConfigError, Configuration, ConfigurationOverrides};
    use crate::util::TimeFormat;

    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults() {
        let mgr = Manager::without_files();
        let result = mgr.get::<Configuration>().unwrap();
        assert_eq!(*Configuration::system_default(), result);
    }

    #[test]
    fn overrides_win() {
        let file = toml_file("port = 9000\nengine = \"memory\"\n");
        let mut mgr = Manager::new(false, Some(file.path())).unwrap();
        mgr.merge_overrides(&ConfigurationOverrides {
            port: Some(9100),
            listen: Some(IpAddr::V6(Ipv6Addr::LOCALHOST)),
            ..Default::default()
        });
        let cfg = mgr.configuration().unwrap();
        assert_eq!(
            cfg,
            Configuration {
                listen: IpAddr::V6(Ipv6Addr::LOCALHOST),
                port: 9100,
                engine: EngineKind::Memory,
                ..Configuration::system_default().clone()
            }
        );
    }

    #[test]
    fn file_fields() {
        let file = toml_file(
            r#"
            cache_dir = "/srv/cache"
            time_format = "UTC"
            "#,
        );
        let mgr = Manager::new(false, Some(file.path())).unwrap();
        let cfg = mgr.configuration().unwrap();
        assert_eq!(cfg.cache_dir.to_str(), Some("/srv/cache"));
        assert_eq!(cfg.time_format, TimeFormat::Utc);
        assert_eq!(cfg.port, Configuration::system_default().port);
    }

    #[test]
    fn missing_explicit_file() {
        let err = Manager::new(false, Some(Path::new("/nonexistent/cachewire.toml")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile(_)));
    }

    #[test]
    fn type_error() {
        #[derive(Deserialize)]
        struct Test {
            magic: i32,
        }
        let file = toml_file("port = \"eighty\"\nmagic = 42\n");
        let mgr = Manager::new(false, Some(file.path())).unwrap();
        // The file merges, but the struct cannot be extracted
        let err = mgr.get::<Configuration>().unwrap_err();
        assert!(matches!(err, ConfigError::Figment(_)));
        // Other things still can be
        assert_eq!(mgr.get::<Test>().unwrap().magic, 42);
    }

    #[test]
    fn invalid_value() {
        let file = toml_file("port = 0\n");
        let mgr = Manager::new(false, Some(file.path())).unwrap();
        assert!(matches!(
            mgr.configuration().unwrap_err(),
            ConfigError::Invalid(_)
        ));
    }

    #[test]
    fn environment() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CACHEWIRE_PORT", "9999");
            jail.set_env("CACHEWIRE_ENGINE", "memory");
            let cfg = Manager::new(true, None)
                .and_then(|mgr| mgr.configuration())
                .map_err(|e| e.to_string())?;
            assert_eq!(cfg.port, 9999);
            assert_eq!(cfg.engine, EngineKind::Memory);
            Ok(())
        });
    }
}
