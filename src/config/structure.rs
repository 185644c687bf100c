//! Configuration structure

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use struct_field_names_as_array::FieldNamesAsSlice;

use super::ConfigError;
use crate::cache::EngineKind;
use crate::util::TimeFormat;

/// TCP port we listen on unless told otherwise
pub const DEFAULT_PORT: u16 = 8126;

/// The set of configurable options supported by cachewire.
///
/// In configuration files and environment variables, the field names are written in `snake_case`.
/// On the command line, they are kebab-case.
///
/// There is no `default()`.
/// The hard-wired defaults are available through [`Configuration::system_default()`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, FieldNamesAsSlice)]
pub struct Configuration {
    /// Address to listen on. [default: 0.0.0.0]
    pub listen: IpAddr,
    /// TCP port to listen on. [default: 8126]
    pub port: u16,
    /// Storage engine. [default: fs]
    pub engine: EngineKind,
    /// Root directory of the on-disk cache. Only used by the `fs` engine. [default: cache]
    pub cache_dir: PathBuf,
    /// Time format for log messages. [default: local]
    pub time_format: TimeFormat,
}

static SYSTEM_DEFAULT_CONFIG: LazyLock<Configuration> = LazyLock::new(|| Configuration {
    listen: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    port: DEFAULT_PORT,
    engine: EngineKind::Fs,
    cache_dir: PathBuf::from("cache"),
    time_format: TimeFormat::Local,
});

impl Configuration {
    /// Hard-wired configuration defaults
    #[must_use]
    pub fn system_default() -> &'static Self {
        &SYSTEM_DEFAULT_CONFIG
    }

    /// Checks the fields for consistency
    pub fn try_validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must not be 0".into()));
        }
        if self.engine == EngineKind::Fs && self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "cache_dir is required for the fs engine".into(),
            ));
        }
        Ok(())
    }

    /// Syntactic sugar for [`try_validate`](Self::try_validate)
    pub fn validate(self) -> Result<Self, ConfigError> {
        self.try_validate()?;
        Ok(self)
    }
}

/// Command-line overrides for [`Configuration`].
///
/// Every member is optional; where the user gives no value, lower-priority sources apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, clap::Args, Serialize)]
pub struct ConfigurationOverrides {
    /// Address to listen on [default: 0.0.0.0]
    #[arg(short('l'), long, value_name("addr"), help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<IpAddr>,

    /// TCP port to listen on [default: 8126]
    #[arg(short('p'), long, value_name("port"), help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Storage engine [default: fs]
    #[arg(short('e'), long, value_name("engine"), help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineKind>,

    /// Root directory of the on-disk cache [default: cache]
    #[arg(short('d'), long, value_name("dir"), help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Time format for log messages [default: local]
    #[arg(short('T'), long, value_name("format"), help_heading("Configuration"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_format: Option<TimeFormat>,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::path::PathBuf;

    use super::{Configuration, ConfigurationOverrides, SYSTEM_DEFAULT_CONFIG};
    use crate::cache::EngineKind;
    use crate::config::ConfigError;

    use assertables::assert_contains;
    use struct_field_names_as_array::FieldNamesAsSlice as _;

    #[test]
    fn defaults_are_valid() {
        assert!(SYSTEM_DEFAULT_CONFIG.try_validate().is_ok());
        assert_eq!(Configuration::system_default().port, 8126);
    }

    #[test]
    fn zero_port() {
        let cfg = Configuration {
            port: 0,
            ..SYSTEM_DEFAULT_CONFIG.clone()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_contains!(err.to_string(), "port");
    }

    #[test]
    fn fs_needs_dir() {
        let mut cfg = Configuration {
            cache_dir: PathBuf::new(),
            ..SYSTEM_DEFAULT_CONFIG.clone()
        };
        assert!(cfg.try_validate().is_err());
        cfg.engine = EngineKind::Memory;
        assert!(cfg.try_validate().is_ok());
    }

    #[test]
    fn overrides_cover_every_field() {
        let overrides = ConfigurationOverrides {
            listen: Some("::1".parse().unwrap()),
            port: Some(1),
            engine: Some(EngineKind::Memory),
            cache_dir: Some("x".into()),
            time_format: Some(crate::util::TimeFormat::Utc),
        };
        let value = figment::value::Value::serialize(&overrides).unwrap();
        let dict = value.into_dict().unwrap();
        let mut keys = dict.keys().map(String::as_str).collect::<Vec<_>>();
        keys.sort_unstable();
        let mut fields = Configuration::FIELD_NAMES_AS_SLICE.to_vec();
        fields.sort_unstable();
        assert_eq!(keys, fields);
    }

    #[test]
    fn empty_overrides_serialize_to_nothing() {
        let value = figment::value::Value::serialize(ConfigurationOverrides::default()).unwrap();
        assert!(value.into_dict().unwrap().is_empty());
    }
}
