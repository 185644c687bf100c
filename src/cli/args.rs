//! Command-line argument definitions

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

use crate::config::{ConfigurationOverrides, Manager};

/// Command-line arguments
#[derive(Debug, Parser, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
#[command(
    author,
    version(crate::version::short()),
    about,
    before_help = "cachewire: content-addressable blob cache server",
    infer_long_args(true),
    styles(super::styles::CLAP_STYLES)
)]
pub(crate) struct CliArgs {
    /// Enable detailed debug output
    ///
    /// This has the same effect as setting `RUST_LOG=cachewire=debug` in the environment.
    /// If present, `RUST_LOG` overrides this option.
    #[arg(short('D'), long, action, help_heading("Output"), display_order(0))]
    pub(crate) debug: bool,

    /// Quiet mode: reports only errors
    #[arg(short, long, action, conflicts_with("debug"), help_heading("Output"))]
    pub(crate) quiet: bool,

    /// Log to a file as well as to stderr
    ///
    /// By default the log receives everything printed to stderr.
    /// To override this behaviour, set the environment variable `RUST_LOG_FILE_DETAIL` (same semantics as `RUST_LOG`).
    #[arg(
        long,
        action,
        value_name("FILE"),
        help_heading("Output"),
        next_line_help(true)
    )]
    pub(crate) log_file: Option<PathBuf>,

    /// Read configuration from this file instead of the system default
    #[arg(
        short('c'),
        long,
        value_name("FILE"),
        help_heading("Configuration")
    )]
    pub(crate) config: Option<PathBuf>,

    /// Outputs the configuration, then exits
    #[arg(long, action, help_heading("Configuration"))]
    pub(crate) show_config: bool,

    /// Outputs the configuration file(s) that would be read, then exits
    #[arg(long, action, conflicts_with("show_config"), help_heading("Configuration"))]
    pub(crate) config_files: bool,

    #[command(flatten)]
    pub(crate) overrides: ConfigurationOverrides,
}

/// What the process is going to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MainMode {
    Serve,
    ShowConfig,
    ShowConfigFiles,
}

impl From<&CliArgs> for MainMode {
    fn from(args: &CliArgs) -> Self {
        if args.show_config {
            MainMode::ShowConfig
        } else if args.config_files {
            MainMode::ShowConfigFiles
        } else {
            MainMode::Serve
        }
    }
}

impl CliArgs {
    /// Parses the given arguments
    pub(crate) fn custom_parse<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args)
    }
}

impl TryFrom<&CliArgs> for Manager {
    type Error = crate::config::ConfigError;

    fn try_from(args: &CliArgs) -> Result<Self, Self::Error> {
        let mut mgr = Manager::standard(args.config.as_deref())?;
        mgr.merge_overrides(&args.overrides);
        Ok(mgr)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::net::{IpAddr, Ipv4Addr};

    use super::{CliArgs, MainMode};
    use crate::cache::EngineKind;
    use crate::util::TimeFormat;

    use clap::CommandFactory as _;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::custom_parse(std::iter::once("cachewire").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn clap_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn modes() {
        assert_eq!(MainMode::from(&parse(&[])), MainMode::Serve);
        assert_eq!(
            MainMode::from(&parse(&["--show-config"])),
            MainMode::ShowConfig
        );
        assert_eq!(
            MainMode::from(&parse(&["--config-files"])),
            MainMode::ShowConfigFiles
        );
    }

    #[test]
    fn overrides() {
        let args = parse(&[
            "--port",
            "9000",
            "--engine",
            "memory",
            "--listen",
            "127.0.0.1",
            "--time-format",
            "rfc3339",
        ]);
        assert_eq!(args.overrides.port, Some(9000));
        assert_eq!(args.overrides.engine, Some(EngineKind::Memory));
        assert_eq!(
            args.overrides.listen,
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        assert_eq!(args.overrides.time_format, Some(TimeFormat::Rfc3339));
        assert!(args.overrides.cache_dir.is_none());
    }

    #[test]
    fn debug_and_quiet_conflict() {
        assert!(CliArgs::custom_parse(["cachewire", "--debug", "--quiet"]).is_err());
    }
}
