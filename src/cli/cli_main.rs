//! Main CLI for cachewire

use std::ffi::OsString;
use std::io::Write as _;
use std::process::ExitCode;

use super::args::{CliArgs, MainMode};
use super::styles::{ERROR, RESET, use_colours};
use crate::config::{Configuration, Manager};
use crate::util::{ConsoleTraceType, setup_tracing, trace_level, tracing_is_initialised};

use anyhow::{Context as _, Result};

/// Main CLI entrypoint
///
/// Call this from `main`, passing the arguments to use.
/// Normally you will call `cli(std::env::args_os())` but you can pass in alternate arguments for CLI testing.
///
/// # Safety
/// - This function may start a tokio runtime and perform work in it.
#[must_use]
pub fn cli<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match cli_inner(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if tracing_is_initialised() {
                tracing::error!("{e:#}");
            } else {
                anstream::eprintln!("{ERROR}Error:{RESET} {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn cli_inner<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    use clap::error::ErrorKind::{DisplayHelp, DisplayVersion};
    let args = match CliArgs::custom_parse(args) {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), DisplayHelp | DisplayVersion) => {
            let message = e.render();
            if use_colours() {
                anstream::println!("{}", message.ansi());
            } else {
                println!("{message}");
            }
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let manager = Manager::try_from(&args)?;
    match MainMode::from(&args) {
        MainMode::ShowConfigFiles => {
            for f in Manager::config_files(args.config.as_deref()) {
                println!("{}", f.display());
            }
            Ok(())
        }
        MainMode::ShowConfig => show_config(&manager),
        MainMode::Serve => {
            let config = manager.configuration()?;
            setup_tracing(
                trace_level(&args),
                ConsoleTraceType::Standard,
                args.log_file.as_deref(),
                config.time_format,
                use_colours(),
            )?; // to provoke error: set RUST_LOG=.
            run_server(&config)
        }
    }
}

fn show_config(manager: &Manager) -> Result<()> {
    let _ = writeln!(std::io::stdout(), "{}", show_config_data(manager));
    // Show the table even if it doesn't validate, so the user can see what is wrong
    let _ = manager.configuration()?;
    Ok(())
}

fn show_config_data(manager: &Manager) -> String {
    format!(
        "Configuration:\n{}",
        manager.to_display_adapter::<Configuration>()
    )
}

#[tokio::main]
#[cfg_attr(coverage_nightly, coverage(off))]
async fn run_server(config: &Configuration) -> Result<()> {
    crate::server::server_main(config)
        .await
        .context("server failed")
}
