//! Command Line Interface for cachewire
pub(crate) mod args;
mod cli_main;
pub mod styles;
pub use cli_main::cli;
