//! `cachewire` is a content-addressable blob cache server.
//!
//! Clients connect over TCP and fetch or store blobs named by a (GUID, content hash) pair.
//! Each blob comes in up to three flavours: the asset itself, its info (metadata) and an auxiliary resource.
//!
//! ## 📖 Documentation
//!
//! * [The wire protocol](protocol)
//! * [Configuring cachewire](config)
//! * [Storage engines](cache)
//!
//! ## Overview
//!
//! - Requests on a connection are pipelined. Get responses go out strictly in request order,
//!   however long each lookup takes.
//! - Puts are grouped into transactions which the storage engine commits atomically.
//! - Two storage engines are built in: an on-disk cache and a purely in-memory one.
//!
//! ## 🧰 Getting Started
//!
//! ```text
//! cachewire --cache-dir /var/cache/cachewire
//! ```
//!
//! The server listens on port 8126 by default. Run `cachewire --help` for the full list of options.
//!
//! ## Miscellanea
//!
//! #### MSRV policy
//!
//! As this is an application crate, the MSRV is not guaranteed to remain stable.
//! The MSRV may be upgraded from time to time to take advantage of new language features.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod cache;

pub(crate) mod cli;
pub use cli::cli as main;
pub use cli::styles;

pub mod config;
pub use config::Configuration;

pub mod protocol;

pub mod server;
pub use server::{SessionError, serve};

pub mod util;

mod version;
