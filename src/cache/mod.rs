//! Storage engines
//!
//! The protocol engine talks to storage only through [`CacheEngine`] and [`Transaction`].
//! Two engines are provided:
//! * [`FsCache`] keeps blobs in a directory tree
//! * [`MemoryCache`] keeps them in memory, which is mostly useful for testing
//!
//! Engines are shared by every connection, so must be safe against concurrent use.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol::codec::{AssetKind, BlobId};

mod fs;
mod memory;

pub use fs::FsCache;
pub use memory::MemoryCache;

/// Failures reported by a storage engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Underlying I/O failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A put was committed before all of its declared bytes arrived
    #[error("{kind} put for {id} is incomplete: received {received} of {declared} bytes")]
    IncompletePut {
        /// Which blob
        id: BlobId,
        /// Which sub-category
        kind: AssetKind,
        /// Size given in the put command
        declared: u64,
        /// Size actually received
        received: u64,
    },
    /// More bytes were written to a put sink than it was declared with
    #[error("{kind} put for {id} overran its declared size of {declared} bytes")]
    PutOverrun {
        /// Which blob
        id: BlobId,
        /// Which sub-category
        kind: AssetKind,
        /// Size given in the put command
        declared: u64,
    },
    /// A blob's stream ended before its advertised size
    #[error("blob stream ended early: expected {expected} bytes, got {received}")]
    ShortRead {
        /// Advertised size
        expected: u64,
        /// Bytes actually produced
        received: u64,
    },
}

/// A blob found by [`CacheEngine::lookup`]
pub struct Blob {
    /// Exact length of the blob
    pub size: u64,
    /// Produces the blob's bytes
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob").field("size", &self.size).finish_non_exhaustive()
    }
}

/// Destination for the body of one put.
///
/// The caller writes exactly the declared number of bytes, then calls `shutdown`.
pub type PutSink = Box<dyn AsyncWrite + Send + Unpin>;

/// An open write transaction, scoped to one (GUID, hash) pair
#[async_trait]
pub trait Transaction: Send + Debug {
    /// The pair this transaction writes
    fn id(&self) -> BlobId;

    /// Opens a sink for exactly `size` bytes of the given kind
    async fn write_sink(&mut self, kind: AssetKind, size: u64) -> Result<PutSink, EngineError>;

    /// Atomically publishes everything written to this transaction
    async fn commit(self: Box<Self>) -> Result<(), EngineError>;
}

/// The storage engine contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheEngine: Send + Sync {
    /// Finds a blob.
    ///
    /// # Return
    /// `Ok(None)` if there is no such blob.
    async fn lookup(&self, kind: AssetKind, id: BlobId) -> Result<Option<Blob>, EngineError>;

    /// Opens a transaction for the given pair
    async fn create_transaction(&self, id: BlobId) -> Result<Box<dyn Transaction>, EngineError>;

    /// Commits a transaction
    async fn finalize_transaction(&self, txn: Box<dyn Transaction>) -> Result<(), EngineError> {
        txn.commit().await
    }

    /// Checks the store for damage.
    ///
    /// # Return
    /// The number of problems found. If `repair` was set, they have been fixed.
    async fn integrity_scan(&self, repair: bool) -> Result<u64, EngineError>;
}

impl Debug for dyn CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn CacheEngine")
    }
}

/// Selects a storage engine
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
    clap::ValueEnum,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// On-disk, under `cache_dir`
    #[default]
    Fs,
    /// In memory; contents are lost on exit
    Memory,
}

/// Opens the configured storage engine
pub async fn open_engine(
    kind: EngineKind,
    cache_dir: &std::path::Path,
) -> Result<Arc<dyn CacheEngine>, EngineError> {
    Ok(match kind {
        EngineKind::Fs => Arc::new(FsCache::open(cache_dir).await?),
        EngineKind::Memory => Arc::new(MemoryCache::new()),
    })
}
