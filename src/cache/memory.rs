//! In-memory storage engine

use std::collections::HashMap;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWrite;
use tracing::trace;

use super::{Blob, CacheEngine, EngineError, PutSink, Transaction};
use crate::protocol::codec::{AssetKind, BlobId};

type Store = HashMap<(AssetKind, BlobId), Bytes>;

/// Keeps blobs in a hash map. Contents do not survive the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryCache {
    store: Arc<Mutex<Store>>,
}

impl MemoryCache {
    /// Constructor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a blob directly, bypassing the transaction machinery
    pub fn insert(&self, kind: AssetKind, id: BlobId, data: impl Into<Bytes>) {
        let _ = lock(&self.store).insert((kind, id), data.into());
    }

    /// Reads a blob directly
    #[must_use]
    pub fn get(&self, kind: AssetKind, id: BlobId) -> Option<Bytes> {
        lock(&self.store).get(&(kind, id)).cloned()
    }

    /// Number of stored blobs
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.store).len()
    }

    /// Is the store empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.store).is_empty()
    }
}

// A panic while holding the lock cannot leave the map half-updated, so poisoning is ignored.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl CacheEngine for MemoryCache {
    async fn lookup(&self, kind: AssetKind, id: BlobId) -> Result<Option<Blob>, EngineError> {
        Ok(self.get(kind, id).map(|data| Blob {
            size: data.len() as u64,
            reader: Box::new(Cursor::new(data)),
        }))
    }

    async fn create_transaction(&self, id: BlobId) -> Result<Box<dyn Transaction>, EngineError> {
        Ok(Box::new(MemoryTransaction {
            id,
            store: self.store.clone(),
            puts: Vec::new(),
        }))
    }

    async fn integrity_scan(&self, _repair: bool) -> Result<u64, EngineError> {
        // Nothing in memory can rot.
        Ok(0)
    }
}

#[derive(Debug)]
struct PendingPut {
    kind: AssetKind,
    declared: u64,
    data: Arc<Mutex<BytesMut>>,
}

#[derive(Debug)]
struct MemoryTransaction {
    id: BlobId,
    store: Arc<Mutex<Store>>,
    puts: Vec<PendingPut>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn id(&self) -> BlobId {
        self.id
    }

    async fn write_sink(&mut self, kind: AssetKind, size: u64) -> Result<PutSink, EngineError> {
        let data = Arc::new(Mutex::new(BytesMut::new()));
        // A repeated put of the same kind replaces the earlier one.
        self.puts.retain(|p| p.kind != kind);
        self.puts.push(PendingPut {
            kind,
            declared: size,
            data: data.clone(),
        });
        Ok(Box::new(MemorySink {
            id: self.id,
            kind,
            declared: size,
            data,
        }))
    }

    async fn commit(self: Box<Self>) -> Result<(), EngineError> {
        let mut staged = Vec::with_capacity(self.puts.len());
        for put in &self.puts {
            let data = lock(&put.data).clone().freeze();
            let received = data.len() as u64;
            if received != put.declared {
                return Err(EngineError::IncompletePut {
                    id: self.id,
                    kind: put.kind,
                    declared: put.declared,
                    received,
                });
            }
            staged.push(((put.kind, self.id), data));
        }
        trace!("committing {} blob(s) for {}", staged.len(), self.id);
        lock(&self.store).extend(staged);
        Ok(())
    }
}

/// Accumulates one put body
struct MemorySink {
    id: BlobId,
    kind: AssetKind,
    declared: u64,
    data: Arc<Mutex<BytesMut>>,
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut data = lock(&self.data);
        if (data.len() + buf.len()) as u64 > self.declared {
            let e = EngineError::PutOverrun {
                id: self.id,
                kind: self.kind,
                declared: self.declared,
            };
            return Poll::Ready(Err(std::io::Error::other(e)));
        }
        data.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod test {
    use super::MemoryCache;
    use crate::cache::{CacheEngine as _, EngineError};
    use crate::protocol::codec::{AssetKind, BlobId};

    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    fn id() -> BlobId {
        BlobId::new([1; 16], [2; 16])
    }

    #[tokio::test]
    async fn miss() {
        let cache = MemoryCache::new();
        assert!(cache.lookup(AssetKind::Asset, id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_lookup() {
        let cache = MemoryCache::new();
        let mut txn = cache.create_transaction(id()).await.unwrap();
        let mut sink = txn.write_sink(AssetKind::Info, 5).await.unwrap();
        sink.write_all(b"hello").await.unwrap();
        sink.shutdown().await.unwrap();
        // not visible until committed
        assert!(cache.is_empty());
        cache.finalize_transaction(txn).await.unwrap();

        let blob = cache.lookup(AssetKind::Info, id()).await.unwrap().unwrap();
        assert_eq!(blob.size, 5);
        let mut readback = Vec::new();
        let _ = blob.reader.take(5).read_to_end(&mut readback).await.unwrap();
        assert_eq!(readback, b"hello");
        assert!(cache.lookup(AssetKind::Asset, id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn incomplete_put_fails_commit() {
        let cache = MemoryCache::new();
        let mut txn = cache.create_transaction(id()).await.unwrap();
        let mut sink = txn.write_sink(AssetKind::Asset, 5).await.unwrap();
        sink.write_all(b"hel").await.unwrap();
        let err = cache.finalize_transaction(txn).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::IncompletePut {
                declared: 5,
                received: 3,
                ..
            }
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn overrun_is_refused() {
        let cache = MemoryCache::new();
        let mut txn = cache.create_transaction(id()).await.unwrap();
        let mut sink = txn.write_sink(AssetKind::Asset, 2).await.unwrap();
        assert!(sink.write_all(b"abc").await.is_err());
    }

    #[tokio::test]
    async fn integrity_is_clean() {
        assert_eq!(MemoryCache::new().integrity_scan(true).await.unwrap(), 0);
    }
}
