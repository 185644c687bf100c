//! On-disk storage engine
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/
//!     .staging/                          open transactions
//!         <guid>-<hash>-<pid>-<n>/
//!             bin | info | resource      put bodies in progress
//!     ab/                                first two hex digits of the GUID
//!         ab12…-cd34….bin                committed blobs, `<guid>-<hash>.<type>`
//! ```
//!
//! Puts are written into the transaction's staging directory and renamed into place on commit,
//! so readers never see a partially written blob.
//! A commit publishes all of a transaction's blobs or none of them: if one cannot be moved
//! into place, those already moved are taken back out and any versions they replaced restored.

use std::collections::HashSet;
use std::fs::FileType;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, trace, warn};

use super::{Blob, CacheEngine, EngineError, PutSink, Transaction};
use crate::protocol::codec::{AssetKind, BlobId, GUID_SIZE, HASH_SIZE};

const STAGING_DIR: &str = ".staging";

fn extension(kind: AssetKind) -> &'static str {
    match kind {
        AssetKind::Asset => "bin",
        AssetKind::Info => "info",
        AssetKind::Resource => "resource",
    }
}

fn kind_from_extension(ext: &str) -> Option<AssetKind> {
    match ext {
        "bin" => Some(AssetKind::Asset),
        "info" => Some(AssetKind::Info),
        "resource" => Some(AssetKind::Resource),
        _ => None,
    }
}

fn blob_file_name(kind: AssetKind, id: &BlobId) -> String {
    format!("{id}.{}", extension(kind))
}

/// Parses a committed blob's file name. Only the canonical (lower-case) form is accepted.
fn parse_blob_file_name(name: &str) -> Option<(AssetKind, BlobId)> {
    let (stem, ext) = name.split_once('.')?;
    let kind = kind_from_extension(ext)?;
    let (guid_hex, hash_hex) = stem.split_once('-')?;
    let mut guid = [0u8; GUID_SIZE];
    let mut hash = [0u8; HASH_SIZE];
    hex::decode_to_slice(guid_hex, &mut guid).ok()?;
    hex::decode_to_slice(hash_hex, &mut hash).ok()?;
    let id = BlobId::new(guid, hash);
    (blob_file_name(kind, &id) == name).then_some((kind, id))
}

fn is_shard_name(name: &str) -> bool {
    name.len() == 2
        && name
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

async fn remove_entry(path: &Path, file_type: FileType) -> std::io::Result<()> {
    if file_type.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    }
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    staging: PathBuf,
    next_transaction: AtomicU64,
    /// Staging directories of transactions which are still open
    active: Mutex<HashSet<PathBuf>>,
}

impl Inner {
    fn active(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn blob_path(&self, kind: AssetKind, id: &BlobId) -> PathBuf {
        let guid = id.guid_hex();
        self.root.join(&guid[..2]).join(blob_file_name(kind, id))
    }
}

/// Keeps blobs in a directory tree
#[derive(Debug, Clone)]
pub struct FsCache {
    inner: Arc<Inner>,
}

impl FsCache {
    /// Opens (creating if necessary) a cache rooted at the given directory
    pub async fn open(root: &Path) -> Result<Self, EngineError> {
        let staging = root.join(STAGING_DIR);
        fs::create_dir_all(&staging).await?;
        debug!("opened filesystem cache at {}", root.display());
        Ok(Self {
            inner: Arc::new(Inner {
                root: root.to_path_buf(),
                staging,
                next_transaction: AtomicU64::new(0),
                active: Mutex::default(),
            }),
        })
    }

    /// Cache root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    async fn scan_shard(&self, shard: &str, dir: &Path, repair: bool) -> std::io::Result<u64> {
        let mut errors = 0;
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let name = entry.file_name();
            let valid = file_type.is_file()
                && name
                    .to_str()
                    .and_then(parse_blob_file_name)
                    .is_some_and(|(_, id)| id.guid_hex().starts_with(shard));
            if !valid {
                warn!("integrity: unexpected entry {}", entry.path().display());
                errors += 1;
                if repair {
                    remove_entry(&entry.path(), file_type).await?;
                }
            }
        }
        Ok(errors)
    }

    async fn scan_staging(&self, repair: bool) -> std::io::Result<u64> {
        let mut errors = 0;
        let mut entries = fs::read_dir(&self.inner.staging).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if self.inner.active().contains(&path) {
                continue;
            }
            warn!("integrity: abandoned transaction {}", path.display());
            errors += 1;
            if repair {
                remove_entry(&path, entry.file_type().await?).await?;
            }
        }
        Ok(errors)
    }
}

#[async_trait]
impl CacheEngine for FsCache {
    async fn lookup(&self, kind: AssetKind, id: BlobId) -> Result<Option<Blob>, EngineError> {
        let path = self.inner.blob_path(kind, &id);
        let file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        Ok(Some(Blob {
            size,
            reader: Box::new(file),
        }))
    }

    async fn create_transaction(&self, id: BlobId) -> Result<Box<dyn Transaction>, EngineError> {
        let n = self.inner.next_transaction.fetch_add(1, Ordering::Relaxed);
        let dir = self
            .inner
            .staging
            .join(format!("{id}-{}-{n}", std::process::id()));
        fs::create_dir_all(&dir).await?;
        let _ = self.inner.active().insert(dir.clone());
        trace!("staging {id} in {}", dir.display());
        Ok(Box::new(FsTransaction {
            id,
            dir,
            cache: self.inner.clone(),
            puts: Vec::new(),
        }))
    }

    async fn integrity_scan(&self, repair: bool) -> Result<u64, EngineError> {
        let mut errors = 0;
        let mut entries = fs::read_dir(&self.inner.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let name = entry.file_name();
            match name.to_str() {
                Some(STAGING_DIR) if file_type.is_dir() => {
                    errors += self.scan_staging(repair).await?;
                }
                Some(shard) if file_type.is_dir() && is_shard_name(shard) => {
                    errors += self.scan_shard(shard, &entry.path(), repair).await?;
                }
                _ => {
                    warn!("integrity: unexpected entry {}", entry.path().display());
                    errors += 1;
                    if repair {
                        remove_entry(&entry.path(), file_type).await?;
                    }
                }
            }
        }
        debug!("integrity scan found {errors} problem(s) (repair={repair})");
        Ok(errors)
    }
}

#[derive(Debug)]
struct StagedPut {
    kind: AssetKind,
    declared: u64,
    path: PathBuf,
}

/// A blob moved into place by a commit that has not yet completed
#[derive(Debug)]
struct Published {
    staged: PathBuf,
    dest: PathBuf,
    /// Hard link to the version this one replaced
    previous: Option<PathBuf>,
}

impl Published {
    async fn undo(&self) {
        if let Err(e) = fs::rename(&self.dest, &self.staged).await {
            warn!("rollback: could not withdraw {}: {e}", self.dest.display());
            return;
        }
        if let Some(previous) = &self.previous {
            if let Err(e) = fs::rename(previous, &self.dest).await {
                warn!("rollback: could not restore {}: {e}", self.dest.display());
            }
        }
    }
}

#[derive(Debug)]
struct FsTransaction {
    id: BlobId,
    dir: PathBuf,
    cache: Arc<Inner>,
    puts: Vec<StagedPut>,
}

#[async_trait]
impl Transaction for FsTransaction {
    fn id(&self) -> BlobId {
        self.id
    }

    async fn write_sink(&mut self, kind: AssetKind, size: u64) -> Result<PutSink, EngineError> {
        let path = self.dir.join(extension(kind));
        let file = fs::File::create(&path).await?;
        self.puts.retain(|p| p.kind != kind);
        self.puts.push(StagedPut {
            kind,
            declared: size,
            path,
        });
        Ok(Box::new(file))
    }

    async fn commit(self: Box<Self>) -> Result<(), EngineError> {
        for put in &self.puts {
            let received = fs::metadata(&put.path).await?.len();
            if received < put.declared {
                return Err(EngineError::IncompletePut {
                    id: self.id,
                    kind: put.kind,
                    declared: put.declared,
                    received,
                });
            }
            if received > put.declared {
                return Err(EngineError::PutOverrun {
                    id: self.id,
                    kind: put.kind,
                    declared: put.declared,
                });
            }
        }
        let mut published = Vec::with_capacity(self.puts.len());
        for put in &self.puts {
            match self.publish(put).await {
                Ok(p) => published.push(p),
                Err(e) => {
                    warn!("commit of {} failed, rolling back: {e}", self.id);
                    for p in published.iter().rev() {
                        p.undo().await;
                    }
                    return Err(e.into());
                }
            }
        }
        for p in &published {
            trace!("committed {}", p.dest.display());
            if let Some(previous) = &p.previous {
                if let Err(e) = fs::remove_file(previous).await {
                    warn!("could not remove {}: {e}", previous.display());
                }
            }
        }
        if let Err(e) = fs::remove_dir(&self.dir).await {
            warn!("could not remove staging directory {}: {e}", self.dir.display());
        }
        Ok(())
    }
}

impl FsTransaction {
    /// Moves one staged put into place, keeping hold of whatever it replaces
    async fn publish(&self, put: &StagedPut) -> std::io::Result<Published> {
        let dest = self.cache.blob_path(put.kind, &self.id);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let backup = put.path.with_extension("previous");
        let previous = match fs::hard_link(&dest, &backup).await {
            Ok(()) => Some(backup),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        if let Err(e) = fs::rename(&put.path, &dest).await {
            if let Some(previous) = &previous {
                let _ = fs::remove_file(previous).await;
            }
            return Err(e);
        }
        Ok(Published {
            staged: put.path.clone(),
            dest,
            previous,
        })
    }
}

impl Drop for FsTransaction {
    fn drop(&mut self) {
        // Anything left behind in the staging directory is reported by the integrity scan.
        let _ = self.cache.active().remove(&self.dir);
    }
}

#[cfg(test)]
mod test {
    use super::{FsCache, STAGING_DIR, is_shard_name, parse_blob_file_name};
    use crate::cache::{CacheEngine as _, EngineError};
    use crate::protocol::codec::{AssetKind, BlobId};

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    fn id() -> BlobId {
        BlobId::new([0xab; 16], [0x01; 16])
    }

    async fn cache() -> (TempDir, FsCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCache::open(dir.path()).await.unwrap();
        (dir, cache)
    }

    async fn put(cache: &FsCache, kind: AssetKind, data: &[u8]) {
        let mut txn = cache.create_transaction(id()).await.unwrap();
        let mut sink = txn.write_sink(kind, data.len() as u64).await.unwrap();
        sink.write_all(data).await.unwrap();
        sink.shutdown().await.unwrap();
        cache.finalize_transaction(txn).await.unwrap();
    }

    #[test]
    fn file_names() {
        let name = "abababababababababababababababab-01010101010101010101010101010101.info";
        assert_eq!(parse_blob_file_name(name), Some((AssetKind::Info, id())));
        assert_eq!(parse_blob_file_name(&name.to_uppercase()), None);
        assert_eq!(parse_blob_file_name("abab-0101.info"), None);
        assert_eq!(
            parse_blob_file_name(
                "abababababababababababababababab-01010101010101010101010101010101.txt"
            ),
            None
        );
        assert!(is_shard_name("0f"));
        assert!(!is_shard_name("0F"));
        assert!(!is_shard_name("abc"));
    }

    #[tokio::test]
    async fn miss() {
        let (_dir, cache) = cache().await;
        assert!(cache.lookup(AssetKind::Asset, id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn round_trip() {
        let (dir, cache) = cache().await;
        put(&cache, AssetKind::Resource, b"some bytes").await;

        assert!(dir
            .path()
            .join("ab")
            .join(format!("{}.resource", id()))
            .is_file());
        let blob = cache
            .lookup(AssetKind::Resource, id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blob.size, 10);
        let mut readback = String::new();
        let _ = blob.reader.take(10).read_to_string(&mut readback).await.unwrap();
        assert_eq!(readback, "some bytes");

        // staging is tidied up
        assert_eq!(
            std::fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().count(),
            0
        );
    }

    #[tokio::test]
    async fn short_put_is_not_published() {
        let (_dir, cache) = cache().await;
        let mut txn = cache.create_transaction(id()).await.unwrap();
        let mut sink = txn.write_sink(AssetKind::Asset, 4).await.unwrap();
        sink.write_all(b"ab").await.unwrap();
        sink.shutdown().await.unwrap();
        let e = cache.finalize_transaction(txn).await.unwrap_err();
        assert!(matches!(
            e,
            EngineError::IncompletePut {
                declared: 4,
                received: 2,
                ..
            }
        ));
        assert!(cache.lookup(AssetKind::Asset, id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_commit_publishes_nothing() {
        let (dir, cache) = cache().await;
        put(&cache, AssetKind::Asset, b"old").await;
        // something in the way of the info blob
        let blocker = dir.path().join("ab").join(format!("{}.info", id()));
        std::fs::create_dir_all(blocker.join("x")).unwrap();

        let mut txn = cache.create_transaction(id()).await.unwrap();
        let puts: [(AssetKind, &[u8]); 2] = [(AssetKind::Asset, b"new"), (AssetKind::Info, b"meta")];
        for (kind, data) in puts {
            let mut sink = txn.write_sink(kind, data.len() as u64).await.unwrap();
            sink.write_all(data).await.unwrap();
            sink.shutdown().await.unwrap();
        }
        let e = cache.finalize_transaction(txn).await.unwrap_err();
        assert!(matches!(e, EngineError::Io(_)));

        // the earlier version is back in place
        let blob = cache.lookup(AssetKind::Asset, id()).await.unwrap().unwrap();
        let mut readback = Vec::new();
        let _ = blob.reader.take(10).read_to_end(&mut readback).await.unwrap();
        assert_eq!(readback, b"old");
        assert!(blocker.is_dir());
    }

    #[tokio::test]
    async fn commit_replaces_previous_version() {
        let (dir, cache) = cache().await;
        put(&cache, AssetKind::Asset, b"old").await;
        put(&cache, AssetKind::Asset, b"newer").await;
        let blob = cache.lookup(AssetKind::Asset, id()).await.unwrap().unwrap();
        assert_eq!(blob.size, 5);
        assert_eq!(
            std::fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().count(),
            0
        );
    }

    #[tokio::test]
    async fn clean_cache_passes_integrity() {
        let (_dir, cache) = cache().await;
        put(&cache, AssetKind::Asset, b"x").await;
        assert_eq!(cache.integrity_scan(false).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn open_transaction_is_not_an_error() {
        let (_dir, cache) = cache().await;
        let _txn = cache.create_transaction(id()).await.unwrap();
        assert_eq!(cache.integrity_scan(true).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn integrity_verify_then_fix() {
        let (dir, cache) = cache().await;
        put(&cache, AssetKind::Asset, b"x").await;
        std::fs::write(dir.path().join("stray.txt"), b"junk").unwrap();
        std::fs::write(dir.path().join("ab").join("garbage"), b"junk").unwrap();
        {
            // abandoned transaction
            let mut txn = cache.create_transaction(id()).await.unwrap();
            let _sink = txn.write_sink(AssetKind::Info, 3).await.unwrap();
        }

        assert_eq!(cache.integrity_scan(false).await.unwrap(), 3);
        // verify-only changes nothing
        assert_eq!(cache.integrity_scan(false).await.unwrap(), 3);
        assert_eq!(cache.integrity_scan(true).await.unwrap(), 3);
        assert_eq!(cache.integrity_scan(false).await.unwrap(), 0);
        // the good blob survived
        assert!(cache.lookup(AssetKind::Asset, id()).await.unwrap().is_some());
    }
}
