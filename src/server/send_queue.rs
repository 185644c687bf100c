//! The outbound half of a connection
//!
//! A single worker task owns the connection's sending stream. Everything the
//! server says to a client, whether a fixed response or a streamed blob, is queued
//! here and written strictly in the order it was queued.
//! Get requests can therefore be decoded and queued long before their responses
//! are produced, without any risk of responses overtaking each other.
//!
//! The queue is bounded. When a client stops reading its responses, the worker
//! stalls on the socket, the queue fills, and the session stops decoding input.

use std::sync::Arc;

use bytes::Bytes;
use human_repr::HumanCount as _;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, Span, error, trace};

use super::SessionError;
use crate::cache::{CacheEngine, EngineError};
use crate::protocol::codec::{self, AssetKind, BlobId};
use crate::protocol::common::SendingStream;

/// Size of the buffer used when streaming blobs
pub(crate) const COPY_BUFFER_SIZE: usize = 65_536;

/// Maximum number of responses waiting to be sent on one connection
pub(crate) const QUEUE_CAPACITY: usize = 1024;

/// A pending get response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SendTask {
    pub(crate) kind: AssetKind,
    pub(crate) id: BlobId,
}

/// One unit of outbound work
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Bytes to send as-is
    Raw(Bytes),
    /// Look up a blob and send a hit or miss response
    Blob(SendTask),
    /// Flush, then report that everything queued before this point has been written
    Barrier(oneshot::Sender<()>),
}

/// Handle to the outbound worker
#[derive(Debug)]
pub(crate) struct SendQueue {
    tx: mpsc::Sender<Outbound>,
    /// Switches the worker to dropping get requests instead of serving them
    cancel: CancellationToken,
    worker: JoinHandle<Result<(), SessionError>>,
}

impl SendQueue {
    /// Starts the worker.
    ///
    /// If the worker fails, it cancels `fatal` and exits.
    pub(crate) fn spawn<W: SendingStream + 'static>(
        writer: W,
        engine: Arc<dyn CacheEngine>,
        fatal: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(
            run(rx, writer, engine, cancel.clone(), fatal).instrument(Span::current()),
        );
        Self { tx, cancel, worker }
    }

    /// Appends an item. This does not wait for it to be sent,
    /// but does wait for room in the queue.
    pub(crate) async fn push(&self, item: Outbound) -> Result<(), SessionError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| SessionError::SendQueueClosed)
    }

    /// Waits until everything queued so far has been written out.
    ///
    /// This is not affected by [`cancel`](Self::cancel) being called afterwards.
    pub(crate) async fn sync(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.push(Outbound::Barrier(tx)).await?;
        rx.await.map_err(|_| SessionError::SendQueueClosed)
    }

    /// Drops every get request not yet started, including any queued later.
    ///
    /// A get already being sent runs to completion.
    /// Fixed responses (raw bytes) are still written, in order.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the worker to finish whatever it is going to send, then closes the stream.
    ///
    /// Every queued item is sent first, apart from the get requests dropped by [`cancel`](Self::cancel).
    pub(crate) async fn finish(self) -> Result<(), SessionError> {
        drop(self.tx);
        self.worker.await?
    }
}

async fn run<W: SendingStream>(
    mut rx: mpsc::Receiver<Outbound>,
    mut writer: W,
    engine: Arc<dyn CacheEngine>,
    cancel: CancellationToken,
    fatal: CancellationToken,
) -> Result<(), SessionError> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut dropping_gets = false;
    loop {
        let item = if dropping_gets {
            rx.recv().await
        } else {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    trace!("send queue cancelled");
                    dropping_gets = true;
                    continue;
                }
                item = rx.recv() => item,
            }
        };
        let Some(item) = item else {
            break;
        };
        let result = match item {
            Outbound::Raw(bytes) => writer.write_all(&bytes).await.map_err(SessionError::from),
            Outbound::Blob(SendTask { kind, id }) if dropping_gets => {
                trace!("dropped get {kind} {id}");
                Ok(())
            }
            Outbound::Blob(task) => send_blob(&mut writer, &*engine, task, &mut buffer).await,
            Outbound::Barrier(done) => {
                let result = writer.flush().await;
                if result.is_ok() {
                    let _ = done.send(());
                }
                result.map_err(SessionError::from)
            }
        };
        let result = match result {
            Ok(()) if rx.is_empty() => writer.flush().await.map_err(SessionError::from),
            r => r,
        };
        if let Err(e) = result {
            error!("send failed: {e}");
            fatal.cancel();
            let _ = writer.shutdown().await;
            return Err(e);
        }
    }
    trace!("send queue finished");
    writer.shutdown().await?;
    Ok(())
}

async fn send_blob<W: SendingStream>(
    writer: &mut W,
    engine: &dyn CacheEngine,
    task: SendTask,
    buffer: &mut [u8],
) -> Result<(), SessionError> {
    let SendTask { kind, id } = task;
    let Some(blob) = engine.lookup(kind, id).await? else {
        trace!("miss {kind} {id}");
        writer.write_all(&codec::encode_miss(kind, &id)).await?;
        return Ok(());
    };
    trace!("hit {kind} {id}, {}", blob.size.human_count_bytes());
    writer
        .write_all(&codec::encode_hit(kind, blob.size, &id))
        .await?;

    let mut reader = blob.reader;
    let mut remaining = blob.size;
    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(buffer.len(), |r| r.min(buffer.len()));
        let n = reader
            .read(&mut buffer[..want])
            .await
            .map_err(EngineError::from)?;
        if n == 0 {
            return Err(EngineError::ShortRead {
                expected: blob.size,
                received: blob.size - remaining,
            }
            .into());
        }
        writer.write_all(&buffer[..n]).await?;
        remaining -= n as u64;
    }
    Ok(())
}
