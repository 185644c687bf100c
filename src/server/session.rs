//! Per-connection protocol state machine

use std::sync::Arc;

use bytes::{Buf as _, BytesMut};
use human_repr::HumanCount as _;
use tokio::io::AsyncWriteExt as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use super::SessionError;
use super::send_queue::{Outbound, SendQueue, SendTask};
use crate::cache::{CacheEngine, EngineError, PutSink, Transaction};
use crate::protocol::codec::{self, AssetKind, PROTOCOL_VERSION, VERSION_SIZE};
use crate::protocol::common::SendingStream;
use crate::protocol::{Command, ProtocolError, frame_length};

/// A put body in progress
struct PutStream {
    sink: PutSink,
    kind: AssetKind,
    declared: u64,
    written: u64,
}

impl std::fmt::Debug for PutStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutStream")
            .field("kind", &self.kind)
            .field("declared", &self.declared)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, strum::AsRefStr)]
enum State {
    /// Waiting for the client's protocol version
    Handshake,
    AwaitCommand,
    StreamingPutBody(PutStream),
    /// Absorbing. All further input is discarded.
    Terminated,
}

/// Protocol state for one connection.
///
/// Inbound bytes are handed to [`feed`](Self::feed) as they arrive; they need not be aligned
/// to frames. All output is produced through the connection's send queue, so it always
/// goes out in the order the requests were made.
#[derive(Debug)]
pub(crate) struct Session {
    state: State,
    transaction: Option<Box<dyn Transaction>>,
    engine: Arc<dyn CacheEngine>,
    queue: SendQueue,
}

impl Session {
    /// Creates a session writing its output to `writer`.
    ///
    /// `fatal` is cancelled if output fails asynchronously.
    pub(crate) fn new<W: SendingStream + 'static>(
        writer: W,
        engine: Arc<dyn CacheEngine>,
        fatal: CancellationToken,
    ) -> Self {
        let queue = SendQueue::spawn(writer, engine.clone(), fatal);
        Self {
            state: State::Handshake,
            transaction: None,
            engine,
            queue,
        }
    }

    /// Has this session stopped processing input?
    pub(crate) fn is_terminated(&self) -> bool {
        matches!(self.state, State::Terminated)
    }

    /// Consumes as much of `input` as possible.
    ///
    /// On return, `input` holds only an incomplete trailing frame (if any).
    /// Once the session has terminated, all input is discarded.
    ///
    /// # Errors
    /// Every error is connection-fatal; the caller should [`terminate`](Self::terminate).
    pub(crate) async fn feed(&mut self, input: &mut BytesMut) -> Result<(), SessionError> {
        while self.step(input).await? {}
        Ok(())
    }

    /// Processes at most one unit of work.
    /// Returns false if more input is needed.
    async fn step(&mut self, input: &mut BytesMut) -> Result<bool, SessionError> {
        match &mut self.state {
            State::Terminated => {
                input.clear();
                Ok(false)
            }
            State::Handshake => {
                if input.len() < VERSION_SIZE {
                    return Ok(false);
                }
                let echo = input.split_to(VERSION_SIZE).freeze();
                let received = echo.clone().get_u32();
                self.queue.push(Outbound::Raw(echo)).await?;
                if received != PROTOCOL_VERSION {
                    // The echo must reach the client before we hang up
                    self.queue.sync().await?;
                    return Err(ProtocolError::VersionMismatch {
                        received,
                        expected: PROTOCOL_VERSION,
                    }
                    .into());
                }
                debug!("client protocol version {received}");
                self.state = State::AwaitCommand;
                Ok(true)
            }
            State::AwaitCommand => {
                let Some(len) = frame_length(input)? else {
                    return Ok(false);
                };
                let frame = input.split_to(len);
                if let Some(command) = Command::decode(&frame)? {
                    self.dispatch(command).await?;
                }
                Ok(true)
            }
            State::StreamingPutBody(put) => {
                if input.is_empty() {
                    return Ok(false);
                }
                let remaining = put.declared - put.written;
                // Never forward past the declared size; what follows is the next frame.
                let n = usize::try_from(remaining).map_or(input.len(), |r| r.min(input.len()));
                let chunk = input.split_to(n);
                put.sink
                    .write_all(&chunk)
                    .await
                    .map_err(EngineError::from)?;
                put.written += n as u64;
                if put.written == put.declared {
                    put.sink.shutdown().await.map_err(EngineError::from)?;
                    trace!(
                        "{} put complete, {}",
                        put.kind,
                        put.declared.human_count_bytes()
                    );
                    self.state = State::AwaitCommand;
                }
                Ok(true)
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<(), SessionError> {
        trace!("{command:?}");
        match command {
            Command::Quit => {
                debug!("client quit");
                self.terminate(None);
            }
            Command::Get { kind, id } => {
                self.queue
                    .push(Outbound::Blob(SendTask { kind, id }))
                    .await?;
            }
            Command::TransactionStart(id) => {
                if let Some(active) = &self.transaction {
                    trace!("transaction already open for {}", active.id());
                    return Err(ProtocolError::AlreadyInTransaction.into());
                }
                let txn = self.engine.create_transaction(id).await?;
                debug!("transaction started for {id}");
                self.transaction = Some(txn);
            }
            Command::TransactionEnd => {
                // The slot is cleared even if finalize fails. That failure ends the connection anyway.
                let txn = self
                    .transaction
                    .take()
                    .ok_or(ProtocolError::NoActiveTransaction)?;
                let id = txn.id();
                self.engine.finalize_transaction(txn).await?;
                debug!("transaction committed for {id}");
            }
            Command::Put { kind, size } => {
                let txn = self
                    .transaction
                    .as_mut()
                    .ok_or(ProtocolError::NoActiveTransaction)?;
                let mut sink = txn.write_sink(kind, size).await?;
                if size == 0 {
                    sink.shutdown().await.map_err(EngineError::from)?;
                } else {
                    self.state = State::StreamingPutBody(PutStream {
                        sink,
                        kind,
                        declared: size,
                        written: 0,
                    });
                }
            }
            Command::IntegrityCheck { repair } => {
                let errors = self.engine.integrity_scan(repair).await?;
                debug!("integrity check (repair={repair}) found {errors} error(s)");
                self.queue
                    .push(Outbound::Raw(codec::encode_integrity_result(errors)))
                    .await?;
            }
        }
        Ok(())
    }

    /// Stops processing input.
    ///
    /// Get requests whose responses have not started are dropped.
    /// Responses already produced (the handshake echo, integrity results) are still sent.
    /// Any open transaction or put is abandoned.
    /// Calling this more than once has no further effect.
    pub(crate) fn terminate(&mut self, reason: Option<&SessionError>) {
        if self.is_terminated() {
            return;
        }
        if let Some(e) = reason {
            error!("{e}");
        }
        trace!("terminating from state {}", self.state.as_ref());
        self.queue.cancel();
        self.transaction = None;
        self.state = State::Terminated;
    }

    /// Waits for output to finish, then closes the outbound stream.
    ///
    /// Everything queued is sent, less any get requests dropped by [`terminate`](Self::terminate).
    pub(crate) async fn finish(self) -> Result<(), SessionError> {
        self.queue.finish().await
    }
}
