//! Handler for a single client connection

use std::sync::Arc;

use bytes::BytesMut;
use human_repr::HumanCount as _;
use tokio::io::AsyncReadExt as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::SessionError;
use super::session::Session;
use crate::cache::CacheEngine;
use crate::protocol::common::{ReceivingStream, SendReceivePair, SendingStream};

/// Initial size of the inbound buffer
const READ_BUFFER_SIZE: usize = 65_536;

/// Per-connection statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConnectionStats {
    /// Bytes received from the client
    pub(crate) bytes_received: u64,
}

/// Runs the protocol over a connection until the client quits, disconnects or errors.
///
/// The outbound stream is closed on return.
pub(crate) async fn handle_connection<S, R>(
    sp: SendReceivePair<S, R>,
    engine: Arc<dyn CacheEngine>,
) -> Result<ConnectionStats, SessionError>
where
    S: SendingStream + 'static,
    R: ReceivingStream,
{
    let SendReceivePair { send, mut recv } = sp;
    let fatal = CancellationToken::new();
    let mut session = Session::new(send, engine, fatal.clone());
    let mut stats = ConnectionStats::default();
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);

    let result = loop {
        if session.is_terminated() {
            break Ok(());
        }
        let n = tokio::select! {
            () = fatal.cancelled() => {
                // the send queue has already logged its error
                trace!("output failed, abandoning connection");
                break Ok(());
            }
            n = recv.read_buf(&mut buffer) => match n {
                Ok(n) => n,
                Err(e) => break Err(SessionError::from(e)),
            },
        };
        if n == 0 {
            if !buffer.is_empty() {
                debug!("client hung up mid-frame, {} bytes unprocessed", buffer.len());
            }
            trace!("client closed connection");
            break Ok(());
        }
        stats.bytes_received += n as u64;
        if let Err(e) = session.feed(&mut buffer).await {
            break Err(e);
        }
    };

    if let Err(e) = &result {
        session.terminate(Some(e));
    }
    // Ignore input from here on; the outbound side drains (or not) and closes.
    drop(recv);
    let finished = session.finish().await;
    debug!(
        "connection finished, {} received",
        stats.bytes_received.human_count_bytes()
    );
    result.and(finished).map(|()| stats)
}
