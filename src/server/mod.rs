//! Server event loop

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{Instrument as _, debug, error, info, trace, trace_span, warn};

use crate::cache::{CacheEngine, EngineError, open_engine};
use crate::config::Configuration;
use crate::protocol::ProtocolError;
use crate::protocol::common::SendReceivePair;

mod connection;
mod send_queue;
mod session;

use connection::handle_connection;

/// Reasons a connection ends abnormally. Every one of these is fatal to its connection.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The client broke the protocol
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The storage engine failed
    #[error("storage engine: {0}")]
    Engine(#[from] EngineError),
    /// The connection itself failed
    #[error("connection: {0}")]
    Io(#[from] std::io::Error),
    /// The send queue worker has already exited
    #[error("send queue closed")]
    SendQueueClosed,
    /// The send queue worker panicked or was aborted
    #[error("send queue worker: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Server entrypoint: opens the configured engine and serves until Ctrl-C.
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) async fn server_main(config: &Configuration) -> anyhow::Result<()> {
    let engine = open_engine(config.engine, &config.cache_dir)
        .await
        .with_context(|| format!("opening {} cache", config.engine))?;
    let listener = TcpListener::bind((config.listen, config.port))
        .await
        .with_context(|| format!("binding to {}:{}", config.listen, config.port))?;
    info!(
        "listening on {}, {} engine",
        listener.local_addr()?,
        config.engine
    );
    serve(listener, engine, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("unable to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
        info!("shutting down");
    })
    .await
}

/// Accepts connections until `shutdown` completes, then waits for open connections to finish.
///
/// Each connection runs on its own task. Failure of a connection does not affect the others.
pub async fn serve<F>(
    listener: TcpListener,
    engine: Arc<dyn CacheEngine>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let mut tasks = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(a) => a,
                Err(e) => {
                    // Typically resource exhaustion; keep serving the connections we have.
                    warn!("accept failed: {e}");
                    continue;
                }
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!("connection task failed: {e}");
                }
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("{peer}: unable to set TCP_NODELAY: {e}");
        }
        let engine = engine.clone();
        let _ = tasks.spawn(
            async move {
                debug!("accepted connection");
                let (recv, send) = stream.into_split();
                let sp = SendReceivePair::from((send, recv));
                match handle_connection(sp, engine).await {
                    Ok(stats) => trace!("closed cleanly: {stats:?}"),
                    Err(e) => debug!("closed with error: {e}"),
                }
            }
            .instrument(connection_span(peer)),
        );
    }

    trace!("waiting for {} connection(s) to finish", tasks.len());
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("connection task failed: {e}");
        }
    }
    Ok(())
}

fn connection_span(peer: SocketAddr) -> tracing::Span {
    trace_span!("conn", %peer)
}
