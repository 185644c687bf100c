//! Stream typedefs shared by the server and its tests

use tokio::io::{AsyncRead, AsyncWrite};

/// Marker trait for streams used for sending data
pub trait SendingStream: AsyncWrite + Send + Unpin {}
impl SendingStream for tokio::net::tcp::OwnedWriteHalf {}
impl SendingStream for tokio::io::DuplexStream {}
impl SendingStream for tokio::io::WriteHalf<tokio::io::DuplexStream> {}

#[cfg(test)]
impl SendingStream for tokio_test::io::Mock {}

/// Marker trait for streams used for receiving data
pub trait ReceivingStream: AsyncRead + Send + Unpin {}
impl ReceivingStream for tokio::net::tcp::OwnedReadHalf {}
impl ReceivingStream for tokio::io::DuplexStream {}
impl ReceivingStream for tokio::io::ReadHalf<tokio::io::DuplexStream> {}

#[cfg(test)]
impl ReceivingStream for tokio_test::io::Mock {}

/// Syntactic sugar helper type
#[derive(Debug)]
pub struct SendReceivePair<S: SendingStream, R: ReceivingStream> {
    /// outbound data
    pub send: S,
    /// inbound data
    pub recv: R,
}

impl<S: SendingStream, R: ReceivingStream> From<(S, R)> for SendReceivePair<S, R> {
    fn from(value: (S, R)) -> Self {
        Self {
            send: value.0,
            recv: value.1,
        }
    }
}
