//! Protocol-level failures

use std::fmt::Display;

/// The raw command code from a frame, kept for diagnostics
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RawCode(Vec<u8>);

impl RawCode {
    /// Constructor
    #[must_use]
    pub fn new(code: &[u8]) -> Self {
        Self(code.to_vec())
    }

    /// The code as received
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for RawCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", self.0.escape_ascii())
    }
}

/// Errors raised while decoding or dispatching client input.
///
/// Every one of these is fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The handshake carried a version we don't speak
    #[error("protocol version mismatch: client sent {received}, server speaks {expected}")]
    VersionMismatch {
        /// What the client sent
        received: u32,
        /// What we wanted
        expected: u32,
    },
    /// The command code is not one we know
    #[error("unrecognized command {0}")]
    UnrecognizedCommand(RawCode),
    /// The command code is known but the frame's length does not fit it
    #[error("malformed frame for command {code} ({trailing} trailing bytes)")]
    MalformedFrame {
        /// The command code
        code: RawCode,
        /// Bytes following the command code
        trailing: usize,
    },
    /// `ts` while a transaction was already open
    #[error("a transaction is already in progress")]
    AlreadyInTransaction,
    /// `te` or a put without an open transaction
    #[error("no transaction is in progress")]
    NoActiveTransaction,
}
