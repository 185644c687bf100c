//! # 📖 The cachewire protocol
//!
//! Clients speak to the server over a single TCP connection.
//! All multi-byte integers are big-endian ("network order").
//!
//! ## Handshake
//!
//! * C ➡️ S: protocol version, 4 bytes
//! * S ➡️ C: the same 4 bytes, echoed back whether or not they match [`PROTOCOL_VERSION`](codec::PROTOCOL_VERSION)
//!
//! If the versions differ, the server closes the connection.
//!
//! ## Commands
//!
//! After the handshake the client sends a stream of command frames.
//! Frames carry no length prefix; the length of each is implied by its leading
//! command code (see [`command::frame_length`]).
//!
//! | Code | Command | Payload |
//! |------|---------|---------|
//! | `q` | quit | none |
//! | `ga` `gi` `gr` | get asset / info / resource | GUID (16), hash (16) |
//! | `ts` | transaction start | GUID (16), hash (16) |
//! | `te` | transaction end | none |
//! | `pa` `pi` `pr` | put asset / info / resource | size (8), then `size` raw bytes |
//! | `icf` `icv` | integrity check and fix / verify only | none |
//!
//! ### Get
//!
//! * S ➡️ C on a hit: `+` type, size (8), GUID, hash, then the blob bytes
//! * S ➡️ C on a miss: `-` type, GUID, hash
//!
//! Responses are not tagged; they arrive in the order the requests were made.
//! Get requests may be pipelined.
//!
//! ### Transactions and put
//!
//! Puts must be enclosed in a transaction naming the (GUID, hash) pair they belong to.
//! Only one transaction may be open at a time on a connection.
//! Neither `ts`, `te` nor `pa` produce a response. Content is committed by `te`.
//!
//! ### Integrity check
//!
//! * S ➡️ C: `ic`, error count (8)
//!
//! ## Errors
//!
//! There are no error responses. Any protocol or storage error closes the connection.
//! Output already in flight is not rolled back; clients detect truncation from the size fields.

pub mod codec;
pub mod command;
pub mod common;
mod error;

pub use command::{Command, frame_length};
pub use error::{ProtocolError, RawCode};
