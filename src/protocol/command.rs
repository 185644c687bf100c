//! Command frame decoding

use super::codec::{AssetKind, BlobId, ID_SIZE, SIZE_FIELD_SIZE, read_u64_be};
use super::error::{ProtocolError, RawCode};

/// Length of a two-character command code
const CODE_SIZE: usize = 2;

/// A decoded command frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum Command {
    /// `q`: close the connection
    Quit,
    /// `ga`, `gi`, `gr`: retrieve a blob
    Get {
        /// Which sub-category
        kind: AssetKind,
        /// Which blob
        id: BlobId,
    },
    /// `ts`: open a transaction for a (GUID, hash) pair
    TransactionStart(BlobId),
    /// `te`: commit the open transaction
    TransactionEnd,
    /// `pa`, `pi`, `pr`: store a blob in the open transaction. Exactly `size` raw bytes follow.
    Put {
        /// Which sub-category
        kind: AssetKind,
        /// Length of the body that follows
        size: u64,
    },
    /// `icf`, `icv`: scan the cache for damage, optionally repairing it
    IntegrityCheck {
        /// Fix what is found (`icf`), or only count it (`icv`)
        repair: bool,
    },
}

/// What follows the command code, as implied by its length
enum Fields {
    None,
    Id(BlobId),
    Size(u64),
}

impl Fields {
    fn from_trailing(code: &[u8], trailing: &[u8]) -> Result<Self, ProtocolError> {
        match trailing.len() {
            0 => Ok(Fields::None),
            ID_SIZE => BlobId::from_slice(trailing)
                .map(Fields::Id)
                .ok_or_else(|| malformed(code, trailing)),
            SIZE_FIELD_SIZE => read_u64_be(trailing)
                .map(Fields::Size)
                .ok_or_else(|| malformed(code, trailing)),
            _ => Err(malformed(code, trailing)),
        }
    }
}

fn malformed(code: &[u8], trailing: &[u8]) -> ProtocolError {
    ProtocolError::MalformedFrame {
        code: RawCode::new(code),
        trailing: trailing.len(),
    }
}

fn unrecognized(code: &[u8]) -> ProtocolError {
    ProtocolError::UnrecognizedCommand(RawCode::new(code))
}

impl Command {
    /// Decodes one complete frame.
    ///
    /// The layout is selected by frame length alone:
    /// * empty: no-op, returns `Ok(None)`
    /// * 1 byte: a single-character command (only `q`)
    /// * 3 bytes beginning `ic`: an integrity check
    /// * otherwise: a 2-character code followed by nothing, an identifier block, or a size field.
    ///   Any other trailing length is a [`ProtocolError::MalformedFrame`].
    pub fn decode(frame: &[u8]) -> Result<Option<Self>, ProtocolError> {
        match frame {
            [] => Ok(None),
            [b'q'] => Ok(Some(Command::Quit)),
            [_] => Err(unrecognized(frame)),
            [b'i', b'c', mode] => match mode {
                b'f' => Ok(Some(Command::IntegrityCheck { repair: true })),
                b'v' => Ok(Some(Command::IntegrityCheck { repair: false })),
                _ => Err(unrecognized(frame)),
            },
            [c0, c1, trailing @ ..] => {
                let code = &frame[..CODE_SIZE];
                let fields = || Fields::from_trailing(code, trailing);
                let command = match (c0, c1) {
                    (b'g', sel) => {
                        let kind =
                            AssetKind::from_selector(*sel).ok_or_else(|| unrecognized(code))?;
                        let Fields::Id(id) = fields()? else {
                            return Err(malformed(code, trailing));
                        };
                        Command::Get { kind, id }
                    }
                    (b'p', sel) => {
                        let kind =
                            AssetKind::from_selector(*sel).ok_or_else(|| unrecognized(code))?;
                        let Fields::Size(size) = fields()? else {
                            return Err(malformed(code, trailing));
                        };
                        Command::Put { kind, size }
                    }
                    (b't', b's') => {
                        let Fields::Id(id) = fields()? else {
                            return Err(malformed(code, trailing));
                        };
                        Command::TransactionStart(id)
                    }
                    (b't', b'e') => {
                        let Fields::None = fields()? else {
                            return Err(malformed(code, trailing));
                        };
                        Command::TransactionEnd
                    }
                    _ => return Err(unrecognized(code)),
                };
                Ok(Some(command))
            }
        }
    }
}

/// Works out how long the next frame in a buffer of client input is.
///
/// Frames are not length-prefixed; the command code fixes the length.
///
/// # Return
/// * `Ok(Some(n))`: the first `n` bytes of `buffered` are a complete frame
/// * `Ok(None)`: more input is needed before the frame can be delimited
/// * `Err(_)`: the input does not begin with a command we know
pub fn frame_length(buffered: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let len = match buffered {
        [] | [b'g' | b'p' | b't' | b'i'] => return Ok(None),
        [b'q', ..] => 1,
        [_] => return Err(unrecognized(buffered)),
        [b'g', b'a' | b'i' | b'r', ..] | [b't', b's', ..] => CODE_SIZE + ID_SIZE,
        [b'p', b'a' | b'i' | b'r', ..] => CODE_SIZE + SIZE_FIELD_SIZE,
        [b't', b'e', ..] => CODE_SIZE,
        [b'i', b'c', ..] => CODE_SIZE + 1,
        [c0, c1, ..] => return Err(unrecognized(&[*c0, *c1])),
    };
    Ok((buffered.len() >= len).then_some(len))
}

#[cfg(test)]
mod test {
    use super::{Command, frame_length};
    use crate::protocol::codec::{AssetKind, BlobId};
    use crate::protocol::{ProtocolError, RawCode};

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn id_block() -> Vec<u8> {
        let mut v = vec![0xaa; 16];
        v.extend_from_slice(&[0xbb; 16]);
        v
    }

    fn frame(code: &[u8], trailing: &[u8]) -> Vec<u8> {
        let mut v = code.to_vec();
        v.extend_from_slice(trailing);
        v
    }

    fn the_id() -> BlobId {
        BlobId::new([0xaa; 16], [0xbb; 16])
    }

    #[test]
    fn empty_is_noop() {
        assert_eq!(Command::decode(&[]), Ok(None));
    }

    #[test]
    fn quit() {
        assert_eq!(Command::decode(b"q"), Ok(Some(Command::Quit)));
        assert_eq!(
            Command::decode(b"x"),
            Err(ProtocolError::UnrecognizedCommand(RawCode::new(b"x")))
        );
    }

    #[rstest]
    #[case(b"ga", AssetKind::Asset)]
    #[case(b"gi", AssetKind::Info)]
    #[case(b"gr", AssetKind::Resource)]
    fn get(#[case] code: &[u8], #[case] kind: AssetKind) {
        assert_eq!(
            Command::decode(&frame(code, &id_block())),
            Ok(Some(Command::Get {
                kind,
                id: the_id()
            }))
        );
    }

    #[rstest]
    #[case(b"pa", AssetKind::Asset)]
    #[case(b"pi", AssetKind::Info)]
    #[case(b"pr", AssetKind::Resource)]
    fn put(#[case] code: &[u8], #[case] kind: AssetKind) {
        assert_eq!(
            Command::decode(&frame(code, &[0, 0, 0, 0, 0, 1, 0, 5])),
            Ok(Some(Command::Put { kind, size: 65541 }))
        );
    }

    #[test]
    fn transactions() {
        assert_eq!(
            Command::decode(&frame(b"ts", &id_block())),
            Ok(Some(Command::TransactionStart(the_id())))
        );
        assert_eq!(Command::decode(b"te"), Ok(Some(Command::TransactionEnd)));
    }

    #[test]
    fn integrity() {
        assert_eq!(
            Command::decode(b"icf"),
            Ok(Some(Command::IntegrityCheck { repair: true }))
        );
        assert_eq!(
            Command::decode(b"icv"),
            Ok(Some(Command::IntegrityCheck { repair: false }))
        );
        assert_eq!(
            Command::decode(b"icx"),
            Err(ProtocolError::UnrecognizedCommand(RawCode::new(b"icx")))
        );
    }

    #[rstest]
    #[case(b"zz", 0)]
    #[case(b"gx", 32)]
    #[case(b"px", 8)]
    fn unrecognized(#[case] code: &[u8], #[case] trailing: usize) {
        assert_eq!(
            Command::decode(&frame(code, &vec![0u8; trailing])),
            Err(ProtocolError::UnrecognizedCommand(RawCode::new(code)))
        );
    }

    #[rstest]
    #[case(b"ga", 8)]
    #[case(b"ga", 0)]
    #[case(b"ga", 31)]
    #[case(b"pa", 32)]
    #[case(b"pa", 7)]
    #[case(b"ts", 0)]
    #[case(b"te", 8)]
    #[case(b"te", 5)]
    fn malformed(#[case] code: &[u8], #[case] trailing: usize) {
        assert_eq!(
            Command::decode(&frame(code, &vec![0u8; trailing])),
            Err(ProtocolError::MalformedFrame {
                code: RawCode::new(code),
                trailing
            })
        );
    }

    #[rstest]
    #[case(b"", None)]
    #[case(b"q", Some(1))]
    #[case(b"qga", Some(1))]
    #[case(b"g", None)]
    #[case(b"ga", None)]
    #[case(b"te", Some(2))]
    #[case(b"tete", Some(2))]
    #[case(b"ic", None)]
    #[case(b"icv", Some(3))]
    #[case(b"pa1234567", None)]
    #[case(b"pa12345678", Some(10))]
    #[case(b"pa12345678body", Some(10))]
    fn lengths(#[case] input: &[u8], #[case] expected: Option<usize>) {
        assert_eq!(frame_length(input), Ok(expected));
    }

    #[test]
    fn get_frame_length() {
        let mut f = frame(b"gr", &id_block());
        assert_eq!(frame_length(&f[..33]), Ok(None));
        assert_eq!(frame_length(&f), Ok(Some(34)));
        f.push(b'q');
        assert_eq!(frame_length(&f), Ok(Some(34)));
    }

    #[rstest]
    #[case(b"x", b"x")]
    #[case(b"zz", b"zz")]
    #[case(b"gz123", b"gz")]
    #[case(b"tx", b"tx")]
    fn unknown_leader(#[case] input: &[u8], #[case] code: &[u8]) {
        assert_eq!(
            frame_length(input),
            Err(ProtocolError::UnrecognizedCommand(RawCode::new(code)))
        );
    }
}
