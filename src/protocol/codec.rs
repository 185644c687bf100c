//! Fixed-width wire types and response encoders
//!
//! Nothing in here holds state. Decoders take exact-width slices and return `None`
//! when the width is wrong; encoders return ready-to-send [`Bytes`].

use std::fmt::{Debug, Display};

use bytes::{BufMut as _, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

/// The protocol version this server speaks
pub const PROTOCOL_VERSION: u32 = 254;

/// On-wire size of the handshake version field
pub const VERSION_SIZE: usize = 4;
/// On-wire size of a GUID
pub const GUID_SIZE: usize = 16;
/// On-wire size of a content hash
pub const HASH_SIZE: usize = 16;
/// On-wire size of an identifier block (GUID followed by hash)
pub const ID_SIZE: usize = GUID_SIZE + HASH_SIZE;
/// On-wire size of size and count fields
pub const SIZE_FIELD_SIZE: usize = 8;
/// On-wire size of a response marker
pub const MARKER_SIZE: usize = 2;

const_assert_eq!(ID_SIZE, 32);

/// Response marker preceding an integrity check result
pub const INTEGRITY_MARKER: &[u8; MARKER_SIZE] = b"ic";

const HIT: u8 = b'+';
const MISS: u8 = b'-';

/// Selects among the cache's sub-categories of blob
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum AssetKind {
    /// Primary asset bytes
    Asset,
    /// Metadata about the asset
    Info,
    /// Auxiliary resource data
    Resource,
}

impl AssetKind {
    /// Interprets the type selector character of a get or put command code
    #[must_use]
    pub fn from_selector(selector: u8) -> Option<Self> {
        match selector {
            b'a' => Some(Self::Asset),
            b'i' => Some(Self::Info),
            b'r' => Some(Self::Resource),
            _ => None,
        }
    }

    /// The type selector character used on the wire
    #[must_use]
    pub fn selector(self) -> u8 {
        match self {
            Self::Asset => b'a',
            Self::Info => b'i',
            Self::Resource => b'r',
        }
    }
}

/// Identifies one version of one asset: a GUID plus a content hash
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId {
    /// Names the logical asset
    pub guid: [u8; GUID_SIZE],
    /// Distinguishes versions of the asset
    pub hash: [u8; HASH_SIZE],
}

impl BlobId {
    /// Constructor
    #[must_use]
    pub fn new(guid: [u8; GUID_SIZE], hash: [u8; HASH_SIZE]) -> Self {
        Self { guid, hash }
    }

    /// Decodes an identifier block. The slice must be exactly [`ID_SIZE`] bytes.
    #[must_use]
    pub fn from_slice(block: &[u8]) -> Option<Self> {
        if block.len() != ID_SIZE {
            return None;
        }
        let (guid, hash) = block.split_at(GUID_SIZE);
        Some(Self {
            guid: guid.try_into().ok()?,
            hash: hash.try_into().ok()?,
        })
    }

    /// Appends the on-wire form to a buffer
    pub fn put_into(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.guid);
        buf.put_slice(&self.hash);
    }

    /// Lower-case hex rendering of the GUID
    #[must_use]
    pub fn guid_hex(&self) -> String {
        hex::encode(self.guid)
    }

    /// Lower-case hex rendering of the hash
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

impl Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.guid_hex(), self.hash_hex())
    }
}

impl Debug for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlobId({self})")
    }
}

/// Reads a big-endian `u64` from a slice of exactly 8 bytes
#[must_use]
pub fn read_u64_be(bytes: &[u8]) -> Option<u64> {
    Some(u64::from_be_bytes(bytes.try_into().ok()?))
}

/// Header of a get hit. The blob bytes follow it on the wire.
#[must_use]
pub fn encode_hit(kind: AssetKind, size: u64, id: &BlobId) -> Bytes {
    let mut buf = BytesMut::with_capacity(MARKER_SIZE + SIZE_FIELD_SIZE + ID_SIZE);
    buf.put_u8(HIT);
    buf.put_u8(kind.selector());
    buf.put_u64(size);
    id.put_into(&mut buf);
    buf.freeze()
}

/// The complete response to a get which missed
#[must_use]
pub fn encode_miss(kind: AssetKind, id: &BlobId) -> Bytes {
    let mut buf = BytesMut::with_capacity(MARKER_SIZE + ID_SIZE);
    buf.put_u8(MISS);
    buf.put_u8(kind.selector());
    id.put_into(&mut buf);
    buf.freeze()
}

/// The complete response to an integrity check
#[must_use]
pub fn encode_integrity_result(errors: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(MARKER_SIZE + SIZE_FIELD_SIZE);
    buf.put_slice(INTEGRITY_MARKER);
    buf.put_u64(errors);
    buf.freeze()
}

#[cfg(test)]
mod test {
    use super::{AssetKind, BlobId, ID_SIZE, encode_hit, encode_integrity_result, encode_miss};
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator as _;

    fn id() -> BlobId {
        BlobId::new([0x11; 16], [0xee; 16])
    }

    #[test]
    fn selectors() {
        for kind in AssetKind::iter() {
            assert_eq!(AssetKind::from_selector(kind.selector()), Some(kind));
        }
        assert_eq!(AssetKind::from_selector(b'x'), None);
        assert_eq!(AssetKind::Resource.to_string(), "resource");
    }

    #[test]
    fn id_block_width() {
        assert!(BlobId::from_slice(&[0u8; ID_SIZE - 1]).is_none());
        assert!(BlobId::from_slice(&[0u8; ID_SIZE + 1]).is_none());
        let mut block = vec![1u8; 16];
        block.extend_from_slice(&[2u8; 16]);
        let id = BlobId::from_slice(&block).unwrap();
        assert_eq!(id.guid, [1u8; 16]);
        assert_eq!(id.hash, [2u8; 16]);
    }

    #[test]
    fn display() {
        assert_eq!(
            id().to_string(),
            "11111111111111111111111111111111-eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee"
        );
    }

    #[test]
    fn integers() {
        assert_eq!(super::read_u64_be(&[0, 0, 0, 0, 0, 0, 1, 0]), Some(256));
        assert_eq!(super::read_u64_be(&[0; 7]), None);
    }

    #[test]
    fn hit_layout() {
        let hit = encode_hit(AssetKind::Info, 5, &id());
        assert_eq!(&hit[..2], b"+i");
        assert_eq!(&hit[2..10], &[0, 0, 0, 0, 0, 0, 0, 5]);
        assert_eq!(&hit[10..26], &[0x11; 16]);
        assert_eq!(&hit[26..], &[0xee; 16]);
    }

    #[test]
    fn miss_layout() {
        let miss = encode_miss(AssetKind::Resource, &id());
        assert_eq!(miss.len(), 2 + ID_SIZE);
        assert_eq!(&miss[..2], b"-r");
        assert_eq!(&miss[2..18], &[0x11; 16]);
    }

    #[test]
    fn integrity_layout() {
        let r = encode_integrity_result(0x0102);
        assert_eq!(&r[..], b"ic\0\0\0\0\0\0\x01\x02");
    }
}
