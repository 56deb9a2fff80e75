// src/monitor/packet.rs
//
// Wire codec for the probe protocol. The byte layout is shared with game
// server implementations we don't control, so it must stay byte-exact:
// a u32 little-endian variant tag (4 = GetStatus, 5 = Status), then the
// variant fields. Strings are a u64 little-endian byte length followed by
// the raw bytes, no terminator. All integers are little-endian.

use std::error::Error;
use std::fmt;

const GET_STATUS_TAG: u32 = 4;
const STATUS_TAG: u32 = 5;

/// Probe request sent to a registered game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerGetStatus {
    pub nonce: u64,
}

/// Probe reply. The nonce echoes the request; the rest is gameplay
/// metadata as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerStatus {
    pub nonce: u64,
    pub server_version: String,
    pub player_count: u64,
    pub room_count: u64,
    pub server_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// The variant tag in the bytes is not the expected one.
    WrongVariant,
    /// A string length header exceeds the remaining bytes.
    Malformed,
    /// A fixed-size field runs past the end of the buffer.
    Truncated,
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongVariant => write!(f, "wrong variant"),
            Self::Malformed => write!(f, "malformed packet"),
            Self::Truncated => write!(f, "packet too short"),
        }
    }
}

impl Error for PacketError {}

/// Byte reader over a received datagram. Trailing bytes left unread after
/// a successful decode are tolerated.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        if self.buf.len() < n {
            return Err(PacketError::Truncated);
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u32_le(&mut self) -> Result<u32, PacketError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn u64_le(&mut self) -> Result<u64, PacketError> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String, PacketError> {
        let len = self.u64_le()?;
        if len > self.buf.len() as u64 {
            return Err(PacketError::Malformed);
        }
        let bytes = self.take(len as usize)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

impl ServerGetStatus {
    /// Encodes to exactly 12 bytes: tag, then the nonce.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.extend_from_slice(&GET_STATUS_TAG.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut r = Reader::new(bytes);
        if r.u32_le()? != GET_STATUS_TAG {
            return Err(PacketError::WrongVariant);
        }
        Ok(Self { nonce: r.u64_le()? })
    }
}

impl ServerStatus {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&STATUS_TAG.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        put_string(&mut out, &self.server_version);
        out.extend_from_slice(&self.player_count.to_le_bytes());
        out.extend_from_slice(&self.room_count.to_le_bytes());
        put_string(&mut out, &self.server_name);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut r = Reader::new(bytes);
        if r.u32_le()? != STATUS_TAG {
            return Err(PacketError::WrongVariant);
        }
        let nonce = r.u64_le()?;
        let server_version = r.string()?;
        let player_count = r.u64_le()?;
        let room_count = r.u64_le()?;
        let server_name = r.string()?;
        Ok(Self {
            nonce,
            server_version,
            player_count,
            room_count,
            server_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // These byte slices must be kept in sync with the game server
    // implementations of the protocol.
    const GET_STATUS_BYTES: [u8; 12] = [
        4, 0, 0, 0, // 4=GetStatus
        0xF0, 0xDE, 0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12, // nonce
    ];

    const STATUS_BYTES: [u8; 49] = [
        5, 0, 0, 0, // 5=Status
        0xF0, 0xDE, 0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12, // nonce
        3, 0, 0, 0, 0, 0, 0, 0, 118, 101, 114, // server_version "ver"
        123, 0, 0, 0, 0, 0, 0, 0, // player_count
        200, 1, 0, 0, 0, 0, 0, 0, // room_count
        2, 0, 0, 0, 0, 0, 0, 0, 110, 109, // server_name "nm"
    ];

    fn sample_status() -> ServerStatus {
        ServerStatus {
            nonce: 0x123456789ABCDEF0,
            server_version: "ver".to_string(),
            player_count: 123,
            room_count: 456,
            server_name: "nm".to_string(),
        }
    }

    #[test]
    fn encode_get_status_is_byte_exact() {
        let packet = ServerGetStatus {
            nonce: 0x123456789ABCDEF0,
        };
        assert_eq!(packet.encode(), GET_STATUS_BYTES);
    }

    #[test]
    fn decode_status_golden_vector() {
        let status = ServerStatus::decode(&STATUS_BYTES).unwrap();
        assert_eq!(status, sample_status());
    }

    #[test]
    fn encode_status_is_byte_exact() {
        assert_eq!(sample_status().encode(), STATUS_BYTES);
    }

    #[test]
    fn decode_wrong_variant() {
        assert_eq!(
            ServerGetStatus::decode(&STATUS_BYTES),
            Err(PacketError::WrongVariant)
        );
        assert_eq!(
            ServerStatus::decode(&GET_STATUS_BYTES),
            Err(PacketError::WrongVariant)
        );
    }

    #[test]
    fn decode_overlong_string_header_is_malformed() {
        let mut bytes = vec![5, 0, 0, 0];
        bytes.extend_from_slice(&1u64.to_le_bytes()); // nonce
        bytes.extend_from_slice(&100u64.to_le_bytes()); // claims 100 bytes
        bytes.extend_from_slice(b"short");
        assert_eq!(ServerStatus::decode(&bytes), Err(PacketError::Malformed));
    }

    #[test]
    fn decode_short_fixed_field_is_truncated() {
        assert_eq!(
            ServerGetStatus::decode(&GET_STATUS_BYTES[..7]),
            Err(PacketError::Truncated)
        );
        assert_eq!(ServerStatus::decode(&[5, 0]), Err(PacketError::Truncated));
    }

    #[test]
    fn decode_tolerates_trailing_bytes() {
        let mut bytes = GET_STATUS_BYTES.to_vec();
        bytes.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        let packet = ServerGetStatus::decode(&bytes).unwrap();
        assert_eq!(packet.nonce, 0x123456789ABCDEF0);
    }

    proptest! {
        #[test]
        fn get_status_roundtrip(nonce: u64) {
            let packet = ServerGetStatus { nonce };
            prop_assert_eq!(ServerGetStatus::decode(&packet.encode()), Ok(packet));
        }

        #[test]
        fn status_roundtrip(
            nonce: u64,
            server_version in "[ -~]{0,40}",
            player_count: u64,
            room_count: u64,
            server_name in "[ -~]{0,40}",
        ) {
            let packet = ServerStatus {
                nonce,
                server_version,
                player_count,
                room_count,
                server_name,
            };
            prop_assert_eq!(ServerStatus::decode(&packet.encode()), Ok(packet.clone()));
        }

        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
            let _ = ServerGetStatus::decode(&bytes);
            let _ = ServerStatus::decode(&bytes);
        }
    }
}
