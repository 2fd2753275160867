//! Wire format of the handshake command frames.
//!
//! Payloads are a 1-byte command identifier followed by fixed-layout
//! fields; multi-byte integers are little-endian. The HELLOACK and ACK
//! trailers depend on the broadcast-key option, so decoding takes that
//! flag as an argument.
//!
//! ```text
//! HELLO    0x0A  challenge[8] short_addr[2]
//! HELLOACK 0x0B  peer_challenge[8] own_challenge[8] local_index[1]
//!                (broadcast_key[16] | short_addr[2])
//! ACK      0x0C  local_index[1] (broadcast_key[16])?
//! ```

use alloc::vec::Vec;

use crate::types::{
    BroadcastKey, Challenge, ShortAddr, ACK_IDENTIFIER, BROADCAST_KEY_LEN, CHALLENGE_LEN,
    HELLOACK_IDENTIFIER, HELLO_IDENTIFIER,
};

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of buffer.
    UnexpectedEof,
    /// Trailing bytes after a complete command.
    TrailingBytes,
    /// Leading byte is not a handshake command identifier.
    UnknownCommand(u8),
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected end of payload"),
            DecodeError::TrailingBytes => write!(f, "trailing bytes after command"),
            DecodeError::UnknownCommand(id) => write!(f, "unknown command identifier {id:#04x}"),
        }
    }
}

/// Cursor-based reader over a payload slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a new reader over a byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// True once the whole payload has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.pos >= self.buf.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + len > self.buf.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a little-endian u16.
    pub fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read an 8-byte challenge.
    pub fn read_challenge(&mut self) -> Result<Challenge, DecodeError> {
        let bytes = self.read_bytes(CHALLENGE_LEN)?;
        let mut c = [0u8; CHALLENGE_LEN];
        c.copy_from_slice(bytes);
        Ok(c)
    }

    /// Read a 16-byte broadcast key.
    pub fn read_broadcast_key(&mut self) -> Result<BroadcastKey, DecodeError> {
        let bytes = self.read_bytes(BROADCAST_KEY_LEN)?;
        let mut k = [0u8; BROADCAST_KEY_LEN];
        k.copy_from_slice(bytes);
        Ok(k)
    }
}

/// Append-only writer assembling a payload.
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Start a payload with the given command identifier.
    pub fn command(identifier: u8) -> Self {
        let mut buf = Vec::with_capacity(32);
        buf.push(identifier);
        Self { buf }
    }

    /// Append a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append a little-endian u16.
    pub fn write_u16_le(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Finish and return the payload.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// HELLO: unauthenticated broadcast opening a handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hello {
    /// Fresh challenge of the current bootstrap round.
    pub challenge: Challenge,
    /// Short address of the broadcaster.
    pub short_addr: ShortAddr,
}

/// Trailer of a HELLOACK, selected by the broadcast-key option.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HelloAckTrailer {
    /// The responder's broadcast key (option enabled).
    BroadcastKey(BroadcastKey),
    /// The responder's short address (option disabled).
    ShortAddr(ShortAddr),
}

/// HELLOACK: secured unicast reply echoing the HELLO challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HelloAck {
    /// Echo of the challenge from the peer's HELLO.
    pub peer_challenge: Challenge,
    /// The responder's fresh challenge for this pair.
    pub own_challenge: Challenge,
    /// The responder's table index for this pair.
    pub local_index: u8,
    pub trailer: HelloAckTrailer,
}

/// ACK: secured unicast completing the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ack {
    /// The initiator's table index for this pair.
    pub local_index: u8,
    /// The initiator's broadcast key (option enabled).
    pub broadcast_key: Option<BroadcastKey>,
}

/// A decoded handshake command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Hello(Hello),
    HelloAck(HelloAck),
    Ack(Ack),
}

impl Hello {
    /// Encode to a payload including the command identifier.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::command(HELLO_IDENTIFIER);
        w.write_bytes(&self.challenge);
        w.write_u16_le(self.short_addr);
        w.finish()
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            challenge: r.read_challenge()?,
            short_addr: r.read_u16_le()?,
        })
    }
}

impl HelloAck {
    /// Encode to a payload including the command identifier.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::command(HELLOACK_IDENTIFIER);
        w.write_bytes(&self.peer_challenge);
        w.write_bytes(&self.own_challenge);
        w.write_u8(self.local_index);
        match self.trailer {
            HelloAckTrailer::BroadcastKey(key) => w.write_bytes(&key),
            HelloAckTrailer::ShortAddr(addr) => w.write_u16_le(addr),
        }
        w.finish()
    }

    fn decode(r: &mut Reader<'_>, with_broadcast_key: bool) -> Result<Self, DecodeError> {
        let peer_challenge = r.read_challenge()?;
        let own_challenge = r.read_challenge()?;
        let local_index = r.read_u8()?;
        let trailer = if with_broadcast_key {
            HelloAckTrailer::BroadcastKey(r.read_broadcast_key()?)
        } else {
            HelloAckTrailer::ShortAddr(r.read_u16_le()?)
        };
        Ok(Self {
            peer_challenge,
            own_challenge,
            local_index,
            trailer,
        })
    }
}

impl Ack {
    /// Encode to a payload including the command identifier.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::command(ACK_IDENTIFIER);
        w.write_u8(self.local_index);
        if let Some(key) = self.broadcast_key {
            w.write_bytes(&key);
        }
        w.finish()
    }

    fn decode(r: &mut Reader<'_>, with_broadcast_key: bool) -> Result<Self, DecodeError> {
        let local_index = r.read_u8()?;
        let broadcast_key = if with_broadcast_key {
            Some(r.read_broadcast_key()?)
        } else {
            None
        };
        Ok(Self {
            local_index,
            broadcast_key,
        })
    }
}

impl Command {
    /// Decode a full payload (identifier byte included).
    ///
    /// `with_broadcast_key` selects the HELLOACK/ACK trailer layout; it
    /// must match the sender's compile-time option for the exchange to
    /// work at all, so a mismatch surfaces as a decode error or a
    /// failed verification later.
    pub fn decode_from_slice(payload: &[u8], with_broadcast_key: bool) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        let cmd = match r.read_u8()? {
            HELLO_IDENTIFIER => Command::Hello(Hello::decode(&mut r)?),
            HELLOACK_IDENTIFIER => Command::HelloAck(HelloAck::decode(&mut r, with_broadcast_key)?),
            ACK_IDENTIFIER => Command::Ack(Ack::decode(&mut r, with_broadcast_key)?),
            other => return Err(DecodeError::UnknownCommand(other)),
        };
        if !r.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(cmd)
    }

    /// The command identifier byte.
    pub fn identifier(&self) -> u8 {
        match self {
            Command::Hello(_) => HELLO_IDENTIFIER,
            Command::HelloAck(_) => HELLOACK_IDENTIFIER,
            Command::Ack(_) => ACK_IDENTIFIER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_roundtrip() {
        let hello = Hello {
            challenge: [0xAA; CHALLENGE_LEN],
            short_addr: 0x1234,
        };
        let bytes = hello.encode_to_vec();
        assert_eq!(bytes.len(), 1 + CHALLENGE_LEN + 2);
        assert_eq!(bytes[0], HELLO_IDENTIFIER);
        // short address is little-endian
        assert_eq!(&bytes[9..11], &[0x34, 0x12]);

        match Command::decode_from_slice(&bytes, false).unwrap() {
            Command::Hello(h) => assert_eq!(h, hello),
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn helloack_trailer_selects_layout() {
        let base = HelloAck {
            peer_challenge: [1; CHALLENGE_LEN],
            own_challenge: [2; CHALLENGE_LEN],
            local_index: 3,
            trailer: HelloAckTrailer::ShortAddr(0x00FE),
        };
        let bytes = base.encode_to_vec();
        assert_eq!(bytes.len(), 1 + 8 + 8 + 1 + 2);
        match Command::decode_from_slice(&bytes, false).unwrap() {
            Command::HelloAck(h) => assert_eq!(h, base),
            other => panic!("decoded {other:?}"),
        }

        let with_key = HelloAck {
            trailer: HelloAckTrailer::BroadcastKey([7; BROADCAST_KEY_LEN]),
            ..base
        };
        let bytes = with_key.encode_to_vec();
        assert_eq!(bytes.len(), 1 + 8 + 8 + 1 + BROADCAST_KEY_LEN);
        match Command::decode_from_slice(&bytes, true).unwrap() {
            Command::HelloAck(h) => assert_eq!(h, with_key),
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn ack_with_and_without_key() {
        let plain = Ack {
            local_index: 9,
            broadcast_key: None,
        };
        let bytes = plain.encode_to_vec();
        assert_eq!(bytes, [ACK_IDENTIFIER, 9]);
        assert_eq!(
            Command::decode_from_slice(&bytes, false).unwrap(),
            Command::Ack(plain)
        );

        let keyed = Ack {
            local_index: 9,
            broadcast_key: Some([0x55; BROADCAST_KEY_LEN]),
        };
        let bytes = keyed.encode_to_vec();
        assert_eq!(
            Command::decode_from_slice(&bytes, true).unwrap(),
            Command::Ack(keyed)
        );
    }

    #[test]
    fn short_payload_rejected() {
        let hello = Hello {
            challenge: [0; CHALLENGE_LEN],
            short_addr: 1,
        }
        .encode_to_vec();
        assert_eq!(
            Command::decode_from_slice(&hello[..hello.len() - 1], false),
            Err(DecodeError::UnexpectedEof)
        );
        assert_eq!(Command::decode_from_slice(&[], false), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn unknown_identifier_rejected() {
        assert_eq!(
            Command::decode_from_slice(&[0x7F, 0, 0], false),
            Err(DecodeError::UnknownCommand(0x7F))
        );
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = Ack {
            local_index: 0,
            broadcast_key: None,
        }
        .encode_to_vec();
        bytes.push(0xFF);
        assert_eq!(
            Command::decode_from_slice(&bytes, false),
            Err(DecodeError::TrailingBytes)
        );
    }
}
