//! # BitTorrent Peer Wire Messages
//!
//! This module defines the message types and serialization for the BitTorrent
//! peer wire protocol. All communication between peers after the handshake
//! uses these messages.
//!
//! ## Message Structure
//!
//! ```text
//! <length prefix><message ID><payload>
//! ```
//!
//! - **Length Prefix**: 4 bytes (big-endian u32) - Length of message ID + payload
//! - **Message ID**: 1 byte - Identifies the message type
//! - **Payload**: `length - 1` bytes - Message-specific data
//!
//! ## Message Types
//!
//! | ID | Name | Description |
//! |----|------|-------------|
//! | 0 | CHOKE | Peer will not answer requests (no payload) |
//! | 1 | UNCHOKE | Peer will answer requests (no payload) |
//! | 2 | INTERESTED | Client wants to download (no payload) |
//! | 3 | NOT INTERESTED | Client doesn't want to download (no payload) |
//! | 4 | HAVE | Peer has a piece (payload: piece index) |
//! | 5 | BITFIELD | Peer's piece availability (payload: bitfield) |
//! | 6 | REQUEST | Request a block (payload: index, begin, length) |
//! | 7 | PIECE | Block data (payload: index, begin, data) |
//! | 8 | CANCEL | Cancel a request (payload: index, begin, length) |
//!
//! Any other id is tolerated and ignored by the session.
//!
//! ## Keep-Alive Messages
//!
//! A keep-alive message has length 0 and no ID or payload.

use crate::error::{Error, Result};

use byteorder::{BigEndian, ByteOrder};

pub type MessageId = u8;
type MessagePayload = Vec<u8>;

pub const MESSAGE_CHOKE: MessageId = 0;
pub const MESSAGE_UNCHOKE: MessageId = 1;
pub const MESSAGE_INTERESTED: MessageId = 2;
pub const MESSAGE_NOT_INTERESTED: MessageId = 3;
pub const MESSAGE_HAVE: MessageId = 4;
pub const MESSAGE_BITFIELD: MessageId = 5;
pub const MESSAGE_REQUEST: MessageId = 6;
pub const MESSAGE_PIECE: MessageId = 7;
pub const MESSAGE_CANCEL: MessageId = 8;

// Length of the big-endian length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Zero-length frame
    KeepAlive,
    /// Any frame carrying an id
    Frame {
        id: MessageId,
        payload: MessagePayload,
    },
}

impl Message {
    /// Build a message without payload.
    pub fn new(id: MessageId) -> Self {
        Message::Frame {
            id,
            payload: vec![],
        }
    }

    /// Build a message with a payload.
    pub fn new_with_payload(id: MessageId, payload: MessagePayload) -> Self {
        Message::Frame { id, payload }
    }

    /// Build a REQUEST for one block.
    pub fn request(index: u32, begin: u32, length: u32) -> Self {
        let mut payload = vec![0u8; 12];
        BigEndian::write_u32(&mut payload[0..4], index);
        BigEndian::write_u32(&mut payload[4..8], begin);
        BigEndian::write_u32(&mut payload[8..12], length);

        Message::new_with_payload(MESSAGE_REQUEST, payload)
    }

    /// Message id, `None` for a keep-alive.
    pub fn id(&self) -> Option<MessageId> {
        match self {
            Message::KeepAlive => None,
            Message::Frame { id, .. } => Some(*id),
        }
    }

    /// Serialize message with its length prefix.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Message::KeepAlive => vec![0; LENGTH_PREFIX_LEN],
            Message::Frame { id, payload } => {
                let mut serialized = vec![0u8; LENGTH_PREFIX_LEN + 1];
                BigEndian::write_u32(&mut serialized[0..4], (1 + payload.len()) as u32);
                serialized[4] = *id;
                serialized.extend_from_slice(payload);
                serialized
            }
        }
    }
}

/// Deserialize a frame body (everything after the length prefix).
pub fn deserialize_message(message_buf: &[u8]) -> Message {
    match message_buf.split_first() {
        None => Message::KeepAlive,
        Some((&id, payload)) => Message::new_with_payload(id, payload.to_vec()),
    }
}

/// A block carried by a PIECE message.
#[derive(Debug, PartialEq, Eq)]
pub struct Block<'a> {
    pub index: u32,
    pub begin: u32,
    pub data: &'a [u8],
}

/// Split a PIECE payload into index, offset and block bytes.
///
/// # Errors
///
/// Returns [`Error::MalformedPieceMessage`] if the payload is shorter than
/// the 8-byte header.
pub fn parse_piece(payload: &[u8]) -> Result<Block<'_>> {
    if payload.len() < 8 {
        return Err(Error::MalformedPieceMessage(format!(
            "payload is {} bytes, header needs 8",
            payload.len()
        )));
    }

    Ok(Block {
        index: BigEndian::read_u32(&payload[0..4]),
        begin: BigEndian::read_u32(&payload[4..8]),
        data: &payload[8..],
    })
}

/// Name of a message id, for logging.
pub fn message_name(id: MessageId) -> &'static str {
    match id {
        MESSAGE_CHOKE => "CHOKE",
        MESSAGE_UNCHOKE => "UNCHOKE",
        MESSAGE_INTERESTED => "INTERESTED",
        MESSAGE_NOT_INTERESTED => "NOT_INTERESTED",
        MESSAGE_HAVE => "HAVE",
        MESSAGE_BITFIELD => "BITFIELD",
        MESSAGE_REQUEST => "REQUEST",
        MESSAGE_PIECE => "PIECE",
        MESSAGE_CANCEL => "CANCEL",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_interested() {
        assert_eq!(
            Message::new(MESSAGE_INTERESTED).serialize(),
            vec![0, 0, 0, 1, 2]
        );
        assert_eq!(Message::KeepAlive.serialize(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_serialize_request() {
        let bytes = Message::request(1, 16384, 7232).serialize();
        assert_eq!(
            bytes,
            vec![0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0x40, 0, 0, 0, 0x1c, 0x40]
        );
    }

    #[test]
    fn test_deserialize_message() {
        assert_eq!(deserialize_message(&[]), Message::KeepAlive);
        assert_eq!(
            deserialize_message(&[5, 0xff, 0x80]),
            Message::new_with_payload(MESSAGE_BITFIELD, vec![0xff, 0x80])
        );
        assert_eq!(deserialize_message(&[1]).id(), Some(MESSAGE_UNCHOKE));
    }

    #[test]
    fn test_parse_piece() {
        let payload = [0, 0, 0, 3, 0, 0, 0x40, 0, 0xde, 0xad];
        let block = parse_piece(&payload).unwrap();
        assert_eq!(
            block,
            Block {
                index: 3,
                begin: 16384,
                data: &[0xde, 0xad]
            }
        );

        // Header only is a valid, empty block
        assert!(parse_piece(&payload[..8]).unwrap().data.is_empty());

        assert!(matches!(
            parse_piece(&payload[..7]),
            Err(Error::MalformedPieceMessage(_))
        ));
    }
}
