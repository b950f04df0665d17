//! # BitTorrent Handshake Protocol
//!
//! The handshake is the first exchange on a fresh peer connection. It
//! identifies the protocol, names the torrent by its info hash and carries
//! each side's peer id.
//!
//! ## Message Format
//!
//! The handshake is a fixed 68-byte message:
//!
//! ```text
//! <pstrlen><pstr><reserved><info_hash><peer_id>
//! ```
//!
//! - **pstrlen**: 1 byte - Length of protocol string (19)
//! - **pstr**: 19 bytes - Protocol identifier ("BitTorrent protocol")
//! - **reserved**: 8 bytes - All zeros, no extensions are negotiated
//! - **info_hash**: 20 bytes - SHA-1 hash of torrent info dictionary
//! - **peer_id**: 20 bytes - Unique identifier for the peer

use crate::error::{Error, Result};

const PROTOCOL_ID: &[u8; 19] = b"BitTorrent protocol";

pub const HANDSHAKE_LEN: usize = 1 + PROTOCOL_ID.len() + 8 + 20 + 20;

/// Represents a BitTorrent handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// 8 reserved bytes for protocol extensions
    pub reserved: [u8; 8],
    /// 20-byte SHA-1 hash of the torrent's info dictionary
    pub info_hash: [u8; 20],
    /// 20-byte unique identifier of the sending peer
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Creates a new handshake with all reserved bits cleared.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Handshake {
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }

    /// Serializes the handshake into its 68-byte wire form.
    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut serialized = [0u8; HANDSHAKE_LEN];

        serialized[0] = PROTOCOL_ID.len() as u8;
        serialized[1..20].copy_from_slice(PROTOCOL_ID);
        serialized[20..28].copy_from_slice(&self.reserved);
        serialized[28..48].copy_from_slice(&self.info_hash);
        serialized[48..68].copy_from_slice(&self.peer_id);

        serialized
    }

    /// Parses a received 68-byte handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeFailed`] if the protocol length or string is
    /// not the BitTorrent one.
    pub fn deserialize(buf: &[u8; HANDSHAKE_LEN]) -> Result<Handshake> {
        if buf[0] as usize != PROTOCOL_ID.len() {
            return Err(Error::HandshakeFailed(format!(
                "unexpected protocol length {}",
                buf[0]
            )));
        }
        if &buf[1..20] != PROTOCOL_ID {
            return Err(Error::HandshakeFailed(format!(
                "unexpected protocol {:?}",
                String::from_utf8_lossy(&buf[1..20])
            )));
        }

        let mut handshake = Handshake::new([0; 20], [0; 20]);
        handshake.reserved.copy_from_slice(&buf[20..28]);
        handshake.info_hash.copy_from_slice(&buf[28..48]);
        handshake.peer_id.copy_from_slice(&buf[48..68]);

        Ok(handshake)
    }
}
