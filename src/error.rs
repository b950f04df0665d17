//! # Error Taxonomy
//!
//! Every stage of the client fails fast with a specific kind. Nothing in the
//! core retries: a malformed message, a closed connection or a hash mismatch
//! aborts the current operation and is handed back to the caller unchanged.
//!
//! | Stage     | Kinds                                                            |
//! |-----------|------------------------------------------------------------------|
//! | Bencode   | `MalformedInput`                                                 |
//! | Metadata  | `SchemaError`, `InvalidMetadata`                                 |
//! | Announce  | `TrackerUnreachable`, `TrackerProtocolError`, `MalformedPeerList`|
//! | Handshake | `HandshakeFailed`                                                |
//! | Transfer  | `MalformedPieceMessage`, `PieceHashMismatch`, `PeerChokedMidTransfer` |
//! | Transport | `PeerTimeout`, `PeerStalled`, `PeerConnection`, `SessionNotReady` |

use crate::session::SessionState;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bencode syntax violation at the given byte offset.
    #[error("malformed bencode at offset {offset}: {reason}")]
    MalformedInput { offset: usize, reason: String },

    /// Well-formed bencode that lacks or mistypes a required torrent field.
    #[error("invalid torrent schema: {0}")]
    SchemaError(String),

    /// Piece count or length arithmetic is inconsistent.
    #[error("invalid torrent metadata: {0}")]
    InvalidMetadata(String),

    #[error("could not reach tracker: {0}")]
    TrackerUnreachable(#[source] reqwest::Error),

    #[error("unexpected tracker response: {0}")]
    TrackerProtocolError(String),

    #[error("compact peer list has invalid length {0} (not a multiple of 6)")]
    MalformedPeerList(usize),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("malformed piece message: {0}")]
    MalformedPieceMessage(String),

    #[error("piece {index} failed hash verification")]
    PieceHashMismatch { index: u32 },

    #[error("peer choked us while piece {index} was in flight")]
    PeerChokedMidTransfer { index: u32 },

    #[error("peer did not respond within {0:?}")]
    PeerTimeout(std::time::Duration),

    #[error("peer sent {count} messages without the expected {waiting_for}")]
    PeerStalled {
        waiting_for: &'static str,
        count: usize,
    },

    #[error("peer connection failed: {0}")]
    PeerConnection(#[source] std::io::Error),

    #[error("operation not allowed while session is {0:?}")]
    SessionNotReady(SessionState),
}

impl Error {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Error::MalformedInput {
            offset,
            reason: reason.into(),
        }
    }
}
