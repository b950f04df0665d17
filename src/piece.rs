//! # Piece Engine
//!
//! Pieces are the verification units of the torrent data, typically
//! 256KB-1MB in size. They are downloaded in smaller blocks (16KB).
//!
//! ## Piece Download Process
//!
//! 1. **Split**: the piece is cut into `ceil(length / 16384)` blocks, the last
//!    one possibly shorter
//! 2. **Pipeline**: every REQUEST is sent up front to hide round-trip latency
//! 3. **Assemble**: PIECE messages are copied into the buffer at their
//!    `begin` offset, in whatever order they arrive
//! 4. **Verify**: the SHA-1 of the assembled buffer must match the hash from
//!    the torrent metadata

use crate::error::{Error, Result};
use crate::message::*;
use crate::session::PeerSession;
use crate::torrent::PieceHash;

use sha1::{Digest, Sha1};

use std::io::{Read, Write};

// Standard block size for piece downloads (16KB)
pub const BLOCK_SIZE_MAX: u32 = 16384;

/// Tracks the download state of a single piece.
#[derive(Debug, Clone)]
pub struct PieceWork {
    /// Zero-based index of this piece in the torrent
    pub index: u32,
    /// SHA-1 hash of the piece for verification
    pub hash: PieceHash,
    /// Actual length of the piece in bytes
    pub length: u32,
    /// Buffer the blocks are assembled into
    data: Vec<u8>,
    /// Which blocks have been stored
    received: Vec<bool>,
    /// Total bytes stored so far
    downloaded: u32,
}

impl PieceWork {
    /// Creates a zero-filled piece buffer of `length` bytes.
    pub fn new(index: u32, hash: PieceHash, length: u32) -> PieceWork {
        let blocks = length.div_ceil(BLOCK_SIZE_MAX) as usize;
        PieceWork {
            index,
            hash,
            length,
            data: vec![0; length as usize],
            received: vec![false; blocks],
            downloaded: 0,
        }
    }

    pub fn block_count(&self) -> u32 {
        self.received.len() as u32
    }

    /// Offset and length of a block.
    pub fn block_range(&self, block: u32) -> (u32, u32) {
        let begin = block * BLOCK_SIZE_MAX;
        (begin, BLOCK_SIZE_MAX.min(self.length - begin))
    }

    pub fn downloaded(&self) -> u32 {
        self.downloaded
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded == self.length
    }

    /// Store a received block.
    ///
    /// # Returns
    ///
    /// `false` if the block had already been stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPieceMessage`] if the block belongs to another
    /// piece or does not match a requested block exactly.
    pub fn add_block(&mut self, block: &Block) -> Result<bool> {
        if block.index != self.index {
            return Err(Error::MalformedPieceMessage(format!(
                "got a block of piece {} while downloading piece {}",
                block.index, self.index
            )));
        }

        if block.begin % BLOCK_SIZE_MAX != 0 || block.begin >= self.length {
            return Err(Error::MalformedPieceMessage(format!(
                "offset {} is not a requested block of piece {}",
                block.begin, self.index
            )));
        }

        let block_index = block.begin / BLOCK_SIZE_MAX;
        let (begin, length) = self.block_range(block_index);
        if block.data.len() != length as usize {
            return Err(Error::MalformedPieceMessage(format!(
                "block at offset {} of piece {} is {} bytes, requested {}",
                begin,
                self.index,
                block.data.len(),
                length
            )));
        }

        if self.received[block_index as usize] {
            return Ok(false);
        }

        let begin = begin as usize;
        self.data[begin..begin + length as usize].copy_from_slice(block.data);
        self.received[block_index as usize] = true;
        self.downloaded += length;

        Ok(true)
    }

    /// Check the assembled buffer against the expected hash.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PieceHashMismatch`]; the partial buffer is dropped.
    pub fn verify(self) -> Result<Vec<u8>> {
        let hash: PieceHash = Sha1::digest(&self.data).into();
        if hash != self.hash {
            warn!(
                "Piece {} hashed to {}, expected {}",
                self.index,
                hex::encode(hash),
                hex::encode(self.hash)
            );
            return Err(Error::PieceHashMismatch { index: self.index });
        }

        info!("Successfully verified integrity of piece {}", self.index);

        Ok(self.data)
    }
}

/// Download and verify one piece over an unchoked session.
///
/// # Errors
///
/// - [`Error::SessionNotReady`] unless the session is `Unchoked`
/// - [`Error::PeerChokedMidTransfer`] if the peer chokes before the piece
///   is complete
/// - [`Error::MalformedPieceMessage`] for a short PIECE, or one that does not
///   match a requested block of this piece. Blocks of other pieces are skipped.
/// - [`Error::PieceHashMismatch`] if the assembled piece is corrupt
pub fn download_piece<S: Read + Write>(
    session: &mut PeerSession<S>,
    mut piece_work: PieceWork,
) -> Result<Vec<u8>> {
    session.start_requests()?;

    if !session.has_piece(piece_work.index) {
        warn!(
            "Peer {} did not announce piece {}, requesting anyway",
            session.peer(),
            piece_work.index
        );
    }

    // Send all requests up front
    for block in 0..piece_work.block_count() {
        let (begin, length) = piece_work.block_range(block);
        session.send_request(piece_work.index, begin, length)?;
    }

    let mut ignored = 0;

    while !piece_work.is_complete() {
        let payload = match session.read_message()? {
            Message::Frame {
                id: MESSAGE_PIECE,
                payload,
            } => payload,
            Message::Frame {
                id: MESSAGE_CHOKE, ..
            } => {
                session.choked();
                return Err(Error::PeerChokedMidTransfer {
                    index: piece_work.index,
                });
            }
            _ => {
                skip_message(session, &mut ignored)?;
                continue;
            }
        };

        let block = parse_piece(&payload)?;
        if block.index != piece_work.index {
            // Late answer to a request for an earlier piece
            debug!(
                "Ignore block {} of piece {} while downloading piece {}",
                block.begin, block.index, piece_work.index
            );
            skip_message(session, &mut ignored)?;
            continue;
        }
        ignored = 0;

        if piece_work.add_block(&block)? {
            debug!(
                "Download piece {} [{}:{}] from peer {}",
                block.index,
                block.begin,
                block.begin as usize + block.data.len(),
                session.peer()
            );
        } else {
            debug!(
                "Ignore duplicate block {} of piece {}",
                block.begin, block.index
            );
        }
    }

    session.finish_requests();
    info!("Successfully downloaded piece {}", piece_work.index);

    piece_work.verify()
}

/// Count a message that does not advance the piece.
fn skip_message<S: Read + Write>(session: &mut PeerSession<S>, ignored: &mut usize) -> Result<()> {
    *ignored += 1;
    if *ignored > session.max_ignored_messages() {
        session.close();
        return Err(Error::PeerStalled {
            waiting_for: "PIECE",
            count: session.max_ignored_messages(),
        });
    }

    Ok(())
}
