//! # Download Orchestration
//!
//! Downloads a whole torrent from a single peer session:
//!
//! 1. **Validate** the piece layout before touching the network
//! 2. **Download** pieces strictly in index order through the piece engine
//! 3. **Assemble** each verified piece at its offset in the file buffer
//!
//! The first failure aborts the download; no partial buffer is returned.
//! Each piece owns its buffer until verified and lands in a disjoint range of
//! the output, so several sessions could share this loop through a piece
//! queue without further locking.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::peer::PeerAddress;
use crate::piece::*;
use crate::session::PeerSession;
use crate::torrent::TorrentMetadata;

use indicatif::{ProgressBar, ProgressStyle};

use std::io::{Read, Write};
use std::net::TcpStream;

/// Connect to a peer and drive the session until requests are allowed.
pub fn open_session(
    metadata: &TorrentMetadata,
    peer: PeerAddress,
    config: &ClientConfig,
) -> Result<PeerSession<TcpStream>> {
    let mut session = PeerSession::connect(peer, *metadata.info_hash(), config)?;
    if let Err(e) = session.establish() {
        session.shutdown();
        return Err(e);
    }

    Ok(session)
}

/// Download and verify one piece, using the torrent's layout and hashes.
pub fn download_piece_verified<S: Read + Write>(
    session: &mut PeerSession<S>,
    metadata: &TorrentMetadata,
    index: u32,
) -> Result<Vec<u8>> {
    let length = metadata.piece_len(index)?;
    let hash = *metadata.piece_hash(index)?;

    download_piece(session, PieceWork::new(index, hash, length))
}

/// Download every piece and return the assembled content.
///
/// # Errors
///
/// Returns [`Error::InvalidMetadata`] before any request is sent if the
/// piece count and total length disagree; otherwise the first piece or
/// session failure.
pub fn download_all<S: Read + Write>(
    session: &mut PeerSession<S>,
    metadata: &TorrentMetadata,
    progress: &ProgressBar,
) -> Result<Vec<u8>> {
    let nb_pieces = metadata.piece_count();
    let length = usize::try_from(metadata.length())
        .map_err(|_| Error::InvalidMetadata("content does not fit in memory".into()))?;

    if nb_pieces == 0 {
        if length != 0 {
            return Err(Error::InvalidMetadata(format!(
                "{} bytes of content but no pieces",
                length
            )));
        }
        return Ok(vec![]);
    }
    // The last piece carries the whole consistency check
    metadata.piece_len(nb_pieces - 1)?;

    info!(
        "Downloading {:?} ({} pieces) from peer {}",
        metadata.name(),
        nb_pieces,
        session.peer()
    );

    let mut data: Vec<u8> = vec![0; length];
    for index in 0..nb_pieces {
        let piece = download_piece_verified(session, metadata, index)?;

        let begin = metadata.piece_offset(index) as usize;
        data[begin..begin + piece.len()].copy_from_slice(&piece);

        progress.inc(piece.len() as u64);
    }

    progress.finish();

    Ok(data)
}

/// Progress bar over the content length, in bytes.
pub fn progress_bar(length: u64) -> ProgressBar {
    let pb = ProgressBar::new(length);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} {bytes}/{total_bytes} [{bar:40.cyan/blue}] {percent}%")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}
