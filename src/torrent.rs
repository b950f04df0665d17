//! # Torrent Metadata
//!
//! This module turns a decoded `.torrent` dictionary into a typed view and
//! derives the torrent's identity, the info hash.
//!
//! ## Torrent File Format
//!
//! - **announce**: Tracker URL for peer discovery
//! - **info**: Dictionary with file information and piece hashes
//!   - **length**: Total file size
//!   - **name**: Suggested filename
//!   - **piece length**: Size of each piece (typically 256KB-1MB)
//!   - **pieces**: Concatenated 20-byte SHA-1 hashes, one per piece
//!
//! ## Info Hash
//!
//! The info hash is the SHA-1 of the canonical re-encoding of the `info`
//! dictionary exactly as it appears in the file (every key, not only the
//! ones this client reads). It keys the torrent at the tracker and in the
//! peer handshake.
//!
//! ## Piece Layout
//!
//! Every piece is `piece length` bytes except the last, which holds the
//! remainder: `length - (count - 1) * piece length`.

use crate::bencode::{self, Dictionary, Value};
use crate::error::{Error, Result};

use sha1::{Digest, Sha1};

// Size of SHA-1 hash in bytes
pub const SHA1_HASH_SIZE: usize = 20;

pub type InfoHash = [u8; SHA1_HASH_SIZE];
pub type PieceHash = [u8; SHA1_HASH_SIZE];

/// Typed view over a single-file `.torrent`.
#[derive(Debug, Clone)]
pub struct TorrentMetadata {
    /// Tracker announce URL
    announce: String,
    /// Suggested filename, informational only
    name: String,
    /// Size of each piece in bytes (except possibly the last)
    piece_length: u32,
    /// Total size of the file in bytes
    length: u64,
    /// One 20-byte SHA-1 hash per piece, in piece order
    pieces_hashes: Vec<PieceHash>,
    /// The `info` dictionary as decoded, kept for re-encoding
    info: Dictionary,
    /// SHA-1 of the canonical encoding of `info`
    info_hash: InfoHash,
}

impl TorrentMetadata {
    /// Decode and parse the raw contents of a `.torrent` file.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Self::parse(bencode::decode(buf)?)
    }

    /// Build metadata from a decoded top-level dictionary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaError`] if `announce` is not a byte string, if
    /// `info` is not a dictionary, if `length` or `piece length` are missing or
    /// out of range, or if `pieces` is not a multiple of 20 bytes.
    pub fn parse(torrent: Value) -> Result<Self> {
        let mut torrent = torrent
            .into_dict()
            .ok_or_else(|| Error::SchemaError("torrent is not a dictionary".into()))?;

        let announce = match torrent.get(b"announce".as_slice()) {
            Some(Value::Bytes(b)) => String::from_utf8_lossy(b).into_owned(),
            Some(_) => return Err(Error::SchemaError("'announce' is not a string".into())),
            None => return Err(Error::SchemaError("missing 'announce'".into())),
        };

        let info = match torrent.remove(b"info".as_slice()) {
            Some(Value::Dict(d)) => d,
            Some(_) => return Err(Error::SchemaError("'info' is not a dictionary".into())),
            None => return Err(Error::SchemaError("missing 'info'".into())),
        };

        let length = match info.get(b"length".as_slice()) {
            Some(Value::Integer(i)) if *i >= 0 => *i as u64,
            Some(Value::Integer(i)) => {
                return Err(Error::SchemaError(format!("negative 'length' {}", i)))
            }
            Some(_) => return Err(Error::SchemaError("'length' is not an integer".into())),
            None => return Err(Error::SchemaError("missing 'length'".into())),
        };

        let name = match info.get(b"name".as_slice()) {
            Some(Value::Bytes(b)) => String::from_utf8_lossy(b).into_owned(),
            Some(_) => return Err(Error::SchemaError("'name' is not a string".into())),
            None => String::new(),
        };

        // Block offsets travel as u32 on the wire
        let piece_length = match info.get(b"piece length".as_slice()) {
            Some(Value::Integer(i)) if *i > 0 && *i <= u32::MAX as i64 => *i as u32,
            Some(Value::Integer(i)) => {
                return Err(Error::SchemaError(format!(
                    "'piece length' {} out of range",
                    i
                )))
            }
            Some(_) => {
                return Err(Error::SchemaError(
                    "'piece length' is not an integer".into(),
                ))
            }
            None => return Err(Error::SchemaError("missing 'piece length'".into())),
        };

        let pieces_hashes = match info.get(b"pieces".as_slice()) {
            Some(Value::Bytes(b)) => split_pieces_hashes(b)?,
            Some(_) => return Err(Error::SchemaError("'pieces' is not a string".into())),
            None => return Err(Error::SchemaError("missing 'pieces'".into())),
        };

        let info_hash = hash_info(&info);

        debug!(
            "Parsed torrent {:?}: {} bytes in {} pieces of {} bytes",
            name,
            length,
            pieces_hashes.len(),
            piece_length
        );

        Ok(TorrentMetadata {
            announce,
            name,
            piece_length,
            length,
            pieces_hashes,
            info,
            info_hash,
        })
    }

    pub fn announce(&self) -> &str {
        &self.announce
    }

    /// Returns the suggested filename from the torrent metadata.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    /// Total size of the content in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn info_hash(&self) -> &InfoHash {
        &self.info_hash
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// The `info` dictionary exactly as decoded.
    pub fn info(&self) -> &Dictionary {
        &self.info
    }

    pub fn pieces_hashes(&self) -> &[PieceHash] {
        &self.pieces_hashes
    }

    pub fn pieces_hashes_hex(&self) -> Vec<String> {
        self.pieces_hashes.iter().map(hex::encode).collect()
    }

    pub fn piece_count(&self) -> u32 {
        self.pieces_hashes.len() as u32
    }

    /// Expected SHA-1 hash of a piece.
    pub fn piece_hash(&self, index: u32) -> Result<&PieceHash> {
        self.pieces_hashes
            .get(index as usize)
            .ok_or_else(|| Error::InvalidMetadata(format!("no piece with index {}", index)))
    }

    /// Get the actual length of a piece.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMetadata`] if `index` is out of range, or if
    /// the last piece would be empty or longer than `piece length`, which
    /// means `pieces` and `length` disagree.
    pub fn piece_len(&self, index: u32) -> Result<u32> {
        let count = self.piece_count();
        if index >= count {
            return Err(Error::InvalidMetadata(format!(
                "piece index {} out of range (torrent has {} pieces)",
                index, count
            )));
        }

        if index + 1 < count {
            return Ok(self.piece_length);
        }

        let preceding = (count as u64 - 1) * self.piece_length as u64;
        let last = self.length as i128 - preceding as i128;
        if last <= 0 || last > self.piece_length as i128 {
            return Err(Error::InvalidMetadata(format!(
                "last piece would be {} bytes with {} pieces of {} bytes for {} total",
                last, count, self.piece_length, self.length
            )));
        }

        Ok(last as u32)
    }

    /// Get the byte offset of a piece within the content.
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length as u64
    }
}

/// Number of pieces needed to hold `length` bytes.
pub fn piece_count_for(length: u64, piece_length: u32) -> u64 {
    length.div_ceil(piece_length as u64)
}

/// SHA-1 of the canonical encoding of an `info` dictionary.
pub fn hash_info(info: &Dictionary) -> InfoHash {
    let buf = bencode::encode_dictionary_canonical(info);
    Sha1::digest(&buf).into()
}

/// Split bencoded pieces into 20-byte SHA-1 hashes.
fn split_pieces_hashes(pieces: &[u8]) -> Result<Vec<PieceHash>> {
    if pieces.len() % SHA1_HASH_SIZE != 0 {
        return Err(Error::SchemaError(format!(
            "'pieces' is {} bytes, not a multiple of {}",
            pieces.len(),
            SHA1_HASH_SIZE
        )));
    }

    let mut hashes = Vec::with_capacity(pieces.len() / SHA1_HASH_SIZE);
    for chunk in pieces.chunks_exact(SHA1_HASH_SIZE) {
        let mut hash = [0u8; SHA1_HASH_SIZE];
        hash.copy_from_slice(chunk);
        hashes.push(hash);
    }

    Ok(hashes)
}
