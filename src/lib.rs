//! # Seedling BitTorrent Core
//!
//! A minimal BitTorrent client core: bencode, torrent metadata, tracker
//! announce and a single-peer download engine.
//!
//! ## Features
//!
//! - Bencode decoding and canonical re-encoding
//! - Info hash derivation from the raw `info` dictionary
//! - HTTP tracker announce with compact peer lists
//! - Peer wire protocol up to unchoke, with read deadlines
//! - Pipelined block requests and SHA-1 piece verification
//!
//! ## Architecture
//!
//! Components are layered leaf-first:
//!
//! - **bencode**: value tree, decoder and canonical encoder
//! - **torrent**: typed metadata, info hash, piece layout
//! - **tracker** / **peer**: announce and compact peer parsing
//! - **handshake** / **message** / **session**: peer wire protocol
//! - **piece**: block pipelining, reassembly and verification
//! - **download**: sequential whole-file orchestration
//!
//! File I/O, argument parsing and output formatting live in the binary.

#[macro_use]
extern crate log;

pub mod bencode;
pub mod config;
pub mod download;
pub mod error;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod piece;
pub mod session;
pub mod torrent;
pub mod tracker;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use peer::PeerAddress;
pub use session::{PeerSession, SessionState};
pub use torrent::TorrentMetadata;
pub use tracker::Tracker;
