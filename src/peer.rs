//! # Peer Addresses
//!
//! Peers are discovered through the tracker, which answers with a compact
//! binary list of IPv4 endpoints.
//!
//! ## Compact Peer Format
//!
//! The compact format consists of 6-byte entries:
//!
//! ```text
//! <IP: 4 bytes><Port: 2 bytes>
//! ```
//!
//! - IP address in network byte order
//! - Port number in network byte order (big-endian)

use crate::error::{Error, Result};

use byteorder::{BigEndian, ReadBytesExt};

use std::fmt;
use std::io::Cursor;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

const PEER_SIZE: usize = 6;

/// Network endpoint of a peer in the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    /// IPv4 address of the peer
    pub ip: Ipv4Addr,
    /// Port number for connecting to the peer
    pub port: u16,
}

impl PeerAddress {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        PeerAddress { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for PeerAddress {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let addr: SocketAddrV4 = s.parse()?;
        Ok(PeerAddress::new(*addr.ip(), addr.port()))
    }
}

/// Parses a compact peer list into peer addresses.
///
/// # Arguments
///
/// * `tracker_peers` - Compact binary peer list where each peer is 6 bytes:
///   - Bytes 0-3: IPv4 address
///   - Bytes 4-5: Port number (big-endian)
///
/// # Errors
///
/// Returns [`Error::MalformedPeerList`] if the length is not a multiple of 6.
pub fn parse_compact_peers(tracker_peers: &[u8]) -> Result<Vec<PeerAddress>> {
    // Check tracker peers are valid
    if tracker_peers.len() % PEER_SIZE != 0 {
        return Err(Error::MalformedPeerList(tracker_peers.len()));
    }

    let mut peers = Vec::with_capacity(tracker_peers.len() / PEER_SIZE);
    for entry in tracker_peers.chunks_exact(PEER_SIZE) {
        let ip = Ipv4Addr::new(entry[0], entry[1], entry[2], entry[3]);

        let mut port_cursor = Cursor::new(&entry[4..6]);
        let port = port_cursor
            .read_u16::<BigEndian>()
            .map_err(|_| Error::MalformedPeerList(tracker_peers.len()))?;

        peers.push(PeerAddress::new(ip, port));
    }

    Ok(peers)
}
