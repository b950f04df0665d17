//! # Client Configuration
//!
//! Per-run settings shared by the tracker client and peer sessions. A
//! `ClientConfig` is built once at startup and passed down by reference.

use rand::Rng;

use std::time::Duration;

// Default port reported to the tracker
pub const DEFAULT_PORT: u16 = 6881;

// Azureus-style client prefix of the generated peer id
const PEER_ID_PREFIX: &[u8; 8] = b"-SL0100-";

pub type PeerId = [u8; 20];

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 20-byte identifier of this client, sent to tracker and peers
    pub peer_id: PeerId,
    /// Port reported to the tracker
    pub port: u16,
    /// Deadline for opening TCP connections and tracker requests
    pub connect_timeout: Duration,
    /// Deadline for every read from a peer
    pub read_timeout: Duration,
    /// Messages tolerated while waiting for a specific message id
    pub max_ignored_messages: usize,
    /// Reject handshakes that do not echo our info hash
    pub verify_info_hash: bool,
}

impl ClientConfig {
    /// Build a configuration with a freshly generated peer id.
    pub fn new() -> Self {
        ClientConfig {
            peer_id: generate_peer_id(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(30),
            max_ignored_messages: 1024,
            verify_info_hash: true,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a peer id: client prefix followed by 12 random ASCII digits.
pub fn generate_peer_id() -> PeerId {
    let mut peer_id = [0u8; 20];
    peer_id[..PEER_ID_PREFIX.len()].copy_from_slice(PEER_ID_PREFIX);

    let mut rng = rand::thread_rng();
    for x in peer_id[PEER_ID_PREFIX.len()..].iter_mut() {
        *x = rng.gen_range(b'0'..=b'9');
    }

    peer_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_peer_id() {
        let peer_id = generate_peer_id();
        assert_eq!(&peer_id[..8], b"-SL0100-");
        assert!(peer_id[8..].iter().all(u8::is_ascii_digit));
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 6881);
        assert!(config.verify_info_hash);
        assert!(config.max_ignored_messages > 0);
    }
}
