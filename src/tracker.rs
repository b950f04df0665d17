//! # Tracker Client
//!
//! Announces the torrent to its HTTP tracker and returns the peers the
//! tracker knows about.
//!
//! ## Announce Request
//!
//! A GET on the announce URL with the query parameters:
//!
//! - **info_hash**: raw 20-byte info hash, every byte percent-encoded
//! - **peer_id**: raw 20-byte client id, every byte percent-encoded
//! - **port**, **uploaded=0**, **downloaded=0**, **left=<length>**, **compact=1**
//!
//! ## Announce Response
//!
//! A bencoded dictionary whose `peers` key holds the compact peer list. A
//! `failure reason` key replaces everything else when the tracker refuses.

use crate::bencode::{self, Value};
use crate::config::{ClientConfig, PeerId};
use crate::error::{Error, Result};
use crate::peer::*;
use crate::torrent::TorrentMetadata;

use url::Url;

pub struct Tracker {
    client: reqwest::blocking::Client,
    peer_id: PeerId,
    port: u16,
}

impl Tracker {
    /// Build a tracker client from the run configuration.
    pub fn new(config: &ClientConfig) -> Result<Tracker> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.connect_timeout)
            .build()
            .map_err(Error::TrackerUnreachable)?;

        Ok(Tracker {
            client,
            peer_id: config.peer_id,
            port: config.port,
        })
    }

    /// Announce URL for this client.
    pub fn build_announce_url(&self, metadata: &TorrentMetadata) -> Result<String> {
        build_announce_url(metadata, &self.peer_id, self.port)
    }

    /// Request peers from the tracker.
    ///
    /// # Errors
    ///
    /// - [`Error::TrackerUnreachable`] on any transport failure
    /// - [`Error::TrackerProtocolError`] if the body is not a bencoded
    ///   dictionary with a `peers` byte string
    /// - [`Error::MalformedPeerList`] if `peers` is not a multiple of 6 bytes
    pub fn announce(&self, metadata: &TorrentMetadata) -> Result<Vec<PeerAddress>> {
        let url = self.build_announce_url(metadata)?;
        info!("Announce to tracker {}", metadata.announce());

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(Error::TrackerUnreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::TrackerProtocolError(format!(
                "tracker answered with HTTP {}",
                status
            )));
        }

        let body = response.bytes().map_err(Error::TrackerUnreachable)?;
        let peers = parse_announce_response(&body)?;

        info!("Tracker returned {} peers", peers.len());

        Ok(peers)
    }
}

/// Build tracker URL.
///
/// # Arguments
///
/// * `metadata` - Torrent being announced.
/// * `peer_id` - 20-byte unique ID of this client.
/// * `port` - Port number reported to the tracker.
///
pub fn build_announce_url(
    metadata: &TorrentMetadata,
    peer_id: &PeerId,
    port: u16,
) -> Result<String> {
    // Parse tracker URL from torrent
    let base_url = Url::parse(metadata.announce())
        .map_err(|e| Error::SchemaError(format!("invalid announce url: {}", e)))?;
    if base_url.scheme() != "http" && base_url.scheme() != "https" {
        return Err(Error::SchemaError(format!(
            "unsupported tracker scheme '{}'",
            base_url.scheme()
        )));
    }

    // Build query string manually, url would re-encode the binary fields
    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
        percent_encode_binary(metadata.info_hash()),
        percent_encode_binary(peer_id),
        port,
        metadata.length()
    );

    let mut url = base_url.to_string();
    if base_url.query().is_some() {
        url.push('&');
    } else {
        url.push('?');
    }
    url.push_str(&query);

    Ok(url)
}

/// Each byte is encoded as %XX, even unreserved characters.
fn percent_encode_binary(data: &[u8]) -> String {
    const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";
    let mut encoded = String::with_capacity(data.len() * 3);

    for &byte in data {
        encoded.push('%');
        encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        encoded.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
    }

    encoded
}

/// Extract the peer list from a bencoded tracker response.
pub fn parse_announce_response(body: &[u8]) -> Result<Vec<PeerAddress>> {
    let response = match bencode::decode(body).map(Value::into_dict) {
        Ok(Some(d)) => d,
        Ok(None) => {
            return Err(Error::TrackerProtocolError(
                "response is not a dictionary".into(),
            ))
        }
        Err(e) => {
            return Err(Error::TrackerProtocolError(format!(
                "response is not bencoded: {}",
                e
            )))
        }
    };

    if let Some(reason) = response.get(b"failure reason".as_slice()) {
        let reason = match reason.as_str() {
            Some(text) => text.to_string(),
            None => format!("{:?}", reason),
        };
        return Err(Error::TrackerProtocolError(format!(
            "tracker refused announce: {}",
            reason
        )));
    }

    if let Some(interval) = response.get(b"interval".as_slice()).and_then(Value::as_integer) {
        debug!("Tracker re-announce interval is {}s", interval);
    }

    match response.get(b"peers".as_slice()) {
        Some(Value::Bytes(peers)) => parse_compact_peers(peers),
        Some(_) => Err(Error::TrackerProtocolError(
            "'peers' is not a compact byte string".into(),
        )),
        None => Err(Error::TrackerProtocolError("response has no 'peers'".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::tests::sample_torrent_with_announce;

    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpListener};
    use std::thread;

    fn metadata_for(announce: &str) -> TorrentMetadata {
        let buf = sample_torrent_with_announce(announce, 92063, 32768, &[0xab; 60]);
        TorrentMetadata::from_bytes(&buf).unwrap()
    }

    /// Serve one canned HTTP response and hand back the request line.
    fn serve_once(body: Vec<u8>) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.ends_with(b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();

            let request = String::from_utf8_lossy(&request).into_owned();
            request.lines().next().unwrap_or_default().to_string()
        });

        (format!("http://{}/announce", addr), handle)
    }

    #[test]
    fn test_percent_encode_every_byte() {
        assert_eq!(percent_encode_binary(b"aZ0-"), "%61%5A%30%2D");
        assert_eq!(percent_encode_binary(&[0x00, 0xff]), "%00%FF");
    }

    #[test]
    fn test_build_announce_url() {
        let metadata = metadata_for("http://tracker.example/announce");
        let url = build_announce_url(&metadata, b"-SL0100-123456789012", 6881).unwrap();

        let expected_hash: String = metadata
            .info_hash()
            .iter()
            .map(|b| format!("%{:02X}", b))
            .collect();
        assert_eq!(
            url,
            format!(
                "http://tracker.example/announce?info_hash={}&peer_id=%2D%53%4C%30%31%30%30%2D%31%32%33%34%35%36%37%38%39%30%31%32&port=6881&uploaded=0&downloaded=0&left=92063&compact=1",
                expected_hash
            )
        );
    }

    #[test]
    fn test_build_announce_url_keeps_existing_query() {
        let metadata = metadata_for("http://tracker.example/announce?passkey=abc");
        let url = build_announce_url(&metadata, &[0u8; 20], 6881).unwrap();
        assert!(url.starts_with("http://tracker.example/announce?passkey=abc&info_hash=%"));
    }

    #[test]
    fn test_build_announce_url_rejects_udp() {
        let metadata = metadata_for("udp://tracker.example:80");
        assert!(matches!(
            build_announce_url(&metadata, &[0u8; 20], 6881),
            Err(Error::SchemaError(_))
        ));
    }

    #[test]
    fn test_parse_announce_response() {
        let body = b"d8:intervali60e5:peers12:\xa5\xe8\x21\x4d\xc9\x0b\xb2\x3e\x55\x14\xc9\x0be";
        let peers = parse_announce_response(body).unwrap();
        assert_eq!(
            peers,
            vec![
                PeerAddress::new(Ipv4Addr::new(165, 232, 33, 77), 51467),
                PeerAddress::new(Ipv4Addr::new(178, 62, 85, 20), 51467),
            ]
        );
    }

    #[test]
    fn test_parse_announce_response_errors() {
        assert!(matches!(
            parse_announce_response(b"<html>oops</html>"),
            Err(Error::TrackerProtocolError(_))
        ));
        assert!(matches!(
            parse_announce_response(b"li1ee"),
            Err(Error::TrackerProtocolError(_))
        ));
        assert!(matches!(
            parse_announce_response(b"d8:intervali60ee"),
            Err(Error::TrackerProtocolError(_))
        ));
        assert!(matches!(
            parse_announce_response(b"d5:peerslee"),
            Err(Error::TrackerProtocolError(_))
        ));
        assert!(matches!(
            parse_announce_response(b"d14:failure reason7:unknowne"),
            Err(Error::TrackerProtocolError(reason)) if reason.contains("unknown")
        ));
        assert!(matches!(
            parse_announce_response(b"d5:peers5:abcdee"),
            Err(Error::MalformedPeerList(5))
        ));
    }

    #[test]
    fn test_announce_over_http() {
        let body = b"d8:intervali60e5:peers6:\x7f\x00\x00\x01\x1a\xe1e".to_vec();
        let (announce, handle) = serve_once(body);

        let metadata = metadata_for(&announce);
        let tracker = Tracker::new(&ClientConfig::new()).unwrap();
        let peers = tracker.announce(&metadata).unwrap();

        assert_eq!(peers, vec![PeerAddress::new(Ipv4Addr::LOCALHOST, 6881)]);

        let request_line = handle.join().unwrap();
        assert!(request_line.starts_with("GET /announce?info_hash=%"));
        assert!(request_line.contains("&left=92063&compact=1"));
    }

    #[test]
    fn test_announce_unreachable() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let metadata = metadata_for(&format!("http://127.0.0.1:{}/announce", port));
        let tracker = Tracker::new(&ClientConfig::new()).unwrap();
        assert!(matches!(
            tracker.announce(&metadata),
            Err(Error::TrackerUnreachable(_))
        ));
    }
}
