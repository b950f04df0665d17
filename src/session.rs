//! # Peer Session
//!
//! A `PeerSession` owns one connection to one remote peer and drives the
//! peer wire protocol up to the point where block requests are allowed.
//!
//! ## Connection States
//!
//! ```text
//! Connected → HandshakeSent → HandshakeVerified → AwaitingBitfield
//!           → Interested → Unchoked ⇄ Requesting
//! ```
//!
//! Any transport failure moves the session to `Closed`; it is never reopened.
//!
//! - **AwaitingBitfield**: everything but BITFIELD is skipped
//! - **Interested**: INTERESTED was sent, everything but UNCHOKE is skipped
//! - **Requesting**: the piece engine owns the connection
//!
//! ## Framing
//!
//! TCP is a byte stream, so every read goes through `read_exact`: a frame is
//! only interpreted once its full declared length has arrived.
//!
//! ## Deadlines
//!
//! Connections opened with [`PeerSession::connect`] carry a read deadline and
//! each wait loop skips a bounded number of messages, so an unresponsive or
//! chatty peer surfaces as [`Error::PeerTimeout`] or [`Error::PeerStalled`]
//! instead of stalling the download.

use crate::config::{ClientConfig, PeerId};
use crate::error::{Error, Result};
use crate::handshake::*;
use crate::message::*;
use crate::peer::*;
use crate::torrent::InfoHash;

use byteorder::{BigEndian, ReadBytesExt};

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

// Largest frame accepted from a peer (a bitfield for ~16M pieces)
const MAX_MESSAGE_LEN: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    HandshakeSent,
    HandshakeVerified,
    AwaitingBitfield,
    Interested,
    Unchoked,
    Requesting,
    Closed,
}

/// Represents a connection to a remote BitTorrent peer.
pub struct PeerSession<S = TcpStream> {
    /// Address of the remote peer, for logging
    peer: PeerAddress,
    /// Stream connected to the peer
    conn: S,
    /// 20-byte SHA-1 hash of the torrent's info dictionary
    info_hash: InfoHash,
    /// 20-byte identifier of this client
    peer_id: PeerId,
    /// Identifier announced by the remote peer in its handshake
    remote_peer_id: Option<PeerId>,
    /// Pieces the remote peer claims to have
    bitfield: Vec<u8>,
    state: SessionState,
    read_timeout: Duration,
    max_ignored_messages: usize,
    verify_info_hash: bool,
}

impl PeerSession<TcpStream> {
    /// Open a TCP connection to a peer with the configured deadlines.
    pub fn connect(
        peer: PeerAddress,
        info_hash: InfoHash,
        config: &ClientConfig,
    ) -> Result<PeerSession<TcpStream>> {
        let conn = TcpStream::connect_timeout(&peer.socket_addr(), config.connect_timeout)
            .map_err(|e| match e.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                    Error::PeerTimeout(config.connect_timeout)
                }
                _ => Error::PeerConnection(e),
            })?;

        conn.set_read_timeout(Some(config.read_timeout))
            .map_err(Error::PeerConnection)?;
        conn.set_write_timeout(Some(config.read_timeout))
            .map_err(Error::PeerConnection)?;

        info!("Connected to peer {}", peer);

        Ok(PeerSession::new(conn, peer, info_hash, config))
    }

    /// Close the connection.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.conn.shutdown(Shutdown::Both) {
            debug!("Error shutting down connection to {}: {}", self.peer, e);
        }
        self.state = SessionState::Closed;
    }
}

impl<S: Read + Write> PeerSession<S> {
    /// Wrap an already connected stream.
    pub fn new(conn: S, peer: PeerAddress, info_hash: InfoHash, config: &ClientConfig) -> Self {
        PeerSession {
            peer,
            conn,
            info_hash,
            peer_id: config.peer_id,
            remote_peer_id: None,
            bitfield: vec![],
            state: SessionState::Connected,
            read_timeout: config.read_timeout,
            max_ignored_messages: config.max_ignored_messages,
            verify_info_hash: config.verify_info_hash,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    /// Peer id received during the handshake.
    pub fn remote_peer_id(&self) -> Option<&PeerId> {
        self.remote_peer_id.as_ref()
    }

    pub fn get_ref(&self) -> &S {
        &self.conn
    }

    /// Messages a wait loop may skip before giving up on the peer.
    pub fn max_ignored_messages(&self) -> usize {
        self.max_ignored_messages
    }

    /// Drive the session from `Connected` to `Unchoked`.
    pub fn establish(&mut self) -> Result<()> {
        self.handshake()?;
        self.await_bitfield()?;
        self.send_interested()?;
        self.await_unchoke()
    }

    /// Performs the handshake and returns the remote peer id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeFailed`] if the peer closes the connection
    /// before 68 bytes arrive, answers with another protocol, or (unless
    /// disabled in the config) echoes a different info hash.
    pub fn handshake(&mut self) -> Result<PeerId> {
        self.expect_state(SessionState::Connected)?;

        let handshake = Handshake::new(self.info_hash, self.peer_id);
        if let Err(e) = self.conn.write_all(&handshake.serialize()) {
            return Err(self.handshake_io_error(e));
        }
        self.state = SessionState::HandshakeSent;
        debug!("Send handshake to peer {}", self.peer);

        let mut handshake_buf = [0u8; HANDSHAKE_LEN];
        if let Err(e) = self.conn.read_exact(&mut handshake_buf) {
            return Err(self.handshake_io_error(e));
        }

        let received = match Handshake::deserialize(&handshake_buf) {
            Ok(received) => received,
            Err(e) => {
                self.state = SessionState::Closed;
                return Err(e);
            }
        };

        if received.info_hash != self.info_hash {
            if self.verify_info_hash {
                self.state = SessionState::Closed;
                return Err(Error::HandshakeFailed(format!(
                    "peer answered for info hash {}",
                    hex::encode(received.info_hash)
                )));
            }
            warn!(
                "Peer {} answered for info hash {}, continuing",
                self.peer,
                hex::encode(received.info_hash)
            );
        }

        self.remote_peer_id = Some(received.peer_id);
        self.state = SessionState::HandshakeVerified;

        info!(
            "Handshake with peer {} verified, peer id {}",
            self.peer,
            hex::encode(received.peer_id)
        );

        Ok(received.peer_id)
    }

    /// Skip messages until the peer's BITFIELD arrives and store it.
    pub fn await_bitfield(&mut self) -> Result<()> {
        self.expect_state(SessionState::HandshakeVerified)?;
        self.state = SessionState::AwaitingBitfield;

        let payload = self.await_message(MESSAGE_BITFIELD, "BITFIELD")?;
        self.bitfield = payload;

        Ok(())
    }

    /// Tell the peer we want to download.
    pub fn send_interested(&mut self) -> Result<()> {
        self.expect_state(SessionState::AwaitingBitfield)?;
        self.send_message(&Message::new(MESSAGE_INTERESTED))?;
        self.state = SessionState::Interested;

        Ok(())
    }

    /// Skip messages until the peer unchokes us.
    pub fn await_unchoke(&mut self) -> Result<()> {
        self.expect_state(SessionState::Interested)?;
        self.await_message(MESSAGE_UNCHOKE, "UNCHOKE")?;
        self.state = SessionState::Unchoked;

        Ok(())
    }

    /// Checks if the peer announced a piece in its bitfield or a HAVE.
    ///
    /// Bit 7 of byte 0 is piece 0.
    pub fn has_piece(&self, index: u32) -> bool {
        let byte_index = (index / 8) as usize;
        let offset = index % 8;

        match self.bitfield.get(byte_index) {
            Some(byte) => byte >> (7 - offset) & 1 != 0,
            None => false,
        }
    }

    /// Record a HAVE. Indices outside the announced bitfield are dropped.
    fn set_piece(&mut self, index: u32) {
        let byte_index = (index / 8) as usize;
        let offset = index % 8;

        match self.bitfield.get_mut(byte_index) {
            Some(byte) => *byte |= 1 << (7 - offset),
            None => debug!(
                "Ignore HAVE {} from peer {} outside its {} byte bitfield",
                index,
                self.peer,
                self.bitfield.len()
            ),
        }
    }

    /// Enter `Requesting`; only legal once unchoked.
    pub fn start_requests(&mut self) -> Result<()> {
        self.expect_state(SessionState::Unchoked)?;
        self.state = SessionState::Requesting;
        Ok(())
    }

    /// Back to `Unchoked` after a piece completed.
    pub fn finish_requests(&mut self) {
        if self.state == SessionState::Requesting {
            self.state = SessionState::Unchoked;
        }
    }

    /// Record that the peer choked us.
    pub fn choked(&mut self) {
        info!("Receive CHOKE from peer {}", self.peer);
        if self.state != SessionState::Closed {
            self.state = SessionState::Interested;
        }
    }

    /// Sends a REQUEST message for one block.
    pub fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<()> {
        self.expect_state(SessionState::Requesting)?;

        debug!(
            "Send REQUEST for piece {} [{}:{}] to peer {}",
            index,
            begin,
            begin + length,
            self.peer
        );

        self.send_message(&Message::request(index, begin, length))
    }

    /// Reads one complete frame from the peer.
    ///
    /// # Errors
    ///
    /// - [`Error::PeerTimeout`] if the read deadline expires
    /// - [`Error::PeerConnection`] on any other transport failure or an
    ///   oversized frame
    pub fn read_message(&mut self) -> Result<Message> {
        let message_len = match self.conn.read_u32::<BigEndian>() {
            Ok(len) => len as usize,
            Err(e) => return Err(self.io_error(e)),
        };

        // If message length is 0, it's a keep-alive
        if message_len == 0 {
            debug!("Receive KEEP_ALIVE from peer {}", self.peer);
            return Ok(Message::KeepAlive);
        }

        if message_len > MAX_MESSAGE_LEN {
            return Err(self.io_error(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("peer announced a {} byte message", message_len),
            )));
        }

        let mut message_buf = vec![0u8; message_len];
        if let Err(e) = self.conn.read_exact(&mut message_buf) {
            return Err(self.io_error(e));
        }

        let message = deserialize_message(&message_buf);
        if let Some(id) = message.id() {
            debug!(
                "Receive {} ({} bytes) from peer {}",
                message_name(id),
                message_len,
                self.peer
            );
        }

        Ok(message)
    }

    /// Serialize and send one message.
    pub fn send_message(&mut self, message: &Message) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::SessionNotReady(self.state));
        }

        if let Some(id) = message.id() {
            if id != MESSAGE_REQUEST {
                info!("Send {} to peer {}", message_name(id), self.peer);
            }
        }

        let result = self
            .conn
            .write_all(&message.serialize())
            .and_then(|_| self.conn.flush());
        if let Err(e) = result {
            return Err(self.io_error(e));
        }

        Ok(())
    }

    /// Mark the session closed without touching the stream.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Read until a message with `id` arrives and return its payload.
    fn await_message(&mut self, id: MessageId, waiting_for: &'static str) -> Result<Vec<u8>> {
        for _ in 0..=self.max_ignored_messages {
            match self.read_message()? {
                Message::Frame { id: got, payload } if got == id => {
                    info!("Receive {} from peer {}", waiting_for, self.peer);
                    return Ok(payload);
                }
                Message::Frame {
                    id: MESSAGE_HAVE,
                    payload,
                } if payload.len() == 4 => {
                    let index = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                    self.set_piece(index);
                }
                Message::Frame { id: other, .. } => {
                    debug!(
                        "Ignore {} from peer {} while waiting for {}",
                        message_name(other),
                        self.peer,
                        waiting_for
                    );
                }
                Message::KeepAlive => {}
            }
        }

        self.state = SessionState::Closed;
        Err(Error::PeerStalled {
            waiting_for,
            count: self.max_ignored_messages,
        })
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state != expected {
            return Err(Error::SessionNotReady(self.state));
        }
        Ok(())
    }

    fn io_error(&mut self, e: io::Error) -> Error {
        self.state = SessionState::Closed;
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                warn!("Peer {} timed out", self.peer);
                Error::PeerTimeout(self.read_timeout)
            }
            _ => {
                warn!("Connection to peer {} failed: {}", self.peer, e);
                Error::PeerConnection(e)
            }
        }
    }

    fn handshake_io_error(&mut self, e: io::Error) -> Error {
        match self.io_error(e) {
            Error::PeerConnection(e) => Error::HandshakeFailed(e.to_string()),
            other => other,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    use std::net::{Ipv4Addr, TcpListener};
    use std::thread;

    const INFO_HASH: InfoHash = [7; 20];

    #[test]
    fn test_establish_reaches_unchoked() {
        let mut session = session(unchoking_script(INFO_HASH), INFO_HASH);
        session.establish().unwrap();

        assert_eq!(session.state(), SessionState::Unchoked);
        assert_eq!(session.remote_peer_id(), Some(&REMOTE_PEER_ID));
        assert!(session.has_piece(12));
        assert!(session.has_piece(15));
        assert!(!session.has_piece(16));

        let output = &session.get_ref().output;
        assert_eq!(output.len(), HANDSHAKE_LEN + 5);
        assert_eq!(&output[..HANDSHAKE_LEN], &Handshake::new(INFO_HASH, session.peer_id).serialize());
        assert_eq!(&output[HANDSHAKE_LEN..], &[0, 0, 0, 1, MESSAGE_INTERESTED]);
    }

    #[test]
    fn test_have_outside_bitfield_ignored() {
        let mut script = handshake_reply(INFO_HASH);
        script.extend(frame(MESSAGE_HAVE, &[0, 0, 0, 3]));
        script.extend(frame(MESSAGE_BITFIELD, &[0x80]));
        script.extend(frame(MESSAGE_HAVE, &u32::MAX.to_be_bytes()));
        script.extend(frame(MESSAGE_HAVE, &[0, 0, 0, 8]));
        script.extend(frame(MESSAGE_UNCHOKE, &[]));

        let mut session = session(script, INFO_HASH);
        session.establish().unwrap();

        assert_eq!(session.state(), SessionState::Unchoked);
        assert_eq!(session.bitfield, vec![0x80]);
        assert!(session.has_piece(0));
        assert!(!session.has_piece(3));
        assert!(!session.has_piece(8));
        assert!(!session.has_piece(u32::MAX));
    }

    #[test]
    fn test_handshake_short_read() {
        let mut script = handshake_reply(INFO_HASH);
        script.truncate(40);
        let mut session = session(script, INFO_HASH);

        assert!(matches!(session.handshake(), Err(Error::HandshakeFailed(_))));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_handshake_rejects_other_info_hash() {
        let mut session = session(handshake_reply([9; 20]), INFO_HASH);
        assert!(matches!(session.handshake(), Err(Error::HandshakeFailed(_))));
    }

    #[test]
    fn test_handshake_lenient_info_hash() {
        let mut config = ClientConfig::new();
        config.verify_info_hash = false;
        let mut session = PeerSession::new(
            ScriptedPeer::new(handshake_reply([9; 20])),
            PeerAddress::new(Ipv4Addr::LOCALHOST, 6881),
            INFO_HASH,
            &config,
        );

        assert_eq!(session.handshake().unwrap(), REMOTE_PEER_ID);
        assert_eq!(session.state(), SessionState::HandshakeVerified);
    }

    #[test]
    fn test_wait_loop_is_bounded() {
        let mut config = ClientConfig::new();
        config.max_ignored_messages = 3;

        let mut script = handshake_reply(INFO_HASH);
        for _ in 0..10 {
            script.extend(frame(MESSAGE_CHOKE, &[]));
        }
        let mut session = PeerSession::new(
            ScriptedPeer::new(script),
            PeerAddress::new(Ipv4Addr::LOCALHOST, 6881),
            INFO_HASH,
            &config,
        );
        session.handshake().unwrap();

        assert!(matches!(
            session.await_bitfield(),
            Err(Error::PeerStalled {
                waiting_for: "BITFIELD",
                count: 3
            })
        ));
    }

    #[test]
    fn test_connection_closed_while_waiting() {
        let mut script = handshake_reply(INFO_HASH);
        script.extend(frame(MESSAGE_BITFIELD, &[0x80]));
        script.extend(&[0, 0, 0, 9, MESSAGE_PIECE]);
        let mut session = session(script, INFO_HASH);
        session.handshake().unwrap();
        session.await_bitfield().unwrap();
        session.send_interested().unwrap();

        assert!(matches!(
            session.await_unchoke(),
            Err(Error::PeerConnection(_))
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_out_of_order_operations_rejected() {
        let mut session = session(unchoking_script(INFO_HASH), INFO_HASH);
        assert!(matches!(
            session.send_interested(),
            Err(Error::SessionNotReady(SessionState::Connected))
        ));
        assert!(matches!(
            session.start_requests(),
            Err(Error::SessionNotReady(SessionState::Connected))
        ));
    }

    #[test]
    fn test_connect_read_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept and stay silent
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(stream);
        });

        let mut config = ClientConfig::new();
        config.read_timeout = Duration::from_millis(100);
        let peer = PeerAddress::new(Ipv4Addr::LOCALHOST, addr.port());
        let mut session = PeerSession::connect(peer, INFO_HASH, &config).unwrap();

        assert!(matches!(session.handshake(), Err(Error::PeerTimeout(_))));
        session.shutdown();
        assert_eq!(session.state(), SessionState::Closed);

        handle.join().unwrap();
    }
}
