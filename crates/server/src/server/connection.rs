//! Client connection state.

use crate::player::{PlayerId, PlayerMap};
use bytes::BytesMut;
use protocol::FRAME_DELIMITER;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;
use tracing::warn;

/// Identifier of a connection in the server's connection table.
pub type ConnId = u64;

/// A connected client.
///
/// The read half lives in a spawned reader task; dropping the connection
/// aborts that task and closes the socket.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnId,
    /// Remote address.
    pub addr: SocketAddr,
    /// Inbound byte accumulator; frames are carved off the front.
    pub buff: BytesMut,
    /// Player bound via `NICK`, if any.
    pub player: Option<PlayerId>,
    /// Timestamp of the last successfully processed frame.
    pub last_active: Instant,
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

impl Connection {
    pub fn new(id: ConnId, addr: SocketAddr, writer: OwnedWriteHalf, reader: JoinHandle<()>) -> Self {
        Self {
            id,
            addr,
            buff: BytesMut::new(),
            player: None,
            last_active: Instant::now(),
            writer,
            reader,
        }
    }

    /// The bound player's nickname, or the peer address before `NICK`.
    pub fn display_name(&self, players: &PlayerMap) -> String {
        self.player
            .and_then(|id| players.get(&id))
            .map(|player| player.nickname.clone())
            .unwrap_or_else(|| self.addr.to_string())
    }

    /// Refresh the activity timestamp.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Pop the next complete frame off the buffer, delimiter stripped.
    pub fn next_frame(&mut self) -> Option<String> {
        let end = self.buff.iter().position(|&b| b == FRAME_DELIMITER)?;
        let frame = self.buff.split_to(end + 1);
        Some(String::from_utf8_lossy(&frame[..end]).into_owned())
    }

    /// Best-effort write. Failures are logged and left to the idle
    /// timeout or the next read to clean up.
    pub fn send(&self, msg: &str) {
        if let Err(e) = self.writer.try_write(msg.as_bytes()) {
            warn!("Failed to send to {}: {}", self.addr, e);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
