//! Room-scoped broadcast hub for WebSocket peers.
//!
//! The hub relays text frames between peers in the same room without
//! interpreting them. Room membership lives behind one coarse lock; each
//! peer owns its write half behind an async mutex, so frames from racing
//! broadcasts reach the wire whole and never interleave.

use crate::ws::frame::{self, OpCode};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Notice broadcast to existing members when someone joins.
pub const PEER_JOINED: &str = r#"{"type":"peer-joined"}"#;

/// Write half of a peer's connection.
pub type PeerWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Lifecycle of a peer. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl From<u8> for PeerState {
    fn from(value: u8) -> Self {
        match value {
            0 => PeerState::Connecting,
            1 => PeerState::Open,
            _ => PeerState::Closed,
        }
    }
}

/// One live WebSocket connection.
pub struct Peer {
    id: u64,
    state: AtomicU8,
    writer: Mutex<PeerWriter>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Peer {
    fn new(id: u64, writer: PeerWriter) -> Self {
        Self {
            id,
            state: AtomicU8::new(PeerState::Connecting as u8),
            writer: Mutex::new(writer),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> PeerState {
        PeerState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == PeerState::Open
    }

    /// `Connecting -> Open`; a closed peer stays closed.
    fn open(&self) {
        let _ = self.state.compare_exchange(
            PeerState::Connecting as u8,
            PeerState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn close(&self) {
        self.state.store(PeerState::Closed as u8, Ordering::Release);
    }

    /// Write one unmasked frame. The whole frame goes out under the
    /// writer lock. A failed write closes the peer.
    pub async fn send(&self, opcode: OpCode, payload: &[u8]) -> std::io::Result<()> {
        let bytes = frame::encode(opcode, payload);
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = &result {
            debug!(peer = self.id, error = %e, "Frame write failed");
            self.close();
        }
        result
    }

    pub async fn send_text(&self, text: &[u8]) -> std::io::Result<()> {
        self.send(OpCode::Text, text).await
    }

    /// Close the write side of the connection.
    pub async fn shutdown(&self) {
        self.close();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            trace!(peer = self.id, error = %e, "Shutdown failed");
        }
    }
}

#[derive(Serialize)]
struct JoinNotice<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    room: &'a str,
}

/// Message sent to a peer right after it joins `room`.
pub fn join_notice(room: &str) -> String {
    serde_json::to_string(&JoinNotice { kind: "join", room })
        .unwrap_or_else(|_| r#"{"type":"join"}"#.to_string())
}

type Members = HashMap<u64, Arc<Peer>>;

/// Room id to member set.
#[derive(Debug, Default)]
pub struct SignalingHub {
    rooms: RwLock<HashMap<String, Members>>,
    next_peer_id: AtomicU64,
}

impl SignalingHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wrap a connection's write half in a new, not yet joined, peer.
    pub fn create_peer<W>(&self, writer: W) -> Arc<Peer>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        Arc::new(Peer::new(id, Box::new(writer)))
    }

    /// Add `peer` to `room`, greet it, and tell the rest of the room.
    pub async fn join(&self, room: &str, peer: &Arc<Peer>) -> std::io::Result<()> {
        {
            let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
            rooms
                .entry(room.to_string())
                .or_default()
                .insert(peer.id(), Arc::clone(peer));
        }
        // broadcasts skip the peer until its own notice is on the wire
        peer.send_text(join_notice(room).as_bytes()).await?;
        peer.open();
        debug!(room, peer = peer.id(), "Peer joined");

        self.broadcast(room, peer, PEER_JOINED.as_bytes()).await;
        Ok(())
    }

    /// Send `text` to every open member of `room` except `sender`.
    ///
    /// Returns how many peers the frame was written to.
    pub async fn broadcast(&self, room: &str, sender: &Peer, text: &[u8]) -> usize {
        let recipients = self.recipients(room, sender.id());
        let mut delivered = 0;
        for peer in recipients {
            if peer.send_text(text).await.is_ok() {
                delivered += 1;
            }
        }
        trace!(room, sender = sender.id(), delivered, "Broadcast");
        delivered
    }

    /// Remove `peer` from `room` if it is there. Empty rooms are kept.
    pub fn leave(&self, room: &str, peer: &Peer) {
        peer.close();
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        if let Some(members) = rooms.get_mut(room) {
            if members.remove(&peer.id()).is_some() {
                debug!(room, peer = peer.id(), "Peer left");
            }
        }
    }

    /// Number of members in `room`; zero for unknown rooms.
    pub fn room_size(&self, room: &str) -> usize {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms.get(room).map_or(0, HashMap::len)
    }

    /// Open members other than `exclude`, cloned out so no lock is held
    /// while writing.
    fn recipients(&self, room: &str, exclude: u64) -> Vec<Arc<Peer>> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms
            .get(room)
            .map(|members| {
                members
                    .values()
                    .filter(|p| p.id() != exclude && p.is_open())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
