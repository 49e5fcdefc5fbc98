//! Receive loop for one upgraded connection.

use crate::ws::frame::{read_frame, FrameError, OpCode};
use crate::ws::hub::{Peer, SignalingHub};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

/// Join `room` and relay frames until the peer goes away.
///
/// Text frames are broadcast to the room, pings answered with pongs, and
/// close ends the session. Every other opcode is skipped. A stream that ends
/// mid-frame is a normal disconnect. The peer is always removed from the
/// room and its socket shut down before returning.
pub async fn run<R, W>(
    hub: &SignalingHub,
    room: &str,
    reader: &mut R,
    writer: W,
    max_payload: u64,
) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let peer = hub.create_peer(writer);
    let result = relay(hub, room, &peer, reader, max_payload).await;

    hub.leave(room, &peer);
    peer.shutdown().await;

    match result {
        Err(FrameError::Closed) => Ok(()),
        other => other,
    }
}

async fn relay<R>(
    hub: &SignalingHub,
    room: &str,
    peer: &Arc<Peer>,
    reader: &mut R,
    max_payload: u64,
) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    hub.join(room, peer).await?;

    while peer.is_open() {
        let frame = read_frame(reader, max_payload).await?;
        if !frame.masked {
            return Err(FrameError::UnmaskedClientFrame);
        }
        trace!(peer = peer.id(), opcode = ?frame.opcode, len = frame.payload_len, "Frame received");

        match frame.opcode {
            OpCode::Text => {
                hub.broadcast(room, peer, &frame.payload).await;
            }
            OpCode::Close => {
                // echo the status code, if any, then stop
                let code = &frame.payload[..frame.payload.len().min(2)];
                let _ = peer.send(OpCode::Close, code).await;
                debug!(peer = peer.id(), "Close frame received");
                break;
            }
            OpCode::Ping => {
                peer.send(OpCode::Pong, &frame.payload).await?;
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::frame::{encode_masked, read_frame, Frame};
    use crate::ws::hub::PEER_JOINED;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    const MAX: u64 = 1 << 20;
    const KEY: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

    /// A session running in the background, reachable through two pipes:
    /// one the client writes frames into, one it reads server frames from.
    struct Client {
        tx: DuplexStream,
        rx: DuplexStream,
        task: tokio::task::JoinHandle<Result<(), FrameError>>,
    }

    impl Client {
        fn connect(hub: &Arc<SignalingHub>, room: &str) -> Self {
            let (tx, mut server_in) = tokio::io::duplex(64 * 1024);
            let (server_out, rx) = tokio::io::duplex(64 * 1024);
            let hub = Arc::clone(hub);
            let room = room.to_string();
            let task = tokio::spawn(async move {
                run(&hub, &room, &mut server_in, server_out, MAX).await
            });
            Self { tx, rx, task }
        }

        async fn send(&mut self, opcode: OpCode, payload: &[u8]) {
            self.tx
                .write_all(&encode_masked(opcode, payload, KEY))
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> Frame {
            tokio::time::timeout(Duration::from_secs(5), read_frame(&mut self.rx, MAX))
                .await
                .expect("timed out waiting for frame")
                .unwrap()
        }

        async fn recv_text(&mut self) -> String {
            let frame = self.recv().await;
            assert_eq!(frame.opcode, OpCode::Text);
            String::from_utf8(frame.payload.to_vec()).unwrap()
        }
    }

    async fn wait_for_size(hub: &SignalingHub, room: &str, size: usize) {
        for _ in 0..100 {
            if hub.room_size(room) == size {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("room {room} never reached {size} members");
    }

    #[tokio::test]
    async fn test_relay_between_peers() {
        let hub = SignalingHub::new();
        let mut a = Client::connect(&hub, "demo");
        assert_eq!(a.recv_text().await, r#"{"type":"join","room":"demo"}"#);

        let mut b = Client::connect(&hub, "demo");
        assert_eq!(b.recv_text().await, r#"{"type":"join","room":"demo"}"#);
        assert_eq!(a.recv_text().await, PEER_JOINED);

        a.send(OpCode::Text, b"ping").await;
        assert_eq!(b.recv_text().await, "ping");

        b.send(OpCode::Text, br#"{"type":"offer","sdp":"x"}"#).await;
        assert_eq!(a.recv_text().await, r#"{"type":"offer","sdp":"x"}"#);
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let hub = SignalingHub::new();
        let mut a = Client::connect(&hub, "p");
        a.recv_text().await;

        a.send(OpCode::Ping, b"beat").await;
        let frame = a.recv().await;
        assert_eq!(frame.opcode, OpCode::Pong);
        assert_eq!(&frame.payload[..], b"beat");
    }

    #[tokio::test]
    async fn test_close_ends_session() {
        let hub = SignalingHub::new();
        let mut a = Client::connect(&hub, "c");
        a.recv_text().await;
        assert_eq!(hub.room_size("c"), 1);

        a.send(OpCode::Close, &[0x03, 0xE8]).await;
        let frame = a.recv().await;
        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(&frame.payload[..], &[0x03, 0xE8]);

        a.task.await.unwrap().unwrap();
        assert_eq!(hub.room_size("c"), 0);
    }

    #[tokio::test]
    async fn test_disconnect_removes_peer() {
        let hub = SignalingHub::new();
        let mut a = Client::connect(&hub, "d");
        a.recv_text().await;
        let mut b = Client::connect(&hub, "d");
        b.recv_text().await;
        a.recv_text().await;

        // b vanishes halfway through a frame
        let partial = encode_masked(OpCode::Text, b"unfinished", KEY);
        b.tx.write_all(&partial[..5]).await.unwrap();
        drop(b.tx);
        b.task.await.unwrap().unwrap();
        wait_for_size(&hub, "d", 1).await;

        // the room keeps working for a
        let mut c = Client::connect(&hub, "d");
        c.recv_text().await;
        assert_eq!(a.recv_text().await, PEER_JOINED);
        c.send(OpCode::Text, b"still here").await;
        assert_eq!(a.recv_text().await, "still here");
    }

    #[tokio::test]
    async fn test_unmasked_frame_rejected() {
        let hub = SignalingHub::new();
        let mut a = Client::connect(&hub, "u");
        a.recv_text().await;

        let unmasked = crate::ws::frame::encode(OpCode::Text, b"bare");
        a.tx.write_all(&unmasked).await.unwrap();
        let result = a.task.await.unwrap();
        assert!(matches!(result, Err(FrameError::UnmaskedClientFrame)));
        assert_eq!(hub.room_size("u"), 0);
    }

    #[tokio::test]
    async fn test_other_opcodes_ignored() {
        let hub = SignalingHub::new();
        let mut a = Client::connect(&hub, "i");
        a.recv_text().await;
        let mut b = Client::connect(&hub, "i");
        b.recv_text().await;
        a.recv_text().await;

        a.send(OpCode::Binary, b"\x00\x01").await;
        a.send(OpCode::Pong, b"").await;
        a.send(OpCode::Reserved(0x3), b"").await;
        a.send(OpCode::Text, b"after").await;
        assert_eq!(b.recv_text().await, "after");
    }
}
