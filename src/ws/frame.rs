//! WebSocket frame codec (RFC 6455 §5.2).
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking-key (0 or 4 bytes, present if MASK set)           |
//! +---------------------------------------------------------------+
//! |                        Payload Data                           |
//! +---------------------------------------------------------------+
//! ```
//!
//! Server frames are always sent unmasked with FIN set. Fragmented
//! messages are not reassembled.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const LEN7_MASK: u8 = 0x7F;

/// Largest length that fits in the 7-bit field.
const MAX_LEN7: u64 = 125;
const LEN16_MARKER: u8 = 126;
const LEN64_MARKER: u8 = 127;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// 0x3-0x7 and 0xB-0xF; carried through so the receiver can skip it
    Reserved(u8),
}

impl OpCode {
    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
            OpCode::Reserved(value) => value & OPCODE_MASK,
        }
    }
}

impl From<u8> for OpCode {
    fn from(value: u8) -> Self {
        match value & OPCODE_MASK {
            0x0 => OpCode::Continuation,
            0x1 => OpCode::Text,
            0x2 => OpCode::Binary,
            0x8 => OpCode::Close,
            0x9 => OpCode::Ping,
            0xA => OpCode::Pong,
            other => OpCode::Reserved(other),
        }
    }
}

/// One decoded frame. The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub masked: bool,
    pub payload_len: u64,
    pub mask_key: Option<[u8; 4]>,
    pub payload: Bytes,
}

/// Frame decoding errors
#[derive(Debug)]
pub enum FrameError {
    /// Stream ended before the frame was complete; the peer is gone
    Closed,
    /// Declared payload length above the configured maximum
    PayloadTooLarge(u64),
    /// Client frame without the mask bit
    UnmaskedClientFrame,
    Io(std::io::Error),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Closed => write!(f, "Connection closed mid-frame"),
            FrameError::PayloadTooLarge(len) => write!(f, "Frame payload too large: {}", len),
            FrameError::UnmaskedClientFrame => write!(f, "Client frame is not masked"),
            FrameError::Io(e) => write!(f, "I/O error reading frame: {}", e),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Closed
        } else {
            FrameError::Io(e)
        }
    }
}

/// XOR `buf` with the repeating 4-byte `key`.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Read one frame from `reader`, rejecting payloads above `max_payload`.
pub async fn read_frame<R>(reader: &mut R, max_payload: u64) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;

    let fin = header[0] & FIN_BIT != 0;
    let opcode = OpCode::from(header[0]);
    let masked = header[1] & MASK_BIT != 0;

    let payload_len = match header[1] & LEN7_MASK {
        LEN16_MARKER => u64::from(reader.read_u16().await?),
        LEN64_MARKER => reader.read_u64().await?,
        len => u64::from(len),
    };
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge(payload_len));
    }
    let len =
        usize::try_from(payload_len).map_err(|_| FrameError::PayloadTooLarge(payload_len))?;

    let mask_key = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = BytesMut::zeroed(len);
    reader.read_exact(&mut payload).await?;
    if let Some(key) = mask_key {
        apply_mask(&mut payload, key);
    }

    Ok(Frame {
        fin,
        opcode,
        masked,
        payload_len,
        mask_key,
        payload: payload.freeze(),
    })
}

/// Append an unmasked, final frame to `dst`.
pub fn encode_frame(opcode: OpCode, payload: &[u8], dst: &mut BytesMut) {
    put_header(dst, opcode, 0, payload.len() as u64);
    dst.put_slice(payload);
}

/// Encode an unmasked, final frame into a fresh buffer.
pub fn encode(opcode: OpCode, payload: &[u8]) -> BytesMut {
    let mut dst = BytesMut::with_capacity(payload.len() + 10);
    encode_frame(opcode, payload, &mut dst);
    dst
}

/// Client-style masked frame, for driving the server in tests.
#[cfg(test)]
pub fn encode_masked(opcode: OpCode, payload: &[u8], key: [u8; 4]) -> BytesMut {
    let mut dst = BytesMut::with_capacity(payload.len() + 14);
    put_header(&mut dst, opcode, MASK_BIT, payload.len() as u64);
    dst.put_slice(&key);
    let start = dst.len();
    dst.put_slice(payload);
    apply_mask(&mut dst[start..], key);
    dst
}

fn put_header(dst: &mut BytesMut, opcode: OpCode, mask_bit: u8, len: u64) {
    dst.put_u8(FIN_BIT | opcode.as_u8());
    if len <= MAX_LEN7 {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= u64::from(u16::MAX) {
        dst.put_u8(mask_bit | LEN16_MARKER);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | LEN64_MARKER);
        dst.put_u64(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u64 = 16 * 1024 * 1024;

    async fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
        let mut reader = bytes;
        read_frame(&mut reader, MAX).await
    }

    #[tokio::test]
    async fn test_roundtrip_length_boundaries() {
        for size in [0usize, 1, 125, 126, 127, 65535, 65536] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let frame = decode(&encode(OpCode::Binary, &payload)).await.unwrap();
            assert_eq!(frame.payload, payload, "size {size}");
            assert_eq!(frame.payload_len, size as u64);
            assert!(frame.fin);
            assert!(!frame.masked);
        }
    }

    #[test]
    fn test_length_encoding() {
        let frame = encode(OpCode::Text, &[b'x'; 125]);
        assert_eq!(&frame[..2], &[0x81, 125]);

        let frame = encode(OpCode::Text, &[b'x'; 126]);
        assert_eq!(&frame[..4], &[0x81, 126, 0x00, 126]);

        let frame = encode(OpCode::Binary, &[0; 65535]);
        assert_eq!(&frame[..4], &[0x82, 126, 0xFF, 0xFF]);

        let frame = encode(OpCode::Binary, &[0; 65536]);
        assert_eq!(&frame[..10], &[0x82, 127, 0, 0, 0, 0, 0, 1, 0, 0]);
        assert_eq!(frame.len(), 10 + 65536);
    }

    #[tokio::test]
    async fn test_decode_rfc_masked_hello() {
        let bytes = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let frame = decode(&bytes).await.unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert!(frame.masked);
        assert_eq!(frame.mask_key, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(&frame.payload[..], b"Hello");
    }

    #[tokio::test]
    async fn test_masked_roundtrip() {
        let payload = vec![0x5a; 300];
        let bytes = encode_masked(OpCode::Text, &payload, [1, 2, 3, 4]);
        assert_eq!(bytes[1], MASK_BIT | LEN16_MARKER);
        let frame = decode(&bytes).await.unwrap();
        assert_eq!(frame.payload, payload);
    }

    #[tokio::test]
    async fn test_decode_split_reads() {
        let bytes = encode_masked(OpCode::Ping, b"are you there", [9, 8, 7, 6]);
        let mut mock = tokio_test::io::Builder::new()
            .read(&bytes[..1])
            .read(&bytes[1..4])
            .read(&bytes[4..])
            .build();
        let frame = read_frame(&mut mock, MAX).await.unwrap();
        assert_eq!(frame.opcode, OpCode::Ping);
        assert_eq!(&frame.payload[..], b"are you there");
    }

    #[tokio::test]
    async fn test_non_final_frame_is_accepted() {
        let frame = decode(&[0x01, 0x02, b'h', b'i']).await.unwrap();
        assert!(!frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(&frame.payload[..], b"hi");
    }

    #[tokio::test]
    async fn test_reserved_opcode() {
        let frame = decode(&[0x83, 0x00]).await.unwrap();
        assert_eq!(frame.opcode, OpCode::Reserved(0x3));
        assert_eq!(frame.opcode.as_u8(), 0x3);
    }

    #[tokio::test]
    async fn test_short_read_is_closed() {
        assert!(matches!(decode(&[]).await, Err(FrameError::Closed)));
        assert!(matches!(decode(&[0x81]).await, Err(FrameError::Closed)));
        // declares 5 bytes, carries 3
        assert!(matches!(
            decode(&[0x81, 0x05, b'a', b'b', b'c']).await,
            Err(FrameError::Closed)
        ));
        // extended length cut short
        assert!(matches!(decode(&[0x82, 127, 0, 0]).await, Err(FrameError::Closed)));
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let bytes = [0x82, 127, 0xFF, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            decode(&bytes).await,
            Err(FrameError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_opcode_values() {
        for op in [
            OpCode::Continuation,
            OpCode::Text,
            OpCode::Binary,
            OpCode::Close,
            OpCode::Ping,
            OpCode::Pong,
        ] {
            assert_eq!(OpCode::from(op.as_u8()), op);
        }
        assert_eq!(OpCode::from(0x89), OpCode::Ping);
    }
}
