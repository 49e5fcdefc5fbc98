//! Synthetic workloads behind `/compute` and `/io`.

use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Chunk size used when streaming filler bytes.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Byte every filler chunk is made of.
pub const FILLER_BYTE: u8 = b'a';

static FILLER: [u8; CHUNK_SIZE] = [FILLER_BYTE; CHUNK_SIZE];

/// Spin on the monotonic clock for at least `duration`.
///
/// Never sleeps or yields: the calling thread stays busy for the whole
/// period, which is what the benchmark is meant to measure.
pub fn cpu_burn(duration: Duration) {
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

/// Write `byte_count` filler bytes to `sink` in `CHUNK_SIZE` pieces.
///
/// Short writes are retried with the remainder of the chunk. A write that
/// accepts nothing means the peer is gone and yields `WriteZero`.
pub async fn stream_filler<W>(sink: &mut W, byte_count: u64) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut remaining = byte_count;
    while remaining > 0 {
        let len = remaining.min(CHUNK_SIZE as u64) as usize;
        let mut chunk = &FILLER[..len];
        while !chunk.is_empty() {
            let written = sink.write(chunk).await?;
            if written == 0 {
                return Err(std::io::ErrorKind::WriteZero.into());
            }
            chunk = &chunk[written..];
        }
        remaining -= len as u64;
    }
    sink.flush().await
}
