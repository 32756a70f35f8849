use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::core::protocol::ChunkFrame;
use crate::utils::Result;

/// Fixed frame payload size. Bounds per-transfer memory; not negotiated.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Cuts a byte source into sequentially numbered frames.
///
/// Frames are full `CHUNK_SIZE` except for the last one. An empty source
/// yields no frames at all.
pub struct ChunkReader<R> {
    reader: R,
    filename: String,
    next_sequence: u64,
    done: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(reader: R, filename: impl Into<String>) -> Self {
        Self {
            reader,
            filename: filename.into(),
            next_sequence: 0,
            done: false,
        }
    }

    pub async fn next_frame(&mut self) -> Result<Option<ChunkFrame>> {
        if self.done {
            return Ok(None);
        }

        let mut payload = vec![0u8; CHUNK_SIZE];
        let mut filled = 0;
        while filled < CHUNK_SIZE {
            let n = self.reader.read(&mut payload[filled..]).await?;
            if n == 0 {
                self.done = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        payload.truncate(filled);

        let frame = ChunkFrame {
            filename: self.filename.clone(),
            sequence: self.next_sequence,
            payload,
        };
        self.next_sequence += 1;
        debug!(
            "Read chunk {} of {} ({} bytes)",
            frame.sequence,
            frame.filename,
            frame.payload.len()
        );
        Ok(Some(frame))
    }

    pub fn frames_read(&self) -> u64 {
        self.next_sequence
    }
}
