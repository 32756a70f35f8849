use log::{debug, info};
use tokio::io::AsyncWrite;

use crate::core::Message;
use crate::network::Transport;
use crate::storage::{ChunkReader, FileManager};
use crate::utils::Result;

/// Source side of a `DownloadFile` call: streams a local file as frames.
pub struct Uploader {
    file_manager: FileManager,
}

impl Uploader {
    pub fn new(file_manager: FileManager) -> Self {
        Self { file_manager }
    }

    /// Whether `filename` can be served from this node.
    pub async fn has_local(&self, filename: &str) -> bool {
        self.file_manager.has_file(filename).await
    }

    /// Write every frame of a local file to `writer`. The caller sends the
    /// closing status. Returns the number of frames written.
    pub async fn serve_local<W>(&self, filename: &str, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let (file, size) = self.file_manager.open_file(filename).await?;
        info!("Serving {} ({} bytes) from local storage", filename, size);

        let mut chunks = ChunkReader::new(file, filename);
        while let Some(frame) = chunks.next_frame().await? {
            Transport::send_message(writer, &Message::Chunk(frame)).await?;
        }

        debug!("Sent {} frame(s) of {}", chunks.frames_read(), filename);
        Ok(chunks.frames_read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CHUNK_SIZE;

    #[tokio::test]
    async fn test_serves_frames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..CHUNK_SIZE + 100).map(|i| (i % 13) as u8).collect();
        std::fs::write(dir.path().join("f.bin"), &data).unwrap();
        let uploader = Uploader::new(FileManager::new(dir.path().to_path_buf()).await.unwrap());

        let (mut tx, mut rx) = tokio::io::duplex(4 * CHUNK_SIZE);
        let frames = uploader.serve_local("f.bin", &mut tx).await.unwrap();
        drop(tx);
        assert_eq!(frames, 2);

        let mut received = Vec::new();
        let mut sequence = 0;
        while let Some(message) = Transport::receive_message(&mut rx).await.unwrap() {
            match message {
                Message::Chunk(frame) => {
                    assert_eq!(frame.sequence, sequence);
                    assert_eq!(frame.filename, "f.bin");
                    sequence += 1;
                    received.extend(frame.payload);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn test_empty_file_sends_no_frames() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty"), b"").unwrap();
        let uploader = Uploader::new(FileManager::new(dir.path().to_path_buf()).await.unwrap());

        let mut sink = Vec::new();
        assert_eq!(uploader.serve_local("empty", &mut sink).await.unwrap(), 0);
        assert!(sink.is_empty());
    }
}
