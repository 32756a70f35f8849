use log::{debug, info, warn};
use std::path::Path;
use std::time::Duration;
use tokio::fs as async_fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use uuid::Uuid;

use crate::core::protocol::UploadStatus;
use crate::core::Message;
use crate::network::{RpcClient, Transport};
use crate::storage::{FileManager, IncomingFile};
use crate::utils::{P2PError, Result};

/// Receiving side of the chunked protocol.
pub struct Downloader {
    file_manager: FileManager,
}

impl Downloader {
    pub fn new(file_manager: FileManager) -> Self {
        Self { file_manager }
    }

    /// Server side of `UploadFile`.
    ///
    /// Storage is opened on the first frame under that frame's filename;
    /// later frames are appended in arrival order whatever name they carry.
    /// The file is committed when the caller closes its stream cleanly.
    pub async fn receive_upload<R>(&self, reader: &mut R, idle_timeout: Duration) -> UploadStatus
    where
        R: AsyncRead + Unpin,
    {
        let session = Uuid::new_v4();
        match self.receive_frames(reader, idle_timeout, session).await {
            Ok((filename, bytes)) => {
                info!("[{}] upload of {} complete ({} bytes)", session, filename, bytes);
                UploadStatus {
                    success: true,
                    message: "Upload complete".to_string(),
                }
            }
            Err(e) => {
                warn!("[{}] upload failed: {}", session, e);
                UploadStatus {
                    success: false,
                    message: e.to_string(),
                }
            }
        }
    }

    async fn receive_frames<R>(
        &self,
        reader: &mut R,
        idle_timeout: Duration,
        session: Uuid,
    ) -> Result<(String, u64)>
    where
        R: AsyncRead + Unpin,
    {
        let mut incoming: Option<IncomingFile> = None;

        loop {
            let message = tokio::time::timeout(idle_timeout, Transport::receive_message(reader))
                .await
                .map_err(|_| P2PError::NetworkError("upload stalled".into()))??;

            let frame = match message {
                Some(Message::Chunk(frame)) => frame,
                Some(other) => {
                    return Err(P2PError::InvalidResponse(format!(
                        "unexpected {} during upload",
                        other.kind()
                    )))
                }
                None => break,
            };

            if incoming.is_none() {
                info!("[{}] receiving {}", session, frame.filename);
                incoming = Some(self.file_manager.begin_upload(&frame.filename).await?);
            }
            if let Some(file) = incoming.as_mut() {
                debug!(
                    "[{}] frame {} ({} bytes)",
                    session,
                    frame.sequence,
                    frame.payload.len()
                );
                file.write(&frame.payload).await?;
            }
        }

        let file = incoming
            .ok_or_else(|| P2PError::InvalidResponse("upload carried no frames".into()))?;
        let filename = file.filename().to_string();
        let bytes = file.commit().await?;
        Ok((filename, bytes))
    }

    /// Client side: fetch `filename` from `addr` over RPC into `output`.
    /// A failed transfer removes the partial output.
    pub async fn download_to(
        addr: &str,
        filename: &str,
        output: &Path,
        timeout: Duration,
    ) -> Result<u64> {
        let mut stream = RpcClient::download(addr, filename, false, timeout).await?;
        let mut file = async_fs::File::create(output)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to create output file: {}", e)))?;

        let mut written = 0u64;
        let result: Result<()> = async {
            while let Some(frame) = stream.next_frame().await? {
                file.write_all(&frame.payload).await?;
                written += frame.payload.len() as u64;
            }
            file.flush().await?;
            Ok::<(), P2PError>(())
        }
        .await;

        if let Err(e) = result {
            drop(file);
            let _ = async_fs::remove_file(output).await;
            return Err(e);
        }

        info!(
            "Downloaded {} from {} ({} bytes, {} frames)",
            filename,
            addr,
            written,
            stream.frames_received()
        );
        Ok(written)
    }
}
