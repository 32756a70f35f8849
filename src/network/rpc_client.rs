use log::{debug, info};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::core::protocol::{ChunkFrame, StatusCode, UploadStatus};
use crate::core::Message;
use crate::network::Transport;
use crate::storage::ChunkReader;
use crate::utils::{P2PError, Result};

/// Client side of the streaming RPC binding.
pub struct RpcClient;

impl RpcClient {
    /// Issue `DownloadFile` and return the frame stream. Nothing has been
    /// read yet; the first [`DownloadStream::next_frame`] tells whether the
    /// remote has the file.
    pub async fn download(
        addr: &str,
        filename: &str,
        forwarded: bool,
        timeout: Duration,
    ) -> Result<DownloadStream> {
        let stream = Transport::connect(addr, timeout).await?;
        let (reader, mut writer) = stream.into_split();

        Transport::send_message(&mut writer, &Message::download_request(filename, forwarded))
            .await
            .map_err(|e| P2PError::PeerUnreachable(format!("{}: {}", addr, e)))?;

        debug!("DownloadFile({}) sent to {}", filename, addr);
        Ok(DownloadStream {
            addr: addr.to_string(),
            reader,
            _writer: writer,
            idle_timeout: timeout,
            frames: 0,
            finished: false,
        })
    }

    /// Stream `reader` to `addr` as an `UploadFile` call.
    ///
    /// Always sends at least one frame so that an empty file still carries
    /// its filename.
    pub async fn upload<R>(
        addr: &str,
        filename: &str,
        reader: R,
        timeout: Duration,
    ) -> Result<UploadStatus>
    where
        R: AsyncRead + Unpin,
    {
        let stream = Transport::connect(addr, timeout).await?;
        let (mut rx, mut tx) = stream.into_split();

        Transport::send_message(&mut tx, &Message::upload_request()).await?;

        let mut chunks = ChunkReader::new(reader, filename);
        let mut sent = 0u64;
        while let Some(frame) = chunks.next_frame().await? {
            Transport::send_message(&mut tx, &Message::Chunk(frame)).await?;
            sent += 1;
        }
        if sent == 0 {
            Transport::send_message(&mut tx, &Message::chunk(filename, 0, Vec::new())).await?;
        }
        tx.shutdown().await?;

        let reply = tokio::time::timeout(timeout, Transport::receive_message(&mut rx))
            .await
            .map_err(|_| P2PError::NetworkError(format!("{} did not confirm upload", addr)))??;

        match reply {
            Some(Message::UploadStatus(status)) => {
                info!(
                    "Uploaded {} to {} in {} frame(s): {}",
                    filename,
                    addr,
                    sent.max(1),
                    status.message
                );
                Ok(status)
            }
            Some(other) => Err(P2PError::InvalidResponse(format!(
                "expected upload status, got {}",
                other.kind()
            ))),
            None => Err(P2PError::NetworkError(format!(
                "{} closed the call without a status",
                addr
            ))),
        }
    }
}

/// Frames of one `DownloadFile` call.
pub struct DownloadStream {
    addr: String,
    reader: OwnedReadHalf,
    // Held open for the whole call: the server reads EOF on this
    // direction as the caller hanging up.
    _writer: OwnedWriteHalf,
    idle_timeout: Duration,
    frames: u64,
    finished: bool,
}

impl DownloadStream {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn frames_received(&self) -> u64 {
        self.frames
    }

    /// Next frame, `Ok(None)` once the remote reported success.
    ///
    /// A `NOT_FOUND` trailer maps to [`P2PError::FileNotFound`]. Any other
    /// failure before the first frame is a peer failure; after it, an
    /// [`P2PError::UpstreamTransfer`].
    pub async fn next_frame(&mut self) -> Result<Option<ChunkFrame>> {
        if self.finished {
            return Ok(None);
        }

        let received = tokio::time::timeout(
            self.idle_timeout,
            Transport::receive_message(&mut self.reader),
        )
        .await;
        let message = match received {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                self.finished = true;
                return Err(self.failure(format!("{}: {}", self.addr, e)));
            }
            Err(_) => {
                self.finished = true;
                return Err(self.failure(format!("{} timed out", self.addr)));
            }
        };

        match message {
            Some(Message::Chunk(frame)) => {
                self.frames += 1;
                Ok(Some(frame))
            }
            Some(Message::Status(status)) => {
                self.finished = true;
                match status.code {
                    StatusCode::Ok => Ok(None),
                    StatusCode::NotFound if self.frames == 0 => {
                        Err(P2PError::FileNotFound(status.message))
                    }
                    _ => Err(self.failure(format!(
                        "{} reported {:?}: {}",
                        self.addr, status.code, status.message
                    ))),
                }
            }
            Some(other) => {
                self.finished = true;
                Err(self.failure(format!(
                    "{} sent unexpected {}",
                    self.addr,
                    other.kind()
                )))
            }
            None => {
                self.finished = true;
                Err(self.failure(format!("{} closed the stream without a status", self.addr)))
            }
        }
    }

    fn failure(&self, detail: String) -> P2PError {
        if self.frames == 0 {
            P2PError::PeerUnreachable(detail)
        } else {
            P2PError::UpstreamTransfer(detail)
        }
    }
}
