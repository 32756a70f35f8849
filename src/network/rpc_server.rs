use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::time::{sleep, Duration};

use crate::core::protocol::{Request, Status, StatusCode, PROTOCOL_VERSION};
use crate::core::{Message, NodeContext};
use crate::network::Transport;
use crate::storage::validate_filename;
use crate::transfer::{FloodOutcome, Relay};
use crate::utils::{P2PError, Result};

/// Accept loop of the streaming RPC binding. One call per connection; at
/// most `rpc_max_concurrent` calls run at once and further connections
/// wait in the listen backlog.
pub struct RpcServer {
    context: Arc<NodeContext>,
    limit: Arc<Semaphore>,
}

impl RpcServer {
    pub fn new(context: Arc<NodeContext>) -> Self {
        let limit = Arc::new(Semaphore::new(context.config.rpc_max_concurrent.max(1)));
        Self { context, limit }
    }

    pub async fn run(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            let permit = tokio::select! {
                permit = self.limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            let (stream, addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept RPC connection: {}", e);
                        sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
                _ = shutdown.changed() => break,
            };

            let context = self.context.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = Self::handle_connection(context, stream, addr).await {
                    warn!("RPC call from {} failed: {}", addr, e);
                }
            });
        }
        info!("RPC server stopped");
    }

    async fn handle_connection(
        context: Arc<NodeContext>,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<()> {
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();
        let timeout = context.config.relay_timeout();

        let first = tokio::time::timeout(timeout, Transport::receive_message(&mut reader))
            .await
            .map_err(|_| P2PError::NetworkError(format!("{} sent no request", addr)))??;

        let request = match first {
            Some(Message::Request { version, request }) if version == PROTOCOL_VERSION => request,
            Some(Message::Request { version, .. }) => {
                let status = Status::new(
                    StatusCode::InvalidArgument,
                    format!("unsupported protocol version {}", version),
                );
                return Transport::send_message(&mut writer, &Message::Status(status)).await;
            }
            Some(other) => {
                return Err(P2PError::InvalidResponse(format!(
                    "expected a request, got {}",
                    other.kind()
                )))
            }
            None => return Ok(()),
        };

        match request {
            Request::DownloadFile {
                filename,
                forwarded,
            } => {
                debug!(
                    "DownloadFile({}) from {} (forwarded: {})",
                    filename, addr, forwarded
                );
                tokio::select! {
                    result = Self::handle_download(&context, &filename, forwarded, &mut writer) => result,
                    _ = wait_for_hangup(&mut reader) => {
                        info!("Caller {} hung up during download of {}", addr, filename);
                        Ok(())
                    }
                }
            }
            Request::UploadFile => {
                debug!("UploadFile from {}", addr);
                let status = context.downloader.receive_upload(&mut reader, timeout).await;
                Transport::send_message(&mut writer, &Message::UploadStatus(status)).await
            }
        }
    }

    async fn handle_download<W>(
        context: &NodeContext,
        filename: &str,
        forwarded: bool,
        writer: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if let Err(e) = validate_filename(filename) {
            let status = Status::new(StatusCode::InvalidArgument, e.to_string());
            return Transport::send_message(writer, &Message::Status(status)).await;
        }

        if context.uploader.has_local(filename).await {
            let status = match context.uploader.serve_local(filename, writer).await {
                Ok(_) => Status::ok(),
                Err(P2PError::FileNotFound(_)) => {
                    Status::new(StatusCode::NotFound, format!("File {} not found", filename))
                }
                Err(e) => {
                    error!("Failed to serve {}: {}", filename, e);
                    Status::new(StatusCode::Internal, e.to_string())
                }
            };
            return Transport::send_message(writer, &Message::Status(status)).await;
        }

        if forwarded {
            debug!("Forwarded request for {} not held locally", filename);
            return Transport::send_message(
                writer,
                &Message::not_found(format!("File {} not found", filename)),
            )
            .await;
        }

        let peers = context.peers.read().await.snapshot();
        let status = match Relay::rpc_flood(filename, &peers, context.config.relay_timeout(), writer)
            .await
        {
            Ok(FloodOutcome::Relayed { peer, frames }) => {
                info!("Relayed {} from {} ({} frames)", filename, peer, frames);
                Status::ok()
            }
            Ok(FloodOutcome::NotFound) => {
                info!("{} not found on any peer", filename);
                Status::new(
                    StatusCode::NotFound,
                    format!("File {} not found on any peer", filename),
                )
            }
            Err(P2PError::UpstreamTransfer(detail)) => {
                warn!("Relay of {} broke off: {}", filename, detail);
                Status::new(StatusCode::Unavailable, detail)
            }
            Err(e) => return Err(e),
        };
        Transport::send_message(writer, &Message::Status(status)).await
    }
}

/// Resolves once the caller closes its side of the call. Nothing is
/// expected from a downloader after its request, so stray bytes are
/// discarded.
async fn wait_for_hangup<R>(reader: &mut R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 512];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}
