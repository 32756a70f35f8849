use log::{debug, info};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::core::Message;
use crate::storage::CHUNK_SIZE;
use crate::utils::{P2PError, Result};

/// Largest encoded message accepted off the wire: one full chunk plus
/// room for the filename and envelope.
pub const MAX_MESSAGE_SIZE: usize = CHUNK_SIZE + 8 * 1024;

/// Length-prefixed message framing: `[u32 big-endian length][bincode body]`.
pub struct Transport;

impl Transport {
    pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| P2PError::PeerUnreachable(format!("connect to {} timed out", addr)))?
            .map_err(|e| P2PError::PeerUnreachable(format!("connect to {}: {}", addr, e)))?;

        stream
            .set_nodelay(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set TCP_NODELAY: {}", e)))?;

        debug!("Connected to {}", addr);
        Ok(stream)
    }

    pub async fn listen(addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| P2PError::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

        info!("Listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub async fn send_data<W>(stream: &mut W, data: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let len = data.len() as u32;
        stream.write_u32(len).await?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Read one frame. `Ok(None)` means the peer closed the stream cleanly
    /// on a frame boundary; EOF inside a frame is an error.
    pub async fn receive_data<R>(stream: &mut R, max_size: usize) -> Result<Option<Vec<u8>>>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            let n = stream.read(&mut len_buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(P2PError::NetworkError(
                    "stream closed inside a frame header".into(),
                ));
            }
            filled += n;
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > max_size {
            return Err(P2PError::MessageTooLarge(len));
        }

        let mut buffer = vec![0u8; len];
        stream.read_exact(&mut buffer).await?;

        Ok(Some(buffer))
    }

    pub async fn send_message<W>(stream: &mut W, message: &Message) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = bincode::serialize(message)?;
        Self::send_data(stream, &encoded).await
    }

    pub async fn receive_message<R>(stream: &mut R) -> Result<Option<Message>>
    where
        R: AsyncRead + Unpin,
    {
        match Self::receive_data(stream, MAX_MESSAGE_SIZE).await? {
            Some(buffer) => Ok(Some(bincode::deserialize(&buffer)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_survive_framing() {
        let (mut client, mut server) = tokio::io::duplex(1024 * 1024);

        Transport::send_message(&mut client, &Message::download_request("a.txt", false))
            .await
            .unwrap();
        Transport::send_message(&mut client, &Message::chunk("a.txt", 0, vec![1, 2, 3]))
            .await
            .unwrap();
        drop(client);

        let first = Transport::receive_message(&mut server).await.unwrap();
        assert_eq!(first, Some(Message::download_request("a.txt", false)));
        let second = Transport::receive_message(&mut server).await.unwrap();
        assert_eq!(second, Some(Message::chunk("a.txt", 0, vec![1, 2, 3])));
        assert_eq!(Transport::receive_message(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0]).await.unwrap();
        drop(client);

        assert!(Transport::receive_data(&mut server, 16).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_oversized_frames() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(1_000).await.unwrap();

        assert!(matches!(
            Transport::receive_data(&mut server, 16).await,
            Err(P2PError::MessageTooLarge(1_000))
        ));
    }
}
