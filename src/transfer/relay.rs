//! Forwarding a file this node does not hold.
//!
//! Both bindings commit to one source: once any byte or frame has been
//! forwarded, a failing source ends the transfer instead of falling over
//! to another peer. Relayed requests are marked as forwarded so the source
//! never relays again on our behalf (one hop, no loops).

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::io::AsyncWrite;

use crate::core::{Message, Peer};
use crate::directory::Source;
use crate::network::{PeerHttpClient, RpcClient, Transport};
use crate::utils::{P2PError, Result};

/// Response header naming the peer a relayed body came from.
pub const RELAY_SOURCE_HEADER: &str = "x-peer-share-source";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FloodOutcome {
    Relayed { peer: String, frames: u64 },
    NotFound,
}

pub struct Relay;

impl Relay {
    /// HTTP binding: stream the first remote source that answers with a
    /// success status. `None` when no source could be opened.
    ///
    /// The upstream's `Content-Length` is forwarded, so an upstream failure
    /// after the headers went out shows up to the caller as a short body.
    /// Without a declared length an error payload is appended in-band.
    pub async fn http(
        client: &PeerHttpClient,
        filename: &str,
        sources: &[Source],
        local_name: &str,
    ) -> Option<Response> {
        for source in sources.iter().filter(|s| s.peer != local_name) {
            let Some(url) = source.download_url.as_deref() else {
                continue;
            };
            match client.open_download(url).await {
                Ok(upstream) => {
                    info!("Relaying {} from peer {} via HTTP", filename, source.peer);
                    return Some(Self::relay_response(upstream, &source.peer));
                }
                Err(e) => warn!("Peer {} could not serve {}: {}", source.peer, filename, e),
            }
        }
        None
    }

    fn relay_response(upstream: reqwest::Response, peer: &str) -> Response {
        let declared = upstream.content_length();
        let body = Body::from_stream(relay_body(
            upstream.bytes_stream().boxed(),
            peer.to_string(),
            declared.is_some(),
        ));

        let mut response = (StatusCode::OK, body).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        if let Some(len) = declared {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        }
        if let Ok(value) = HeaderValue::from_str(peer) {
            headers.insert(RELAY_SOURCE_HEADER, value);
        }
        response
    }

    /// RPC binding ("flooding"): try each peer with an RPC endpoint in
    /// order and forward the frames of the first that starts answering.
    ///
    /// A peer failing before its first frame is skipped. A failure after
    /// frames were forwarded is returned as [`P2PError::UpstreamTransfer`];
    /// no other peer is tried.
    pub async fn rpc_flood<W>(
        filename: &str,
        peers: &[Peer],
        timeout: Duration,
        writer: &mut W,
    ) -> Result<FloodOutcome>
    where
        W: AsyncWrite + Unpin,
    {
        for peer in peers {
            let Some(addr) = peer.rpc.as_deref() else {
                continue;
            };

            let mut upstream = match RpcClient::download(addr, filename, true, timeout).await {
                Ok(s) => s,
                Err(e) => {
                    debug!("Flood: peer {} unavailable: {}", peer.name, e);
                    continue;
                }
            };

            let first = match upstream.next_frame().await {
                Ok(first) => first,
                Err(e) => {
                    debug!("Flood: peer {} cannot serve {}: {}", peer.name, filename, e);
                    continue;
                }
            };

            info!("Relaying {} from peer {} via RPC", filename, peer.name);
            let mut frames = 0u64;
            let mut next = first;
            while let Some(frame) = next {
                Transport::send_message(writer, &Message::Chunk(frame)).await?;
                frames += 1;
                next = upstream.next_frame().await.map_err(|e| match e {
                    P2PError::UpstreamTransfer(_) => e,
                    other => P2PError::UpstreamTransfer(other.to_string()),
                })?;
            }

            return Ok(FloodOutcome::Relayed {
                peer: peer.name.clone(),
                frames,
            });
        }

        Ok(FloodOutcome::NotFound)
    }
}

fn relay_body<S, E>(
    upstream: S,
    peer: String,
    declared_length: bool,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    stream::unfold(Some(upstream), move |state| {
        let peer = peer.clone();
        async move {
            let mut upstream = state?;
            match upstream.next().await {
                Some(Ok(bytes)) => Some((Ok(bytes), Some(upstream))),
                Some(Err(e)) => {
                    warn!("Relay from peer {} failed mid-stream: {}", peer, e);
                    if declared_length {
                        Some((Err(std::io::Error::other(e)), None))
                    } else {
                        let payload = serde_json::json!({
                            "error": format!("Failed to download file from peer {}: {}", peer, e)
                        });
                        Some((Ok(Bytes::from(payload.to_string())), None))
                    }
                }
                None => None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    /// An RPC peer that answers every call with `script` and then closes.
    async fn scripted_peer(script: Vec<Message>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = Transport::receive_message(&mut stream).await;
                for message in &script {
                    let _ = Transport::send_message(&mut stream, message).await;
                }
            }
        });
        (addr, calls)
    }

    async fn sent_frames(mut written: &[u8]) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();
        while let Some(message) = Transport::receive_message(&mut written).await.unwrap() {
            match message {
                Message::Chunk(frame) => payloads.push(frame.payload),
                other => panic!("unexpected {:?}", other),
            }
        }
        payloads
    }

    #[tokio::test]
    async fn test_flood_with_no_rpc_peers_is_not_found() {
        let peers = vec![Peer::new("http-only", Some("http://127.0.0.1:9".into()), None)];
        let mut sink = Vec::new();
        let outcome = Relay::rpc_flood("f", &peers, Duration::from_secs(1), &mut sink)
            .await
            .unwrap();
        assert_eq!(outcome, FloodOutcome::NotFound);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_flood_skips_unreachable_peers() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap().to_string();
        drop(listener);

        let peers = vec![Peer::new("dead", None, Some(dead))];
        let mut sink = Vec::new();
        let outcome = Relay::rpc_flood("f", &peers, Duration::from_secs(1), &mut sink)
            .await
            .unwrap();
        assert_eq!(outcome, FloodOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_flood_moves_on_when_peer_fails_before_first_frame() {
        let (silent, _) = scripted_peer(Vec::new()).await;
        let (holder, holder_calls) = scripted_peer(vec![
            Message::chunk("f", 0, b"whole".to_vec()),
            Message::Status(crate::core::Status::ok()),
        ])
        .await;

        let peers = vec![
            Peer::new("silent", None, Some(silent)),
            Peer::new("holder", None, Some(holder)),
        ];
        let mut sink = Vec::new();
        let outcome = Relay::rpc_flood("f", &peers, Duration::from_secs(2), &mut sink)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            FloodOutcome::Relayed {
                peer: "holder".into(),
                frames: 1
            }
        );
        assert_eq!(holder_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sent_frames(&sink).await, vec![b"whole".to_vec()]);
    }

    #[tokio::test]
    async fn test_source_dropping_mid_stream_is_not_replaced() {
        let (partial, _) = scripted_peer(vec![Message::chunk("f", 0, b"part".to_vec())]).await;
        let (holder, holder_calls) = scripted_peer(vec![
            Message::chunk("f", 0, b"whole".to_vec()),
            Message::Status(crate::core::Status::ok()),
        ])
        .await;

        let peers = vec![
            Peer::new("partial", None, Some(partial)),
            Peer::new("holder", None, Some(holder)),
        ];
        let mut sink = Vec::new();
        let err = Relay::rpc_flood("f", &peers, Duration::from_secs(2), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, P2PError::UpstreamTransfer(_)), "{:?}", err);
        assert_eq!(holder_calls.load(Ordering::SeqCst), 0);
        assert_eq!(sent_frames(&sink).await, vec![b"part".to_vec()]);
    }

    fn broken_upstream() -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Unpin {
        stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"never")),
        ])
    }

    #[tokio::test]
    async fn test_relay_body_passes_bytes_through() {
        let upstream = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"abc"))]);
        let chunks: Vec<_> = relay_body(upstream, "a".into(), false).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().as_ref(), b"abc");
    }

    #[tokio::test]
    async fn test_relay_body_aborts_when_length_was_declared() {
        let chunks: Vec<_> = relay_body(broken_upstream(), "a".into(), true).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap().as_ref(), b"abc");
        assert!(chunks[1].is_err());
    }

    #[tokio::test]
    async fn test_relay_body_appends_error_without_declared_length() {
        let chunks: Vec<_> = relay_body(broken_upstream(), "a".into(), false).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap().as_ref(), b"abc");

        let trailer: serde_json::Value =
            serde_json::from_slice(chunks[1].as_ref().unwrap()).unwrap();
        assert!(trailer["error"].as_str().unwrap().contains("peer a"));
    }
}
