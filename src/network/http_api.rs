use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::core::{NodeContext, Peer};
use crate::network::FORWARDED_HEADER;
use crate::storage::validate_filename;
use crate::transfer::Relay;
use crate::utils::P2PError;

/// HTTP binding of a node.
pub fn router(context: Arc<NodeContext>) -> Router {
    Router::new()
        .route("/", get(status_page))
        .route("/files", get(list_files))
        .route("/network_files", get(network_files))
        .route("/locate", get(locate))
        .route("/download/{filename}", get(download))
        .route("/upload", post(upload))
        .route("/add_peer", post(add_peer))
        .route("/peers", get(list_peers))
        .route("/refresh", post(refresh))
        .layer(DefaultBodyLimit::disable())
        .with_state(context)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn status_for(err: &P2PError) -> StatusCode {
    match err {
        P2PError::FileNotFound(_) => StatusCode::NOT_FOUND,
        P2PError::InvalidFilename(_) | P2PError::ConfigError(_) => StatusCode::BAD_REQUEST,
        P2PError::DuplicatePeer(_) => StatusCode::CONFLICT,
        e if e.is_peer_failure() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for P2PError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        error_response(status, self.to_string())
    }
}

async fn status_page(State(ctx): State<Arc<NodeContext>>) -> Json<serde_json::Value> {
    let peers: Vec<String> = ctx
        .peer_snapshot()
        .await
        .iter()
        .map(|p| p.name.clone())
        .collect();
    Json(json!({
        "msg": format!("Peer {} is running", ctx.local_name()),
        "name": ctx.local_name(),
        "peers": peers,
    }))
}

async fn list_files(State(ctx): State<Arc<NodeContext>>) -> Result<Json<serde_json::Value>, P2PError> {
    let peer_files = ctx.directory().await?;
    Ok(Json(json!({ "peer_files": peer_files })))
}

async fn network_files(
    State(ctx): State<Arc<NodeContext>>,
) -> Result<Json<serde_json::Value>, P2PError> {
    let peer_files = ctx.network_directory().await?;
    Ok(Json(json!({ "peer_files": peer_files })))
}

#[derive(Debug, Deserialize)]
struct LocateQuery {
    filename: String,
}

async fn locate(
    State(ctx): State<Arc<NodeContext>>,
    Query(query): Query<LocateQuery>,
) -> Response {
    match ctx.locate(&query.filename).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn download(
    State(ctx): State<Arc<NodeContext>>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = validate_filename(&filename) {
        return e.into_response();
    }

    match ctx.files.open_file(&filename).await {
        Ok((file, size)) => {
            info!("Serving {} ({} bytes) over HTTP", filename, size);
            return local_file_response(file, size, &filename);
        }
        Err(P2PError::FileNotFound(_)) => {}
        Err(e) => return e.into_response(),
    }

    if headers.contains_key(FORWARDED_HEADER) {
        debug!("Forwarded request for {} not held locally", filename);
        return error_response(StatusCode::NOT_FOUND, "File not found");
    }

    let located = match ctx.locate(&filename).await {
        Ok(located) => located,
        Err(e) => return e.into_response(),
    };
    match Relay::http(&ctx.http, &filename, &located.sources, ctx.local_name()).await {
        Some(response) => response,
        None => {
            info!("{} not available from any peer", filename);
            error_response(StatusCode::NOT_FOUND, "File not found")
        }
    }
}

fn local_file_response(file: tokio::fs::File, size: u64, filename: &str) -> Response {
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

async fn upload(State(ctx): State<Arc<NodeContext>>, mut multipart: Multipart) -> Response {
    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.body_text()),
        };
        if field.name() != Some("file") {
            continue;
        }

        let Some(filename) = field.file_name().map(str::to_string) else {
            return error_response(StatusCode::BAD_REQUEST, "No filename given");
        };
        let mut incoming = match ctx.files.begin_upload(&filename).await {
            Ok(incoming) => incoming,
            Err(e) => return e.into_response(),
        };

        loop {
            match field.chunk().await {
                Ok(Some(bytes)) => {
                    if let Err(e) = incoming.write(&bytes).await {
                        return e.into_response();
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Upload of {} interrupted: {}", filename, e);
                    return error_response(StatusCode::BAD_REQUEST, e.body_text());
                }
            }
        }

        return match incoming.commit().await {
            Ok(bytes) => {
                info!("Stored upload {} ({} bytes)", filename, bytes);
                Json(json!({ "status": "ok", "filename": filename })).into_response()
            }
            Err(e) => e.into_response(),
        };
    }

    error_response(StatusCode::BAD_REQUEST, "No file part")
}

#[derive(Debug, Deserialize)]
struct AddPeerRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    rpc: Option<String>,
}

async fn add_peer(
    State(ctx): State<Arc<NodeContext>>,
    payload: Result<Json<AddPeerRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    if request.name.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing name");
    }

    let peer = Peer::new(request.name, request.url, request.rpc);
    let peers = {
        let mut manager = ctx.peers.write().await;
        if let Err(e) = manager.add_peer(peer.clone()) {
            return e.into_response();
        }
        manager.snapshot()
    };

    if peer.url.is_some() {
        let cache = ctx.cache.clone();
        tokio::spawn(async move { cache.refresh(&peer).await });
    }

    Json(json!({ "status": "ok", "peers": peers.as_ref() })).into_response()
}

async fn list_peers(State(ctx): State<Arc<NodeContext>>) -> Json<serde_json::Value> {
    let peers = ctx.peer_snapshot().await;
    Json(json!({ "peers": peers.as_ref() }))
}

async fn refresh(State(ctx): State<Arc<NodeContext>>) -> Result<Json<serde_json::Value>, P2PError> {
    let peers = ctx.peer_snapshot().await;
    ctx.cache.refresh_all(&peers).await;
    let peer_files = ctx.directory().await?;
    Ok(Json(json!({ "status": "ok", "peer_files": peer_files })))
}
