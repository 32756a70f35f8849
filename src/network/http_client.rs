use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::core::Peer;
use crate::directory::ListingSource;
use crate::utils::{P2PError, Result};

/// Marks an outbound download as a relay hop so the receiving node serves
/// it from local storage only.
pub const FORWARDED_HEADER: &str = "x-peer-share-forwarded";

#[derive(Debug, Deserialize)]
struct FilesResponse {
    peer_files: HashMap<String, Vec<String>>,
}

/// Outbound HTTP calls to other nodes.
///
/// Listing queries and relay downloads use separate clients: a short
/// overall timeout for metadata, a connect/read bound for file bodies.
#[derive(Clone)]
pub struct PeerHttpClient {
    listing: reqwest::Client,
    transfer: reqwest::Client,
}

impl PeerHttpClient {
    pub fn new(listing_timeout: Duration, relay_timeout: Duration) -> Result<Self> {
        let listing = reqwest::Client::builder()
            .timeout(listing_timeout)
            .build()
            .map_err(|e| P2PError::ConfigError(format!("failed to build HTTP client: {}", e)))?;
        let transfer = reqwest::Client::builder()
            .connect_timeout(relay_timeout)
            .read_timeout(relay_timeout)
            .build()
            .map_err(|e| P2PError::ConfigError(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { listing, transfer })
    }

    /// Start a streaming GET of a remote file. Only a success status is
    /// returned as `Ok`; the body has not been read yet.
    pub async fn open_download(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .transfer
            .get(url)
            .header(FORWARDED_HEADER, "1")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(P2PError::FileNotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(P2PError::InvalidResponse(format!(
                "{} answered {}",
                url, status
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ListingSource for PeerHttpClient {
    async fn fetch_listing(&self, peer: &Peer) -> Result<BTreeSet<String>> {
        let url = peer.files_url().ok_or_else(|| {
            P2PError::PeerUnreachable(format!("peer {} has no HTTP address", peer.name))
        })?;

        let response = self.listing.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(P2PError::InvalidResponse(format!(
                "{} answered {}",
                url, status
            )));
        }

        let body: FilesResponse = response.json().await?;
        let files = body.peer_files.get(&peer.name).ok_or_else(|| {
            P2PError::InvalidResponse(format!("{} has no entry for {}", url, peer.name))
        })?;

        debug!("Fetched listing of {} ({} files)", peer.name, files.len());
        Ok(files.iter().cloned().collect())
    }
}
