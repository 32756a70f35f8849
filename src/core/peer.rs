use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::config::PeerConfig;
use crate::utils::{P2PError, Result};

/// A known remote node. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    /// HTTP base URL, e.g. `http://10.0.0.1:8000`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// RPC endpoint as `host:port`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc: Option<String>,
}

impl Peer {
    pub fn new(name: impl Into<String>, url: Option<String>, rpc: Option<String>) -> Self {
        Self {
            name: name.into(),
            url: url.map(|u| u.trim_end_matches('/').to_string()),
            rpc,
        }
    }

    pub fn files_url(&self) -> Option<String> {
        self.url.as_ref().map(|base| format!("{}/files", base))
    }

    /// Download URL of `filename` on this peer. The filename is a single
    /// percent-encoded path segment, so `#`, `?` and `%` survive the trip.
    pub fn download_url(&self, filename: &str) -> Option<String> {
        let mut url = reqwest::Url::parse(self.url.as_ref()?).ok()?;
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .push("download")
            .push(filename);
        Some(url.into())
    }
}

impl From<&PeerConfig> for Peer {
    fn from(config: &PeerConfig) -> Self {
        Peer::new(config.name.clone(), config.url.clone(), config.rpc.clone())
    }
}

/// The ordered set of known peers.
///
/// Order is the configuration order followed by registration order; it
/// drives source ordering in locate results and the flood order of the
/// RPC relay. Readers get a cheap snapshot of the whole list.
pub struct PeerManager {
    local_name: String,
    peers: Arc<Vec<Peer>>,
}

impl PeerManager {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            peers: Arc::new(Vec::new()),
        }
    }

    pub fn from_config(local_name: &str, peers: &[PeerConfig]) -> Result<Self> {
        let mut manager = Self::new(local_name);
        for peer in peers {
            manager.add_peer(Peer::from(peer))?;
        }
        Ok(manager)
    }

    pub fn add_peer(&mut self, peer: Peer) -> Result<()> {
        if peer.name == self.local_name || self.peers.iter().any(|p| p.name == peer.name) {
            return Err(P2PError::DuplicatePeer(peer.name));
        }
        if peer.url.is_none() && peer.rpc.is_none() {
            return Err(P2PError::ConfigError(format!(
                "peer {:?} has no address",
                peer.name
            )));
        }

        info!(
            "Registered peer {} (http: {}, rpc: {})",
            peer.name,
            peer.url.as_deref().unwrap_or("-"),
            peer.rpc.as_deref().unwrap_or("-")
        );
        Arc::make_mut(&mut self.peers).push(peer);
        Ok(())
    }

    pub fn get_peer(&self, name: &str) -> Option<&Peer> {
        self.peers.iter().find(|p| p.name == name)
    }

    pub fn snapshot(&self) -> Arc<Vec<Peer>> {
        self.peers.clone()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserves_registration_order() {
        let mut pm = PeerManager::new("me");
        for name in ["c", "a", "b"] {
            pm.add_peer(Peer::new(name, Some(format!("http://{}", name)), None))
                .unwrap();
        }
        let names: Vec<_> = pm.snapshot().iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_rejects_duplicates_and_self() {
        let mut pm = PeerManager::new("me");
        pm.add_peer(Peer::new("a", Some("http://a".into()), None))
            .unwrap();
        assert!(matches!(
            pm.add_peer(Peer::new("a", Some("http://other".into()), None)),
            Err(P2PError::DuplicatePeer(_))
        ));
        assert!(pm
            .add_peer(Peer::new("me", Some("http://me".into()), None))
            .is_err());
        assert_eq!(pm.peer_count(), 1);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_registration() {
        let mut pm = PeerManager::new("me");
        pm.add_peer(Peer::new("a", None, Some("127.0.0.1:1".into())))
            .unwrap();
        let before = pm.snapshot();
        pm.add_peer(Peer::new("b", None, Some("127.0.0.1:2".into())))
            .unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(pm.snapshot().len(), 2);
    }

    #[test]
    fn test_urls_are_built_from_base() {
        let peer = Peer::new("a", Some("http://host:8000/".into()), None);
        assert_eq!(peer.files_url().unwrap(), "http://host:8000/files");
        assert_eq!(
            peer.download_url("report.pdf").unwrap(),
            "http://host:8000/download/report.pdf"
        );
    }

    #[test]
    fn test_download_url_escapes_reserved_characters() {
        let peer = Peer::new("a", Some("http://host:8000".into()), None);
        assert_eq!(
            peer.download_url("a#1.txt").unwrap(),
            "http://host:8000/download/a%231.txt"
        );
        assert_eq!(
            peer.download_url("50% off?.txt").unwrap(),
            "http://host:8000/download/50%25%20off%3F.txt"
        );

        let parsed = reqwest::Url::parse(&peer.download_url("a#1.txt").unwrap()).unwrap();
        assert!(parsed.fragment().is_none());
        assert_eq!(parsed.path(), "/download/a%231.txt");
    }

    #[test]
    fn test_download_url_keeps_base_path() {
        let peer = Peer::new("a", Some("http://host/share/".into()), None);
        assert_eq!(
            peer.download_url("f").unwrap(),
            "http://host/share/download/f"
        );
        assert!(Peer::new("b", None, Some("h:1".into())).download_url("f").is_none());
    }
}
