use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{P2PError, Result};

/// How the resolver answers for remote peers. A node runs exactly one
/// policy; the two are never mixed within a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LocatePolicy {
    /// Re-query every peer's listing on each locate.
    #[default]
    Live,
    /// Answer from the directory cache only.
    Cached,
}

/// A statically configured peer.
///
/// Accepts either explicit `url`/`rpc` addresses or the
/// `ip`/`port_rest`/`port_grpc` triple, which is normalised on load.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc: Option<String>,
    #[serde(default, skip_serializing)]
    pub ip: Option<String>,
    #[serde(default, skip_serializing)]
    pub port_rest: Option<u16>,
    #[serde(default, skip_serializing)]
    pub port_grpc: Option<u16>,
}

impl PeerConfig {
    pub fn new(name: impl Into<String>, url: Option<String>, rpc: Option<String>) -> Self {
        Self {
            name: name.into(),
            url,
            rpc,
            ..Default::default()
        }
    }

    pub fn normalise(&mut self) {
        if let Some(ip) = &self.ip {
            if self.url.is_none() {
                if let Some(port) = self.port_rest {
                    self.url = Some(format!("http://{}:{}", ip, port));
                }
            }
            if self.rpc.is_none() {
                if let Some(port) = self.port_grpc {
                    self.rpc = Some(format!("{}:{}", ip, port));
                }
            }
        }
        if let Some(url) = &mut self.url {
            while url.ends_with('/') {
                url.pop();
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8000
}

fn default_rpc_port() -> u16 {
    50050
}

fn default_listing_timeout() -> u64 {
    5
}

fn default_relay_timeout() -> u64 {
    10
}

fn default_rpc_max_concurrent() -> usize {
    10
}

fn default_fanout() -> usize {
    4
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub name: String,
    #[serde(alias = "shared_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_host", alias = "ip")]
    pub host: String,
    #[serde(default = "default_http_port", alias = "port_rest")]
    pub http_port: u16,
    #[serde(default = "default_rpc_port", alias = "port_grpc")]
    pub rpc_port: u16,
    /// Base URL other nodes use to reach this node's HTTP interface.
    /// Derived from `host` and the bound port when absent.
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default)]
    pub locate_policy: LocatePolicy,
    #[serde(default = "default_listing_timeout")]
    pub listing_timeout_secs: u64,
    #[serde(default = "default_relay_timeout")]
    pub relay_timeout_secs: u64,
    #[serde(default = "default_rpc_max_concurrent")]
    pub rpc_max_concurrent: usize,
    #[serde(default = "default_fanout")]
    pub fanout: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "peer1".to_string(),
            directory: PathBuf::from("./shared"),
            host: default_host(),
            http_port: default_http_port(),
            rpc_port: default_rpc_port(),
            public_url: None,
            peers: Vec::new(),
            locate_policy: LocatePolicy::default(),
            listing_timeout_secs: default_listing_timeout(),
            relay_timeout_secs: default_relay_timeout(),
            rpc_max_concurrent: default_rpc_max_concurrent(),
            fanout: default_fanout(),
        }
    }
}

impl Config {
    /// Load a JSON config file and normalise its peer entries.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            P2PError::ConfigError(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
            .map_err(|e| P2PError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let mut config: Config = serde_json::from_str(raw)
            .map_err(|e| P2PError::ConfigError(format!("invalid config: {}", e)))?;
        config.normalise();
        Ok(config)
    }

    pub fn normalise(&mut self) {
        for peer in &mut self.peers {
            peer.normalise();
        }
        if let Some(url) = &mut self.public_url {
            while url.ends_with('/') {
                url.pop();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(P2PError::ConfigError("node name must not be empty".into()));
        }
        if self.rpc_max_concurrent == 0 {
            return Err(P2PError::ConfigError(
                "rpc_max_concurrent must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        seen.insert(self.name.as_str());
        for peer in &self.peers {
            if peer.name.trim().is_empty() {
                return Err(P2PError::ConfigError("peer name must not be empty".into()));
            }
            if !seen.insert(peer.name.as_str()) {
                return Err(P2PError::ConfigError(format!(
                    "peer name {:?} is used more than once (or matches this node)",
                    peer.name
                )));
            }
            if peer.url.is_none() && peer.rpc.is_none() {
                return Err(P2PError::ConfigError(format!(
                    "peer {:?} has neither an HTTP url nor an RPC address",
                    peer.name
                )));
            }
        }
        Ok(())
    }

    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }

    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    pub fn rpc_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.rpc_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loads_legacy_peer_layout() {
        let raw = r#"{
            "name": "peer2",
            "ip": "10.0.0.2",
            "port_rest": 8002,
            "port_grpc": 50052,
            "directory": "/srv/shared",
            "peers": [
                {"name": "peer1", "ip": "10.0.0.1", "port_rest": 8001, "port_grpc": 50051},
                {"name": "peer3", "url": "http://10.0.0.3:8003/"}
            ]
        }"#;
        let config = Config::from_json(raw).unwrap();

        assert_eq!(config.host, "10.0.0.2");
        assert_eq!(config.http_port, 8002);
        assert_eq!(config.rpc_port, 50052);
        assert_eq!(config.peers[0].url.as_deref(), Some("http://10.0.0.1:8001"));
        assert_eq!(config.peers[0].rpc.as_deref(), Some("10.0.0.1:50051"));
        assert_eq!(config.peers[1].url.as_deref(), Some("http://10.0.0.3:8003"));
        assert_eq!(config.peers[1].rpc, None);
        assert_eq!(config.locate_policy, LocatePolicy::Live);
        assert_eq!(config.listing_timeout_secs, 5);
        assert_eq!(config.relay_timeout_secs, 10);
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_duplicate_peer_names() {
        let mut config = Config::default();
        config.peers = vec![
            PeerConfig::new("a", Some("http://a".into()), None),
            PeerConfig::new("a", Some("http://b".into()), None),
        ];
        assert!(matches!(config.validate(), Err(P2PError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_peer_named_like_self() {
        let mut config = Config::default();
        config.peers = vec![PeerConfig::new(config.name.clone(), Some("http://x".into()), None)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_peer_without_address() {
        let mut config = Config::default();
        config.peers = vec![PeerConfig::new("lonely", None, None)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cached_policy_parses() {
        let config =
            Config::from_json(r#"{"name": "n", "directory": "d", "locate_policy": "cached"}"#)
                .unwrap();
        assert_eq!(config.locate_policy, LocatePolicy::Cached);
    }
}
