use futures::stream::{self, StreamExt};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

use crate::core::{LocatePolicy, Peer};
use crate::directory::DirectoryCache;
use crate::storage::FileManager;
use crate::utils::Result;

/// One place a file can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub peer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_addr: Option<String>,
}

impl Source {
    fn from_peer(peer: &Peer, filename: &str) -> Self {
        Self {
            peer: peer.name.clone(),
            download_url: peer.download_url(filename),
            rpc_addr: peer.rpc.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocateResult {
    pub found: bool,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
}

impl LocateResult {
    pub fn first_remote(&self, local_name: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.peer != local_name)
    }
}

/// Answers "who has F": the local node first, then remote peers in
/// configured order. Never ranks, never errors on a peer failure.
pub struct LocationResolver {
    local: RwLock<Peer>,
    files: FileManager,
    cache: Arc<DirectoryCache>,
    policy: LocatePolicy,
}

impl LocationResolver {
    pub fn new(
        local_name: &str,
        files: FileManager,
        cache: Arc<DirectoryCache>,
        policy: LocatePolicy,
    ) -> Self {
        Self {
            local: RwLock::new(Peer::new(local_name, None, None)),
            files,
            cache,
            policy,
        }
    }

    /// Record the addresses this node advertises for itself, once known.
    pub fn set_local_endpoints(&self, url: Option<String>, rpc: Option<String>) {
        let mut local = self.local.write().unwrap_or_else(|e| e.into_inner());
        *local = Peer::new(local.name.clone(), url, rpc);
    }

    pub fn local_peer(&self) -> Peer {
        self.local.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn policy(&self) -> LocatePolicy {
        self.policy
    }

    pub async fn locate(&self, filename: &str, peers: &[Peer]) -> Result<LocateResult> {
        let mut sources = Vec::new();

        if self.files.list_local_files().await?.contains(filename) {
            sources.push(Source::from_peer(&self.local_peer(), filename));
        }

        let remote_hits: Vec<bool> = match self.policy {
            LocatePolicy::Live => {
                stream::iter(peers.iter().cloned())
                    .map(|peer| async move {
                        if peer.url.is_none() {
                            return false;
                        }
                        self.cache
                            .try_refresh(&peer)
                            .await
                            .is_some_and(|listing| listing.contains(filename))
                    })
                    .buffered(self.cache.fanout())
                    .collect()
                    .await
            }
            LocatePolicy::Cached => {
                let mut hits = Vec::with_capacity(peers.len());
                for peer in peers {
                    let hit = self
                        .cache
                        .get(&peer.name)
                        .await
                        .is_some_and(|listing| listing.contains(filename));
                    hits.push(hit);
                }
                hits
            }
        };

        for (peer, hit) in peers.iter().zip(remote_hits) {
            if hit {
                sources.push(Source::from_peer(peer, filename));
            }
        }

        debug!(
            "locate({}) [{:?}] -> {} source(s)",
            filename,
            self.policy,
            sources.len()
        );
        Ok(LocateResult {
            found: !sources.is_empty(),
            filename: filename.to_string(),
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::cache::tests::FakeListings;

    fn peer(name: &str) -> Peer {
        Peer::new(name, Some(format!("http://{}", name)), None)
    }

    async fn setup(
        policy: LocatePolicy,
    ) -> (tempfile::TempDir, Arc<FakeListings>, Arc<DirectoryCache>, LocationResolver) {
        let dir = tempfile::tempdir().unwrap();
        let files = FileManager::new(dir.path().to_path_buf()).await.unwrap();
        let source = Arc::new(FakeListings::default());
        let cache = Arc::new(DirectoryCache::new(source.clone(), 4));
        let resolver = LocationResolver::new("me", files, cache.clone(), policy);
        resolver.set_local_endpoints(Some("http://me".into()), Some("me:1".into()));
        (dir, source, cache, resolver)
    }

    #[tokio::test]
    async fn test_local_only_file_has_single_local_source() {
        let (dir, source, _cache, resolver) = setup(LocatePolicy::Live).await;
        std::fs::write(dir.path().join("mine.txt"), b"x").unwrap();
        source.set_down("a", true);

        let result = resolver.locate("mine.txt", &[peer("a"), peer("b")]).await.unwrap();

        assert!(result.found);
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].peer, "me");
        assert_eq!(
            result.sources[0].download_url.as_deref(),
            Some("http://me/download/mine.txt")
        );
    }

    #[tokio::test]
    async fn test_local_source_comes_first_then_config_order() {
        let (dir, source, _cache, resolver) = setup(LocatePolicy::Live).await;
        std::fs::write(dir.path().join("shared.txt"), b"x").unwrap();
        source.set("b", &["shared.txt"]);
        source.set("a", &["shared.txt"]);

        let result = resolver
            .locate("shared.txt", &[peer("b"), peer("a")])
            .await
            .unwrap();
        let order: Vec<_> = result.sources.iter().map(|s| s.peer.as_str()).collect();
        assert_eq!(order, vec!["me", "b", "a"]);
    }

    #[tokio::test]
    async fn test_live_policy_treats_unreachable_peer_as_miss() {
        let (_dir, source, cache, resolver) = setup(LocatePolicy::Live).await;
        source.set("a", &["remote.txt"]);

        let hit = resolver.locate("remote.txt", &[peer("a")]).await.unwrap();
        assert_eq!(hit.sources.len(), 1);
        assert_eq!(hit.sources[0].peer, "a");

        source.set_down("a", true);
        let miss = resolver.locate("remote.txt", &[peer("a")]).await.unwrap();
        assert!(!miss.found);
        assert!(miss.sources.is_empty());
        // The stale snapshot is still cached, only this locate ignored it.
        assert!(cache.get("a").await.unwrap().contains("remote.txt"));
    }

    #[tokio::test]
    async fn test_cached_policy_answers_from_snapshot() {
        let (_dir, source, cache, resolver) = setup(LocatePolicy::Cached).await;
        source.set("a", &["remote.txt"]);

        let before = resolver.locate("remote.txt", &[peer("a")]).await.unwrap();
        assert!(!before.found);

        cache.refresh(&peer("a")).await;
        source.set_down("a", true);
        let after = resolver.locate("remote.txt", &[peer("a")]).await.unwrap();
        assert!(after.found);
        assert_eq!(after.sources[0].peer, "a");
    }

    #[tokio::test]
    async fn test_missing_everywhere_is_not_an_error() {
        let (_dir, _source, _cache, resolver) = setup(LocatePolicy::Live).await;
        let result = resolver.locate("ghost", &[peer("a")]).await.unwrap();
        assert!(!result.found);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({"found": false, "filename": "ghost"}));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_locate_future_is_send() {
        let (_dir, source, _cache, resolver) = setup(LocatePolicy::Live).await;
        source.set("a", &["f"]);
        let peers = vec![peer("a")];
        let locating = resolver.locate("f", &peers);
        assert_send(&locating);
        assert!(locating.await.unwrap().found);
    }

    #[tokio::test]
    async fn test_rpc_only_peer_is_never_a_live_hit() {
        let (_dir, source, _cache, resolver) = setup(LocatePolicy::Live).await;
        source.set("r", &["f"]);
        let rpc_only = Peer::new("r", None, Some("r:1".into()));

        let result = resolver.locate("f", &[rpc_only]).await.unwrap();
        assert!(!result.found);
    }
}
