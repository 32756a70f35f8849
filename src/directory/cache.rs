use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::Peer;
use crate::utils::Result;

/// A peer's file listing. Replaced wholesale on refresh, never mutated, so
/// readers holding an old `Arc` keep a consistent view.
pub type Listing = Arc<BTreeSet<String>>;

/// Where remote listings come from.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_listing(&self, peer: &Peer) -> Result<BTreeSet<String>>;
}

/// Last observed listing of every remote peer.
///
/// Failed refreshes are swallowed and leave the previous snapshot in
/// place, so callers cannot tell "unreachable" from "unchanged".
pub struct DirectoryCache {
    source: Arc<dyn ListingSource>,
    entries: RwLock<HashMap<String, Listing>>,
    fanout: usize,
}

impl DirectoryCache {
    pub fn new(source: Arc<dyn ListingSource>, fanout: usize) -> Self {
        Self {
            source,
            entries: RwLock::new(HashMap::new()),
            fanout: fanout.max(1),
        }
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    pub async fn get(&self, peer_name: &str) -> Option<Listing> {
        self.entries.read().await.get(peer_name).cloned()
    }

    pub async fn refresh(&self, peer: &Peer) {
        let _ = self.try_refresh(peer).await;
    }

    /// Refresh one peer, returning the new listing only if this attempt
    /// succeeded.
    pub async fn try_refresh(&self, peer: &Peer) -> Option<Listing> {
        match self.source.fetch_listing(peer).await {
            Ok(files) => {
                let listing: Listing = Arc::new(files);
                debug!("Peer {} lists {} files", peer.name, listing.len());
                self.entries
                    .write()
                    .await
                    .insert(peer.name.clone(), listing.clone());
                Some(listing)
            }
            Err(e) => {
                warn!("Listing query to peer {} failed: {}", peer.name, e);
                None
            }
        }
    }

    /// Refresh every peer with at most `fanout` queries in flight. Results
    /// come back in the order of `peers`.
    pub async fn refresh_all(&self, peers: &[Peer]) -> Vec<(String, Option<Listing>)> {
        stream::iter(peers.iter().cloned())
            .map(|peer| async move {
                let listing = self.try_refresh(&peer).await;
                (peer.name, listing)
            })
            .buffered(self.fanout)
            .collect()
            .await
    }

    pub async fn snapshot(&self) -> HashMap<String, Listing> {
        self.entries.read().await.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::utils::P2PError;
    use std::sync::Mutex;

    /// Scripted listing source: each peer answers with its configured
    /// files, or fails while marked down.
    #[derive(Default)]
    pub(crate) struct FakeListings {
        files: Mutex<HashMap<String, BTreeSet<String>>>,
        down: Mutex<BTreeSet<String>>,
    }

    impl FakeListings {
        pub(crate) fn set(&self, peer: &str, files: &[&str]) {
            self.files.lock().unwrap().insert(
                peer.to_string(),
                files.iter().map(|f| f.to_string()).collect(),
            );
        }

        pub(crate) fn set_down(&self, peer: &str, down: bool) {
            let mut set = self.down.lock().unwrap();
            if down {
                set.insert(peer.to_string());
            } else {
                set.remove(peer);
            }
        }
    }

    #[async_trait]
    impl ListingSource for FakeListings {
        async fn fetch_listing(&self, peer: &Peer) -> Result<BTreeSet<String>> {
            if self.down.lock().unwrap().contains(&peer.name) {
                return Err(P2PError::PeerUnreachable(peer.name.clone()));
            }
            Ok(self
                .files
                .lock()
                .unwrap()
                .get(&peer.name)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn peer(name: &str) -> Peer {
        Peer::new(name, Some(format!("http://{}", name)), None)
    }

    #[tokio::test]
    async fn test_absent_until_first_successful_refresh() {
        let source = Arc::new(FakeListings::default());
        source.set("a", &["x"]);
        source.set_down("a", true);
        let cache = DirectoryCache::new(source.clone(), 4);

        cache.refresh(&peer("a")).await;
        assert!(cache.get("a").await.is_none());

        source.set_down("a", false);
        cache.refresh(&peer("a")).await;
        assert!(cache.get("a").await.unwrap().contains("x"));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_known_listing() {
        let source = Arc::new(FakeListings::default());
        source.set("a", &["one", "two"]);
        let cache = DirectoryCache::new(source.clone(), 4);
        cache.refresh(&peer("a")).await;

        source.set("a", &[]);
        source.set_down("a", true);
        assert!(cache.try_refresh(&peer("a")).await.is_none());

        let listing = cache.get("a").await.unwrap();
        assert_eq!(listing.len(), 2);
    }

    #[tokio::test]
    async fn test_successful_refresh_replaces_listing() {
        let source = Arc::new(FakeListings::default());
        source.set("a", &["old"]);
        let cache = DirectoryCache::new(source.clone(), 4);
        cache.refresh(&peer("a")).await;
        let held = cache.get("a").await.unwrap();

        source.set("a", &["new"]);
        cache.refresh(&peer("a")).await;

        assert!(held.contains("old"));
        let current = cache.get("a").await.unwrap();
        assert!(current.contains("new"));
        assert!(!current.contains("old"));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_refresh_all_future_is_send() {
        let cache = DirectoryCache::new(Arc::new(FakeListings::default()), 2);
        let peers = vec![peer("a"), peer("b")];
        let refresh = cache.refresh_all(&peers);
        assert_send(&refresh);
        assert_eq!(refresh.await.len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_all_preserves_peer_order() {
        let source = Arc::new(FakeListings::default());
        source.set("a", &["1"]);
        source.set("b", &["2"]);
        source.set("c", &["3"]);
        source.set_down("b", true);
        let cache = DirectoryCache::new(source, 2);

        let results = cache
            .refresh_all(&[peer("c"), peer("a"), peer("b")])
            .await;
        let summary: Vec<_> = results
            .iter()
            .map(|(name, listing)| (name.as_str(), listing.is_some()))
            .collect();
        assert_eq!(summary, vec![("c", true), ("a", true), ("b", false)]);
        assert_eq!(cache.snapshot().await.len(), 2);
    }
}
