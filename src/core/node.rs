use log::{error, info};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::{Config, Peer, PeerManager};
use crate::directory::{DirectoryCache, LocateResult, LocationResolver};
use crate::network::{http_api, PeerHttpClient, RpcServer, Transport};
use crate::storage::{validate_filename, FileManager};
use crate::transfer::{Downloader, Uploader};
use crate::utils::Result;

/// Everything a request handler needs, shared by both bindings.
pub struct NodeContext {
    pub config: Config,
    pub files: FileManager,
    pub peers: RwLock<PeerManager>,
    pub cache: Arc<DirectoryCache>,
    pub resolver: LocationResolver,
    pub http: PeerHttpClient,
    pub uploader: Uploader,
    pub downloader: Downloader,
}

impl NodeContext {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let files = FileManager::new(config.directory.clone()).await?;
        let peers = PeerManager::from_config(&config.name, &config.peers)?;
        let http = PeerHttpClient::new(config.listing_timeout(), config.relay_timeout())?;
        let cache = Arc::new(DirectoryCache::new(Arc::new(http.clone()), config.fanout));
        let resolver = LocationResolver::new(
            &config.name,
            files.clone(),
            cache.clone(),
            config.locate_policy,
        );

        Ok(Self {
            peers: RwLock::new(peers),
            cache,
            resolver,
            http,
            uploader: Uploader::new(files.clone()),
            downloader: Downloader::new(files.clone()),
            files,
            config,
        })
    }

    pub fn local_name(&self) -> &str {
        &self.config.name
    }

    pub async fn peer_snapshot(&self) -> Arc<Vec<Peer>> {
        self.peers.read().await.snapshot()
    }

    /// The local listing, read from disk, plus the last known listing of
    /// every remote peer.
    pub async fn directory(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut entries: BTreeMap<String, Vec<String>> = self
            .cache
            .snapshot()
            .await
            .into_iter()
            .map(|(peer, listing)| (peer, listing.iter().cloned().collect()))
            .collect();
        let local = self.files.list_local_files().await?;
        entries.insert(self.local_name().to_string(), local.into_iter().collect());
        Ok(entries)
    }

    /// Like [`directory`](Self::directory) but queries every peer now.
    /// Peers that fail to answer are left out.
    pub async fn network_directory(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let peers = self.peer_snapshot().await;
        let mut entries: BTreeMap<String, Vec<String>> = self
            .cache
            .refresh_all(&peers)
            .await
            .into_iter()
            .filter_map(|(peer, listing)| Some((peer, listing?.iter().cloned().collect())))
            .collect();
        let local = self.files.list_local_files().await?;
        entries.insert(self.local_name().to_string(), local.into_iter().collect());
        Ok(entries)
    }

    pub async fn locate(&self, filename: &str) -> Result<LocateResult> {
        validate_filename(filename)?;
        let peers = self.peer_snapshot().await;
        self.resolver.locate(filename, &peers).await
    }
}

/// A running node: both listeners are bound and serving.
pub struct NodeHandle {
    http_addr: SocketAddr,
    rpc_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.http_addr)
    }

    /// Stop accepting and wait for both servers to wind down.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Server task ended abnormally: {}", e);
            }
        }
    }
}

pub struct Node {
    id: Uuid,
    context: Arc<NodeContext>,
}

impl Node {
    pub async fn new(config: Config) -> Result<Self> {
        let context = Arc::new(NodeContext::new(config).await?);
        Ok(Self {
            id: Uuid::new_v4(),
            context,
        })
    }

    pub fn context(&self) -> Arc<NodeContext> {
        self.context.clone()
    }

    /// Bind both listeners and spawn their servers.
    pub async fn serve(&self) -> Result<NodeHandle> {
        let config = &self.context.config;
        let http_listener = Transport::listen(&config.http_bind_addr()).await?;
        let rpc_listener = Transport::listen(&config.rpc_bind_addr()).await?;
        let http_addr = http_listener.local_addr()?;
        let rpc_addr = rpc_listener.local_addr()?;

        let public_url = config
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", config.host, http_addr.port()));
        let public_rpc = format!("{}:{}", config.host, rpc_addr.port());
        self.context
            .resolver
            .set_local_endpoints(Some(public_url), Some(public_rpc));

        info!(
            "Starting node {} ({}) serving {} [http {}, rpc {}, {} peer(s), {:?} locate]",
            self.id,
            config.name,
            self.context.files.root().display(),
            http_addr,
            rpc_addr,
            self.context.peers.read().await.peer_count(),
            config.locate_policy
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut http_shutdown = shutdown_rx.clone();
        let app = http_api::router(self.context.clone());
        let http_task = tokio::spawn(async move {
            let result = axum::serve(http_listener, app)
                .with_graceful_shutdown(async move {
                    let _ = http_shutdown.changed().await;
                })
                .await;
            match result {
                Ok(()) => info!("HTTP server stopped"),
                Err(e) => error!("HTTP server failed: {}", e),
            }
        });

        let rpc_server = RpcServer::new(self.context.clone());
        let rpc_task = tokio::spawn(rpc_server.run(rpc_listener, shutdown_rx));

        Ok(NodeHandle {
            http_addr,
            rpc_addr,
            shutdown: shutdown_tx,
            tasks: vec![http_task, rpc_task],
        })
    }

    /// Serve until Ctrl+C.
    pub async fn start(&self) -> Result<()> {
        let handle = self.serve().await?;

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down");

        handle.shutdown().await;
        Ok(())
    }
}
