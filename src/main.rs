use clap::{Parser, Subcommand};
use log::info;
use peer_share::core::{LocatePolicy, PeerConfig};
use peer_share::transfer::Downloader;
use peer_share::{setup_logging, Config, Node, P2PError, Result, RpcClient};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "peer-share")]
#[command(about = "A small peer-to-peer file exchange with location and relay")]
#[command(version)]
struct Cli {
    /// Default log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a peer node
    Start {
        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Node name
        #[arg(short, long)]
        name: Option<String>,
        /// Directory to share files from
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Address to bind and advertise
        #[arg(long)]
        host: Option<String>,
        /// HTTP port
        #[arg(long)]
        http_port: Option<u16>,
        /// RPC port
        #[arg(long)]
        rpc_port: Option<u16>,
        /// Known peer as name=url[,rpc]; repeatable
        #[arg(short, long = "peer", value_parser = parse_peer)]
        peers: Vec<PeerConfig>,
        /// How locate consults remote peers
        #[arg(long, value_enum)]
        policy: Option<LocatePolicy>,
    },
    /// List the files a node knows about
    List {
        /// HTTP base URL of the node
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        url: String,
    },
    /// Ask a node who has a file
    Locate {
        /// HTTP base URL of the node
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        url: String,
        filename: String,
    },
    /// Download a file over RPC
    Download {
        /// RPC address of the node (host:port)
        #[arg(long, default_value = "127.0.0.1:50050")]
        rpc: String,
        filename: String,
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Connect and idle timeout in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,
    },
    /// Upload a file over RPC
    Upload {
        /// RPC address of the node (host:port)
        #[arg(long, default_value = "127.0.0.1:50050")]
        rpc: String,
        path: PathBuf,
        /// Name to store the file under; defaults to the file's own name
        #[arg(long)]
        name: Option<String>,
        /// Connect and idle timeout in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,
    },
}

fn parse_peer(raw: &str) -> std::result::Result<PeerConfig, String> {
    let (name, endpoints) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=url[,rpc], got {:?}", raw))?;
    let (url, rpc) = match endpoints.split_once(',') {
        Some((url, rpc)) => (url, Some(rpc)),
        None => (endpoints, None),
    };
    let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());

    let mut peer = PeerConfig::new(name.trim(), non_empty(url), rpc.and_then(non_empty));
    peer.normalise();
    if peer.url.is_none() && peer.rpc.is_none() {
        return Err(format!("peer {:?} has no address", name));
    }
    Ok(peer)
}

async fn get_json(url: &str) -> Result<serde_json::Value> {
    let response = reqwest::get(url).await?;
    let status = response.status();
    let body: serde_json::Value = response.json().await?;
    if !status.is_success() {
        return Err(P2PError::InvalidResponse(format!("{} answered {}: {}", url, status, body)));
    }
    Ok(body)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    match cli.command {
        Commands::Start {
            config,
            name,
            dir,
            host,
            http_port,
            rpc_port,
            peers,
            policy,
        } => {
            let mut config = match config {
                Some(path) => Config::load(&path)?,
                None => Config::default(),
            };
            if let Some(name) = name {
                config.name = name;
            }
            if let Some(dir) = dir {
                config.directory = dir;
            }
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = http_port {
                config.http_port = port;
            }
            if let Some(port) = rpc_port {
                config.rpc_port = port;
            }
            if let Some(policy) = policy {
                config.locate_policy = policy;
            }
            config.peers.extend(peers);

            let node = Node::new(config).await?;
            node.start().await?;
        }
        Commands::List { url } => {
            let body = get_json(&format!("{}/files", url.trim_end_matches('/'))).await?;
            println!("Files known to {}:", url);
            if let Some(peer_files) = body["peer_files"].as_object() {
                for (peer, files) in peer_files {
                    println!("  {}:", peer);
                    for file in files.as_array().into_iter().flatten() {
                        println!("    {}", file.as_str().unwrap_or_default());
                    }
                }
            }
        }
        Commands::Locate { url, filename } => {
            let base = url.trim_end_matches('/');
            let client = reqwest::Client::new();
            let response = client
                .get(format!("{}/locate", base))
                .query(&[("filename", filename.as_str())])
                .send()
                .await?;
            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Download {
            rpc,
            filename,
            output,
            timeout,
        } => {
            let output = output.unwrap_or_else(|| PathBuf::from(&filename));
            let bytes =
                Downloader::download_to(&rpc, &filename, &output, Duration::from_secs(timeout))
                    .await?;
            println!("Download completed: {:?} ({} bytes)", output, bytes);
        }
        Commands::Upload {
            rpc,
            path,
            name,
            timeout,
        } => {
            let filename = match name {
                Some(name) => name,
                None => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        P2PError::InvalidFilename(path.display().to_string())
                    })?,
            };
            let file = tokio::fs::File::open(&path).await?;
            let status =
                RpcClient::upload(&rpc, &filename, file, Duration::from_secs(timeout)).await?;
            if !status.success {
                return Err(P2PError::UpstreamTransfer(status.message));
            }
            info!("Upload of {} acknowledged", filename);
            println!("Upload completed: {}", status.message);
        }
    }

    Ok(())
}
