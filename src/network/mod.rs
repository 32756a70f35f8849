pub mod http_api;
pub mod http_client;
pub mod rpc_client;
pub mod rpc_server;
pub mod transport;

pub use http_client::{PeerHttpClient, FORWARDED_HEADER};
pub use rpc_client::{DownloadStream, RpcClient};
pub use rpc_server::RpcServer;
pub use transport::Transport;
