//! peer-share: a small peer-to-peer file exchange.
//!
//! Each node shares one directory, answers "who has this file" across a
//! manually configured set of peers, and relays files it does not hold
//! from a peer that does. Both an HTTP interface and a framed TCP
//! streaming interface are served.

pub mod core;
pub mod directory;
pub mod network;
pub mod storage;
pub mod transfer;
pub mod utils;

pub use core::{Config, LocatePolicy, Node, NodeContext, NodeHandle, Peer};
pub use directory::{LocateResult, Source};
pub use network::RpcClient;
pub use storage::{FileManager, CHUNK_SIZE};
pub use utils::{
    error::{P2PError, Result},
    setup_logging,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
