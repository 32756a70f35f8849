pub mod config;
pub mod node;
pub mod peer;
pub mod protocol;

pub use config::{Config, LocatePolicy, PeerConfig};
pub use node::{Node, NodeContext, NodeHandle};
pub use peer::{Peer, PeerManager};
pub use protocol::{ChunkFrame, Message, Request, Status, StatusCode, UploadStatus};
