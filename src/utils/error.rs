use thiserror::Error;

pub type Result<T> = std::result::Result<T, P2PError>;

#[derive(Error, Debug)]
pub enum P2PError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("Upstream transfer failed: {0}")]
    UpstreamTransfer(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Peer already registered: {0}")]
    DuplicatePeer(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl P2PError {
    /// Failures talking to another node. These never reach the end user as
    /// anything other than "that peer does not have the file".
    pub fn is_peer_failure(&self) -> bool {
        matches!(
            self,
            P2PError::NetworkError(_)
                | P2PError::PeerUnreachable(_)
                | P2PError::InvalidResponse(_)
                | P2PError::SerializationError(_)
                | P2PError::MessageTooLarge(_)
        )
    }
}

impl From<std::io::Error> for P2PError {
    fn from(err: std::io::Error) -> Self {
        P2PError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for P2PError {
    fn from(err: serde_json::Error) -> Self {
        P2PError::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for P2PError {
    fn from(err: bincode::Error) -> Self {
        P2PError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for P2PError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            P2PError::PeerUnreachable(err.to_string())
        } else if err.is_decode() {
            P2PError::InvalidResponse(err.to_string())
        } else {
            P2PError::NetworkError(err.to_string())
        }
    }
}
