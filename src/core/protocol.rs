//! Streaming RPC wire messages.
//!
//! Every call runs on its own TCP connection. The caller opens with a
//! [`Message::Request`]; what follows depends on the call:
//!
//! * `DownloadFile`: the server sends zero or more [`Message::Chunk`]
//!   frames and ends the call with a single [`Message::Status`] trailer.
//! * `UploadFile`: the caller sends [`Message::Chunk`] frames and then
//!   shuts down its write half. The server answers with one
//!   [`Message::UploadStatus`].

use serde::{Deserialize, Serialize};
use std::fmt;

pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    DownloadFile {
        filename: String,
        /// Set when the request is itself a relay hop. A node serving a
        /// forwarded request answers from local storage only.
        forwarded: bool,
    },
    UploadFile,
}

/// One unit of a transfer. `sequence` starts at 0 per transfer and is
/// advisory only.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFrame {
    pub filename: String,
    pub sequence: u64,
    pub payload: Vec<u8>,
}

impl fmt::Debug for ChunkFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkFrame")
            .field("filename", &self.filename)
            .field("sequence", &self.sequence)
            .field("len", &self.payload.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    NotFound,
    InvalidArgument,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            message: String::new(),
        }
    }

    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStatus {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Request { version: u8, request: Request },
    Chunk(ChunkFrame),
    Status(Status),
    UploadStatus(UploadStatus),
}

impl Message {
    pub fn download_request(filename: impl Into<String>, forwarded: bool) -> Self {
        Message::Request {
            version: PROTOCOL_VERSION,
            request: Request::DownloadFile {
                filename: filename.into(),
                forwarded,
            },
        }
    }

    pub fn upload_request() -> Self {
        Message::Request {
            version: PROTOCOL_VERSION,
            request: Request::UploadFile,
        }
    }

    pub fn chunk(filename: impl Into<String>, sequence: u64, payload: Vec<u8>) -> Self {
        Message::Chunk(ChunkFrame {
            filename: filename.into(),
            sequence,
            payload,
        })
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Message::Status(Status::new(StatusCode::NotFound, message))
    }

    pub fn upload_status(success: bool, message: impl Into<String>) -> Self {
        Message::UploadStatus(UploadStatus {
            success,
            message: message.into(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request { .. } => "request",
            Message::Chunk(_) => "chunk",
            Message::Status(_) => "status",
            Message::UploadStatus(_) => "upload_status",
        }
    }
}
