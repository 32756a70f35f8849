pub mod downloader;
pub mod relay;
pub mod uploader;

pub use downloader::Downloader;
pub use relay::{FloodOutcome, Relay, RELAY_SOURCE_HEADER};
pub use uploader::Uploader;
