pub mod chunk;
pub mod file_manager;

pub use chunk::{CHUNK_SIZE, ChunkReader};
pub use file_manager::{FileManager, IncomingFile, validate_filename};
