use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::utils::{P2PError, Result};

/// Hidden directory under the storage root that holds in-flight uploads.
/// It is a directory, so it never shows up in the local listing.
pub const INCOMING_DIR: &str = ".incoming";

/// The node's storage root. The local directory entry is always read
/// from here, never cached.
#[derive(Debug, Clone)]
pub struct FileManager {
    shared_dir: PathBuf,
}

impl FileManager {
    /// Open (creating if needed) the storage root. Any failure here is a
    /// configuration error and aborts start-up.
    pub async fn new(shared_dir: PathBuf) -> Result<Self> {
        async_fs::create_dir_all(&shared_dir).await.map_err(|e| {
            P2PError::ConfigError(format!(
                "storage root {} is not usable: {}",
                shared_dir.display(),
                e
            ))
        })?;
        async_fs::read_dir(&shared_dir).await.map_err(|e| {
            P2PError::ConfigError(format!(
                "storage root {} is not readable: {}",
                shared_dir.display(),
                e
            ))
        })?;
        async_fs::create_dir_all(shared_dir.join(INCOMING_DIR))
            .await
            .map_err(|e| P2PError::ConfigError(format!("cannot create upload area: {}", e)))?;

        info!("Serving files from {:?}", shared_dir);
        Ok(Self { shared_dir })
    }

    pub fn root(&self) -> &Path {
        &self.shared_dir
    }

    /// Regular files directly under the storage root.
    pub async fn list_local_files(&self) -> Result<BTreeSet<String>> {
        let mut entries = async_fs::read_dir(&self.shared_dir)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read directory: {}", e)))?;

        let mut files = BTreeSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read directory entry: {}", e)))?
        {
            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(e) => {
                    warn!("Skipping {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            if !file_type.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => {
                    files.insert(name);
                }
                Err(raw) => debug!("Skipping non UTF-8 filename {:?}", raw),
            }
        }

        Ok(files)
    }

    pub async fn has_file(&self, filename: &str) -> bool {
        match self.resolve(filename) {
            Ok(path) => async_fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Open a local file for reading, returning it with its length.
    pub async fn open_file(&self, filename: &str) -> Result<(async_fs::File, u64)> {
        let path = self.resolve(filename)?;
        let file = match async_fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(P2PError::FileNotFound(filename.to_string()))
            }
            Err(e) => return Err(P2PError::IoError(format!("Failed to open file: {}", e))),
        };
        let metadata = file
            .metadata()
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read metadata: {}", e)))?;
        if !metadata.is_file() {
            return Err(P2PError::FileNotFound(filename.to_string()));
        }
        Ok((file, metadata.len()))
    }

    /// Start writing `filename`. Bytes land in a temporary file that only
    /// replaces the final name on [`IncomingFile::commit`].
    pub async fn begin_upload(&self, filename: &str) -> Result<IncomingFile> {
        let final_path = self.resolve(filename)?;
        let temp_path = self
            .shared_dir
            .join(INCOMING_DIR)
            .join(format!("{}.part", Uuid::new_v4()));

        let file = async_fs::File::create(&temp_path)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to create upload file: {}", e)))?;

        debug!("Receiving {} into {:?}", filename, temp_path);
        Ok(IncomingFile {
            filename: filename.to_string(),
            temp_path,
            final_path,
            file: Some(file),
            bytes_written: 0,
        })
    }

    fn resolve(&self, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.shared_dir.join(filename))
    }
}

/// Filenames are single path components: no separators, no `.`/`..`,
/// nothing hidden that would collide with the upload area.
pub fn validate_filename(filename: &str) -> Result<()> {
    let invalid = filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename == INCOMING_DIR
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0');
    if invalid {
        return Err(P2PError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

/// An upload in progress.
///
/// Dropping it without calling [`commit`](IncomingFile::commit) discards
/// the partial data.
pub struct IncomingFile {
    filename: String,
    temp_path: PathBuf,
    final_path: PathBuf,
    file: Option<async_fs::File>,
    bytes_written: u64,
}

impl IncomingFile {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| P2PError::IoError("upload already finished".into()))?;
        file.write_all(data)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to write upload: {}", e)))?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Flush and atomically move the file into place.
    pub async fn commit(mut self) -> Result<u64> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| P2PError::IoError(format!("Failed to flush upload: {}", e)))?;
            file.sync_all()
                .await
                .map_err(|e| P2PError::IoError(format!("Failed to sync upload: {}", e)))?;
        }
        async_fs::rename(&self.temp_path, &self.final_path)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to store upload: {}", e)))?;

        info!(
            "Stored {} ({} bytes)",
            self.final_path.display(),
            self.bytes_written
        );
        // Renamed away, nothing left for Drop to clean.
        self.temp_path = PathBuf::new();
        Ok(self.bytes_written)
    }
}

impl Drop for IncomingFile {
    fn drop(&mut self) {
        if self.temp_path.as_os_str().is_empty() {
            return;
        }
        self.file.take();
        if let Err(e) = std::fs::remove_file(&self.temp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to discard partial upload {:?}: {}", self.temp_path, e);
            }
        } else {
            warn!(
                "Discarded partial upload of {} after {} bytes",
                self.filename, self.bytes_written
            );
        }
    }
}
