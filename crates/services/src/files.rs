use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use utils::text::sanitize_filename;

/// Upload storage rooted at `<data_dir>/files`, one directory per entity.
/// File names arrive pre-sanitized; collisions are avoided upstream by the
/// record id scheme rather than locking.
#[derive(Clone)]
pub struct FileService {
    data_dir: PathBuf,
}

impl FileService {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        FileService { data_dir: data_dir.into() }
    }

    pub fn entity_dir(&self, entity: &str) -> PathBuf {
        self.data_dir.join("files").join(entity)
    }

    pub fn file_path(&self, entity: &str, filename: &str) -> PathBuf {
        self.entity_dir(entity).join(filename)
    }

    /// Absolute path when the file exists on disk.
    pub fn resolve(&self, entity: &str, filename: &str) -> Option<PathBuf> {
        // Reject traversal attempts before touching the filesystem.
        if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
            return None;
        }
        let path = self.file_path(entity, filename);
        path.exists().then_some(path)
    }

    pub async fn ensure_dir(&self, entity: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.entity_dir(entity)).await
    }

    /// Writes through a uniquely-named temp file and renames it into
    /// place so readers never observe a partial upload.
    pub async fn save(&self, entity: &str, filename: &str, content: &[u8]) -> std::io::Result<PathBuf> {
        self.ensure_dir(entity).await?;
        let target = self.file_path(entity, filename);
        let staging = self
            .entity_dir(entity)
            .join(format!(".{filename}.{}.part", utils::ids::generate_short_id(8)));
        tokio::fs::write(&staging, content).await?;
        tokio::fs::rename(&staging, &target).await?;
        Ok(target)
    }

    /// Removes a single file; missing files are not an error.
    pub async fn remove(&self, entity: &str, filename: &str) -> std::io::Result<bool> {
        let path = self.file_path(entity, filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Post-commit cleanup: removal failures are logged, never raised.
    pub async fn remove_all_logged(&self, entity: &str, filenames: &[String]) {
        for filename in filenames {
            match self.remove(entity, filename).await {
                Ok(true) => tracing::trace!(entity, %filename, "removed stale file"),
                Ok(false) => tracing::warn!(entity, %filename, "stale file already missing"),
                Err(err) => tracing::warn!(entity, %filename, %err, "failed to remove stale file"),
            }
        }
    }

    pub async fn rename_dir(&self, old: &str, new: &str) -> std::io::Result<()> {
        let old_path = self.entity_dir(old);
        if tokio::fs::try_exists(&old_path).await.unwrap_or(false) {
            tokio::fs::rename(old_path, self.entity_dir(new)).await
        } else {
            self.ensure_dir(new).await
        }
    }

    pub async fn delete_dir(&self, entity: &str) -> std::io::Result<()> {
        let path = self.entity_dir(entity);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// A staged multipart file part: sanitized name, raw bytes, and the
/// fingerprint of the part headers used for trace correlation.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub field: String,
    pub filename: String,
    pub content: Vec<u8>,
    pub fingerprint: String,
}

impl StagedFile {
    pub fn new(field: &str, raw_filename: &str, content_type: &str, content: Vec<u8>) -> Self {
        let filename = sanitize_filename(raw_filename);
        let fingerprint = part_fingerprint(field, &filename, content_type, content.len());
        StagedFile {
            field: field.to_string(),
            filename,
            content,
            fingerprint,
        }
    }
}

/// Content-hash fingerprint over the part descriptor
/// `{name, filename, content_type, len}`.
pub fn part_fingerprint(name: &str, filename: &str, content_type: &str, len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0]);
    hasher.update(filename.as_bytes());
    hasher.update([0]);
    hasher.update(content_type.as_bytes());
    hasher.update([0]);
    hasher.update(len.to_le_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
