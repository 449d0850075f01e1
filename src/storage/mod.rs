//! File storage
//!
//! Files are addressed by storage names relative to a root directory, the
//! same way they are persisted in the database. A [`FileStore`] wraps the
//! local root and an optional remote root that mirrors uploads for
//! deployments where the local disk does not survive restarts.

pub mod archive;
pub mod fileinfo;

use std::io;
use std::path::{Component, Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::{Digest, Sha1};

use crate::config::StorageConfig;
use crate::text::get_valid_filename;

/// SHA-1 of a byte buffer, hex encoded (40 chars)
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Storage name of an upload: `file_dir/cs[..2]/cs[-2..]/cs/filename`
pub fn upload_path(file_dir: &str, filename: &str, checksum: &str) -> String {
    let head = &checksum[..checksum.len().min(2)];
    let tail = &checksum[checksum.len().saturating_sub(2)..];
    Path::new(file_dir)
        .join(head)
        .join(tail)
        .join(checksum)
        .join(filename)
        .to_string_lossy()
        .into_owned()
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(char::from)
        .collect()
}

/// A directory tree holding stored files
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `name` stays below the root (relative, no `..`)
    pub fn is_within_root(&self, name: &str) -> bool {
        let path = Path::new(name);
        !name.is_empty()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    }

    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        if !self.is_within_root(name) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Path '{}' is outside of the storage root", name),
            ));
        }
        Ok(self.root.join(name))
    }

    /// Absolute path of a storage name
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub async fn exists(&self, name: &str) -> bool {
        match self.resolve(name) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn size(&self, name: &str) -> io::Result<u64> {
        Ok(tokio::fs::metadata(self.resolve(name)?).await?.len())
    }

    /// Write `bytes` under `name`, or under `name` with a random suffix when
    /// taken. Returns the name actually used.
    pub async fn save(&self, name: &str, bytes: &[u8]) -> io::Result<String> {
        let name = self.available_name(name).await?;
        let path = self.resolve(&name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(name)
    }

    /// Write `bytes` under exactly `name`, replacing any existing file
    pub async fn write(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await
    }

    pub async fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.resolve(name)?).await
    }

    /// Remove a file; missing files are not an error
    pub async fn delete(&self, name: &str) -> io::Result<()> {
        match tokio::fs::remove_file(self.resolve(name)?).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    async fn available_name(&self, name: &str) -> io::Result<String> {
        self.resolve(name)?;
        if !self.exists(name).await {
            return Ok(name.to_string());
        }
        let path = Path::new(name);
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        loop {
            let candidate = dir
                .join(format!("{}_{}{}", stem, random_suffix(), ext))
                .to_string_lossy()
                .into_owned();
            if !self.exists(&candidate).await {
                return Ok(candidate);
            }
        }
    }
}

/// Result of storing an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    /// Storage name of the local copy
    pub stored_path: String,
    pub checksum: String,
    pub size: u64,
}

/// Local storage plus an optional remote mirror
#[derive(Debug, Clone)]
pub struct FileStore {
    pub local: LocalStorage,
    pub remote: Option<LocalStorage>,
    file_dir: String,
}

impl FileStore {
    pub fn new(local: LocalStorage, remote: Option<LocalStorage>, file_dir: impl Into<String>) -> Self {
        Self {
            local,
            remote,
            file_dir: file_dir.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            LocalStorage::new(config.media_root()),
            config.remote_root.as_ref().map(LocalStorage::new),
            config.file_dir.clone(),
        )
    }

    pub fn file_dir(&self) -> &str {
        &self.file_dir
    }

    /// Store an uploaded file below its checksum directory.
    ///
    /// An existing copy with the same size is reused; the remote mirror is
    /// brought up to date the same way.
    pub async fn ingest(&self, filename: &str, bytes: &[u8]) -> io::Result<StoredUpload> {
        let filename = get_valid_filename(filename).unwrap_or_else(|_| "upload".to_string());
        let checksum = checksum(bytes);
        let path = upload_path(&self.file_dir, &filename, &checksum);
        let size = bytes.len() as u64;

        let stored_path = if !self.local.exists(&path).await || self.local.size(&path).await? != size {
            self.local.save(&path, bytes).await?
        } else {
            path.clone()
        };

        if let Some(remote) = &self.remote {
            if !remote.exists(&path).await || remote.size(&path).await? != size {
                remote.write(&stored_path, bytes).await?;
            }
        }

        tracing::debug!("Stored upload {} ({} bytes) as {}", filename, size, stored_path);
        Ok(StoredUpload {
            stored_path,
            checksum,
            size,
        })
    }

    /// Make sure a stored file exists locally, fetching it from the remote
    /// mirror when needed. Returns the absolute local path.
    pub async fn ensure_local(&self, name: &str) -> io::Result<PathBuf> {
        if self.local.exists(name).await {
            return Ok(self.local.path(name));
        }
        match &self.remote {
            Some(remote) if remote.exists(name).await => {
                tracing::info!("Fetching {} from remote storage", name);
                let bytes = remote.read(name).await?;
                self.local.write(name, &bytes).await?;
                Ok(self.local.path(name))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Stored file '{}' not found", name),
            )),
        }
    }

    /// Copy a local file to the remote mirror (job outputs)
    pub async fn mirror(&self, name: &str) -> io::Result<()> {
        if let Some(remote) = &self.remote {
            let bytes = self.local.read(name).await?;
            remote.write(name, &bytes).await?;
        }
        Ok(())
    }

    /// Delete a stored file from every root
    pub async fn delete(&self, name: &str) -> io::Result<()> {
        self.local.delete(name).await?;
        if let Some(remote) = &self.remote {
            remote.delete(name).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(checksum(b"").len(), 40);
    }

    #[test]
    fn test_upload_path() {
        let cs = "a9993e364706816aba3e25717850c26c9cd0d89d";
        assert_eq!(
            upload_path("scriptly_files", "data.csv", cs),
            format!("scriptly_files/a9/9d/{}/data.csv", cs)
        );
    }

    #[test]
    fn test_is_within_root() {
        let storage = LocalStorage::new("/srv/media");
        assert!(storage.is_within_root("scriptly_files/a/b.txt"));
        assert!(!storage.is_within_root("../etc/passwd"));
        assert!(!storage.is_within_root("a/../../b"));
        assert!(!storage.is_within_root("/etc/passwd"));
        assert!(!storage.is_within_root(""));
    }

    #[tokio::test]
    async fn test_save_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let first = storage.save("a/out.txt", b"one").await.unwrap();
        let second = storage.save("a/out.txt", b"two").await.unwrap();
        assert_eq!(first, "a/out.txt");
        assert_ne!(second, first);
        assert!(second.starts_with("a/out_") && second.ends_with(".txt"));
        assert_eq!(storage.read(&second).await.unwrap(), b"two");
        storage.delete(&second).await.unwrap();
        storage.delete(&second).await.unwrap();
        assert!(!storage.exists(&second).await);
    }

    #[tokio::test]
    async fn test_ingest_deduplicates_and_mirrors() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let store = FileStore::new(
            LocalStorage::new(local.path()),
            Some(LocalStorage::new(remote.path())),
            "scriptly_files",
        );
        let first = store.ingest("my data.csv", b"a,b\n1,2\n").await.unwrap();
        let second = store.ingest("my data.csv", b"a,b\n1,2\n").await.unwrap();
        assert_eq!(first, second);
        assert!(first.stored_path.ends_with("/my_data.csv"));
        assert_eq!(first.size, 8);
        assert!(remote.path().join(&first.stored_path).exists());
    }

    #[tokio::test]
    async fn test_ensure_local_downloads_from_remote() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let store = FileStore::new(
            LocalStorage::new(local.path()),
            Some(LocalStorage::new(remote.path())),
            "scriptly_files",
        );
        let stored = store.ingest("x.txt", b"hello").await.unwrap();
        tokio::fs::remove_file(local.path().join(&stored.stored_path)).await.unwrap();

        let path = store.ensure_local(&stored.stored_path).await.unwrap();
        assert_eq!(tokio::fs::read(path).await.unwrap(), b"hello");
        assert!(store.ensure_local("scriptly_files/missing.txt").await.is_err());
    }
}
