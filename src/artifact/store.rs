//! Artifact store abstraction and its filesystem backend

use crate::artifact::validate_entry_id;
use crate::error::{LeafError, LeafResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Storage of named byte blobs, one namespace per job
///
/// The store carries no business semantics: it is used by the cache service
/// and by eviction only.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Atomically replace a named blob
    ///
    /// Readers observe either the previous or the new content, never a
    /// partial write.
    async fn put(&self, entry_id: &str, name: &str, data: &[u8]) -> LeafResult<()>;

    /// Read a blob into memory
    async fn get(&self, entry_id: &str, name: &str) -> LeafResult<Vec<u8>>;

    /// Open a blob for streaming reads
    async fn get_stream(&self, entry_id: &str, name: &str) -> LeafResult<fs::File>;

    /// Check whether a blob exists
    async fn exists(&self, entry_id: &str, name: &str) -> LeafResult<bool>;

    /// Delete one blob, or the whole job namespace when `name` is `None`
    async fn delete(&self, entry_id: &str, name: Option<&str>) -> LeafResult<()>;

    /// Sum of the byte length of every file in the job namespace
    async fn compute_size(&self, entry_id: &str) -> LeafResult<u64>;

    /// Remove every namespace
    async fn clear(&self) -> LeafResult<()>;

    /// Local path of a blob (it need not exist)
    fn path_of(&self, entry_id: &str, name: &str) -> LeafResult<PathBuf>;
}

/// Filesystem-backed artifact store
///
/// Layout: `{root}/{entry_id}/{name}`.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub async fn new(root: impl AsRef<Path>) -> LeafResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| LeafError::io(format!("creating store root {}", root.display()), e))?;
        Ok(Self { root })
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, entry_id: &str) -> LeafResult<PathBuf> {
        validate_entry_id(entry_id)?;
        Ok(self.root.join(entry_id))
    }

    fn artifact_path(&self, entry_id: &str, name: &str) -> LeafResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(LeafError::Internal(format!("invalid artifact name: {name:?}")));
        }
        Ok(self.entry_dir(entry_id)?.join(name))
    }
}

fn not_found(entry_id: &str, name: &str) -> LeafError {
    LeafError::ArtifactNotFound(format!("{entry_id}/{name}"))
}

#[async_trait]
impl ArtifactStore for FilesystemStore {
    #[instrument(skip(self, data), fields(len = data.len()))]
    async fn put(&self, entry_id: &str, name: &str, data: &[u8]) -> LeafResult<()> {
        let path = self.artifact_path(entry_id, name)?;
        let dir = self.entry_dir(entry_id)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| LeafError::io(format!("creating {}", dir.display()), e))?;

        // Temp files are dot-prefixed so they never collide with artifact names
        let tmp = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4()));
        let write = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&tmp, &path).await
        };

        if let Err(e) = write.await {
            let _ = fs::remove_file(&tmp).await;
            return Err(LeafError::io(format!("writing {}", path.display()), e));
        }

        Ok(())
    }

    async fn get(&self, entry_id: &str, name: &str) -> LeafResult<Vec<u8>> {
        let path = self.artifact_path(entry_id, name)?;
        fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => not_found(entry_id, name),
            _ => LeafError::io(format!("reading {}", path.display()), e),
        })
    }

    async fn get_stream(&self, entry_id: &str, name: &str) -> LeafResult<fs::File> {
        let path = self.artifact_path(entry_id, name)?;
        fs::File::open(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => not_found(entry_id, name),
            _ => LeafError::io(format!("opening {}", path.display()), e),
        })
    }

    async fn exists(&self, entry_id: &str, name: &str) -> LeafResult<bool> {
        let path = self.artifact_path(entry_id, name)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| LeafError::io(format!("checking {}", path.display()), e))
    }

    #[instrument(skip(self))]
    async fn delete(&self, entry_id: &str, name: Option<&str>) -> LeafResult<()> {
        let result = match name {
            Some(name) => fs::remove_file(self.artifact_path(entry_id, name)?).await,
            None => fs::remove_dir_all(self.entry_dir(entry_id)?).await,
        };

        match result {
            Ok(()) => {
                debug!("Deleted {}/{}", entry_id, name.unwrap_or("*"));
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LeafError::io(format!("deleting artifacts of {entry_id}"), e)),
        }
    }

    async fn compute_size(&self, entry_id: &str) -> LeafResult<u64> {
        let dir = self.entry_dir(entry_id)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(LeafError::io(format!("reading {}", dir.display()), e)),
        };

        let mut total = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LeafError::io(format!("reading entry in {}", dir.display()), e))?
        {
            // A file may vanish between listing and stat (concurrent delete)
            match entry.metadata().await {
                Ok(meta) if meta.is_file() => total += meta.len(),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(LeafError::io("reading artifact metadata", e)),
            }
        }

        Ok(total)
    }

    async fn clear(&self) -> LeafResult<()> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| LeafError::io("reading store root", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LeafError::io("reading store entry", e))?
        {
            let path = entry.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match result {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(LeafError::io(format!("removing {}", path.display()), e));
                }
            }
        }

        debug!("Cleared artifact store at {}", self.root.display());
        Ok(())
    }

    fn path_of(&self, entry_id: &str, name: &str) -> LeafResult<PathBuf> {
        self.artifact_path(entry_id, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn test_store() -> (FilesystemStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp.path().join("artifacts"))
            .await
            .unwrap();
        (store, temp)
    }

    #[tokio::test]
    async fn put_then_get() {
        let (store, _temp) = test_store().await;

        store.put("J1", "J1_defoliation.json", b"{}").await.unwrap();

        assert_eq!(store.get("J1", "J1_defoliation.json").await.unwrap(), b"{}");
        assert!(store.exists("J1", "J1_defoliation.json").await.unwrap());
    }

    #[tokio::test]
    async fn put_replaces_and_leaves_no_temp_files() {
        let (store, _temp) = test_store().await;

        store.put("J1", "a.json", b"first").await.unwrap();
        store.put("J1", "a.json", b"second, longer").await.unwrap();

        assert_eq!(store.get("J1", "a.json").await.unwrap(), b"second, longer");

        let names: Vec<_> = std::fs::read_dir(store.root().join("J1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["a.json".to_string()]);
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let (store, _temp) = test_store().await;

        assert!(matches!(
            store.get("J1", "nothing.json").await,
            Err(LeafError::ArtifactNotFound(_))
        ));
        assert!(matches!(
            store.get_stream("J1", "nothing.json").await,
            Err(LeafError::ArtifactNotFound(_))
        ));
        assert!(!store.exists("J1", "nothing.json").await.unwrap());
    }

    #[tokio::test]
    async fn stream_reads_content() {
        let (store, _temp) = test_store().await;
        store.put("J1", "J1_video.mp4", &[7u8; 1024]).await.unwrap();

        let mut file = store.get_stream("J1", "J1_video.mp4").await.unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();

        assert_eq!(buf.len(), 1024);
    }

    #[tokio::test]
    async fn compute_size_sums_namespace() {
        let (store, _temp) = test_store().await;

        assert_eq!(store.compute_size("J1").await.unwrap(), 0);

        store.put("J1", "a", &[0u8; 10]).await.unwrap();
        store.put("J1", "b", &[0u8; 32]).await.unwrap();
        store.put("J2", "a", &[0u8; 100]).await.unwrap();

        assert_eq!(store.compute_size("J1").await.unwrap(), 42);
        assert_eq!(store.compute_size("J2").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn delete_single_and_namespace() {
        let (store, _temp) = test_store().await;
        store.put("J1", "a", b"1").await.unwrap();
        store.put("J1", "b", b"2").await.unwrap();

        store.delete("J1", Some("a")).await.unwrap();
        assert!(!store.exists("J1", "a").await.unwrap());
        assert!(store.exists("J1", "b").await.unwrap());

        store.delete("J1", None).await.unwrap();
        assert_eq!(store.compute_size("J1").await.unwrap(), 0);

        // Deleting again is not an error
        store.delete("J1", None).await.unwrap();
        store.delete("J1", Some("a")).await.unwrap();
    }

    #[tokio::test]
    async fn clear_empties_store() {
        let (store, _temp) = test_store().await;
        store.put("J1", "a", b"1").await.unwrap();
        store.put("J2", "a", b"2").await.unwrap();

        store.clear().await.unwrap();

        assert!(!store.exists("J1", "a").await.unwrap());
        assert!(!store.exists("J2", "a").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let (store, _temp) = test_store().await;
        assert!(store.put("..", "a", b"x").await.is_err());
        assert!(store.put("J1", "../escape", b"x").await.is_err());
        assert!(store.path_of("J1", ".hidden").is_err());
    }
}
