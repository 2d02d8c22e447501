//! Per-peer blob store.
//!
//! Each peer keeps its blobs in a directory named by its ring id (decimal)
//! under the data root; every blob is a regular file named by the stored
//! file name. The name→key map is the authority for what the peer owns;
//! the invariant is that every map entry has a backing blob and
//! `key == hash(name)`.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::ring;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid file name: {0}")]
    InvalidName(String),
    #[error("file does not exist: {0}")]
    Missing(String),
}

/// Blob partition of one peer.
pub struct BlobStore {
    dir: PathBuf,
    files: Mutex<BTreeMap<String, u32>>,
}

/// A blob being received. Dropping it without [`BlobStore::commit`] discards
/// the bytes, so a failed transfer never registers partial state.
pub struct PendingBlob {
    name: String,
    temp: NamedTempFile,
}

impl PendingBlob {
    pub fn file(&mut self) -> &mut File {
        self.temp.as_file_mut()
    }
}

impl BlobStore {
    /// Opens (creating if needed) the blob directory for `peer_id` and
    /// rebuilds the name→key map from any blobs already on disk.
    pub fn open(root: &Path, peer_id: u32) -> Result<Self, StoreError> {
        let dir = root.join(peer_id.to_string());
        fs::create_dir_all(&dir)?;

        let mut files = BTreeMap::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            // Temp files from an interrupted receive are not blobs.
            if name.starts_with(".tmp") {
                continue;
            }
            files.insert(name.clone(), ring::hash(&name));
        }

        Ok(Self {
            dir,
            files: Mutex::new(files),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Starts receiving a blob into a temp file in the same directory.
    pub fn begin(&self, name: &str) -> Result<PendingBlob, StoreError> {
        validate_name(name)?;
        let temp = NamedTempFile::new_in(&self.dir)?;
        Ok(PendingBlob {
            name: name.to_string(),
            temp,
        })
    }

    /// Moves a fully received blob into place and registers it. A repeated
    /// store of the same name replaces the previous blob; the map keeps a
    /// single entry.
    pub fn commit(&self, mut pending: PendingBlob) -> Result<(), StoreError> {
        pending.temp.as_file_mut().flush()?;
        let path = self.dir.join(&pending.name);
        pending
            .temp
            .persist(path)
            .map_err(|e| StoreError::Io(e.error))?;
        self.files
            .lock()
            .expect("blob map lock poisoned")
            .insert(pending.name.clone(), ring::hash(&pending.name));
        Ok(())
    }

    /// Opens a stored blob for reading, returning its size.
    pub fn open_blob(&self, name: &str) -> Result<(File, u64), StoreError> {
        validate_name(name)?;
        if !self.contains(name) {
            return Err(StoreError::Missing(name.to_string()));
        }
        let file = File::open(self.dir.join(name))
            .map_err(|_| StoreError::Missing(name.to_string()))?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files
            .lock()
            .expect("blob map lock poisoned")
            .contains_key(name)
    }

    /// Snapshot of all `(name, key)` entries.
    pub fn entries(&self) -> Vec<(String, u32)> {
        self.files
            .lock()
            .expect("blob map lock poisoned")
            .iter()
            .map(|(name, key)| (name.clone(), *key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.lock().expect("blob map lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes a blob and its map entry (after it was handed off).
    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        match fs::remove_file(self.dir.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.files
            .lock()
            .expect("blob map lock poisoned")
            .remove(name);
        Ok(())
    }

    /// Deletes the whole partition. Used when the peer leaves the ring.
    pub fn purge(&self) -> Result<(), StoreError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.files.lock().expect("blob map lock poisoned").clear();
        Ok(())
    }
}

/// Blob names become file names inside the partition directory, so anything
/// that could escape it is refused.
fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn store_with(root: &Path, id: u32) -> BlobStore {
        BlobStore::open(root, id).expect("open store")
    }

    fn put(store: &BlobStore, name: &str, bytes: &[u8]) {
        let mut pending = store.begin(name).expect("begin");
        pending.file().write_all(bytes).expect("write blob");
        store.commit(pending).expect("commit");
    }

    fn read_all(store: &BlobStore, name: &str) -> Vec<u8> {
        let (mut file, size) = store.open_blob(name).expect("open blob");
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).expect("read blob");
        assert_eq!(buf.len() as u64, size);
        buf
    }

    #[test]
    fn store_and_read_back() {
        let root = tempfile::tempdir().expect("tempdir");
        let store = store_with(root.path(), 10);
        put(&store, "hi", b"hello world");

        assert_eq!(read_all(&store, "hi"), b"hello world");
        assert_eq!(store.entries(), vec![("hi".to_string(), ring::hash("hi"))]);
    }

    #[test]
    fn overwrite_keeps_one_entry_and_latest_bytes() {
        let root = tempfile::tempdir().expect("tempdir");
        let store = store_with(root.path(), 10);
        put(&store, "hi", b"first");
        put(&store, "hi", b"second");

        assert_eq!(store.len(), 1);
        assert_eq!(read_all(&store, "hi"), b"second");
    }

    #[test]
    fn dropped_pending_blob_leaves_no_state() {
        let root = tempfile::tempdir().expect("tempdir");
        let store = store_with(root.path(), 10);
        {
            let mut pending = store.begin("hi").expect("begin");
            pending.file().write_all(b"partial").expect("write");
            // dropped without commit
        }
        assert!(!store.contains("hi"));
        assert!(store.open_blob("hi").is_err());
        let names: Vec<_> = fs::read_dir(store.dir())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert!(names.is_empty(), "leftover files: {names:?}");
    }

    #[test]
    fn rejects_escaping_names() {
        let root = tempfile::tempdir().expect("tempdir");
        let store = store_with(root.path(), 10);
        for name in ["", ".", "..", "a/b", "..\\evil"] {
            assert!(matches!(
                store.begin(name),
                Err(StoreError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn reopen_rebuilds_map_from_disk() {
        let root = tempfile::tempdir().expect("tempdir");
        {
            let store = store_with(root.path(), 10);
            put(&store, "hi", b"payload");
            put(&store, "other.txt", b"x");
        }
        let store = store_with(root.path(), 10);
        assert_eq!(store.len(), 2);
        assert_eq!(store.entries()[0].1, ring::hash(&store.entries()[0].0));
        assert_eq!(read_all(&store, "hi"), b"payload");
    }

    #[test]
    fn purge_removes_partition() {
        let root = tempfile::tempdir().expect("tempdir");
        let store = store_with(root.path(), 10);
        put(&store, "hi", b"payload");
        store.purge().expect("purge");
        assert!(store.is_empty());
        assert!(!store.dir().exists());
    }
}
