//! Blob store for reference rasters.
//!
//! Reference images are written once by [`convert`](crate::pipeline::Pipeline::convert)
//! and read by every cache-missing render. The store only moves bytes: it
//! knows nothing about image formats and does not interpret ids beyond using
//! them as names.

use crate::request::ImageId;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Extension of reference rasters on disk. They are always PNG.
const BLOB_EXTENSION: &str = "png";

/// Durable storage for reference image bytes, addressed by [`ImageId`].
pub trait BlobStore: Send + Sync {
    fn save(&self, id: &ImageId, bytes: &[u8]) -> io::Result<()>;

    /// The stored bytes, or `None` when no blob has that id.
    fn load(&self, id: &ImageId) -> io::Result<Option<Vec<u8>>>;

    fn exists(&self, id: &ImageId) -> io::Result<bool> {
        Ok(self.load(id)?.is_some())
    }
}

impl<T: BlobStore + ?Sized> BlobStore for Box<T> {
    fn save(&self, id: &ImageId, bytes: &[u8]) -> io::Result<()> {
        (**self).save(id, bytes)
    }

    fn load(&self, id: &ImageId) -> io::Result<Option<Vec<u8>>> {
        (**self).load(id)
    }

    fn exists(&self, id: &ImageId) -> io::Result<bool> {
        (**self).exists(id)
    }
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn save(&self, id: &ImageId, bytes: &[u8]) -> io::Result<()> {
        (**self).save(id, bytes)
    }

    fn load(&self, id: &ImageId) -> io::Result<Option<Vec<u8>>> {
        (**self).load(id)
    }

    fn exists(&self, id: &ImageId) -> io::Result<bool> {
        (**self).exists(id)
    }
}

/// Directory of `<id>.png` files.
pub struct FsBlobStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FsBlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a blob with this id is stored at.
    pub fn blob_path(&self, id: &ImageId) -> PathBuf {
        self.root.join(format!("{}.{}", id, BLOB_EXTENSION))
    }
}

impl BlobStore for FsBlobStore {
    fn save(&self, id: &ImageId, bytes: &[u8]) -> io::Result<()> {
        let path = self.blob_path(id);
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .root
            .join(format!(".{}.{}.{n}.tmp", id, std::process::id()));
        std::fs::write(&tmp, bytes).inspect_err(|_| {
            let _ = std::fs::remove_file(&tmp);
        })?;
        std::fs::rename(&tmp, &path).inspect_err(|_| {
            let _ = std::fs::remove_file(&tmp);
        })
    }

    fn load(&self, id: &ImageId) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.blob_path(id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn exists(&self, id: &ImageId) -> io::Result<bool> {
        self.blob_path(id).try_exists()
    }
}

/// In-memory store, for tests and embedding.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<ImageId, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> io::Error {
    io::Error::other("blob store lock poisoned")
}

impl BlobStore for MemoryBlobStore {
    fn save(&self, id: &ImageId, bytes: &[u8]) -> io::Result<()> {
        self.blobs
            .lock()
            .map_err(|_| poisoned())?
            .insert(id.clone(), bytes.to_vec());
        Ok(())
    }

    fn load(&self, id: &ImageId) -> io::Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().map_err(|_| poisoned())?.get(id).cloned())
    }
}
