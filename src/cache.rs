//! Derivative cache.
//!
//! Encoding is the expensive part of serving a derivative, and identical
//! requests are common (every visitor of a page asks for the same srcset).
//! This module stores finished derivative bytes under the request's
//! [`cache_key`](crate::request::TransformRequest::cache_key) so repeated
//! requests skip decoding, resizing and encoding entirely.
//!
//! # Design
//!
//! The cache is an accelerator only. Its absence, eviction or failure must
//! never change what the pipeline returns, only how long it takes. For that
//! reason every operation returns a [`CacheError`] that the pipeline logs and
//! otherwise ignores.
//!
//! Values are whole byte blobs with a time-to-live ([`DEFAULT_TTL`] is 24
//! hours). Entries are never invalidated explicitly: a key fully describes
//! its output, so an entry can only become stale by expiring. Expired entries
//! are dropped when read, and swept in bulk every [`SWEEP_INTERVAL`] writes
//! (and when a [`DiskCache`] is opened), so keys that are never requested
//! again do not accumulate.
//!
//! ## Implementations
//!
//! - [`MemoryCache`]: a mutex-guarded map, for tests and single-process use.
//! - [`DiskCache`]: one file per key in a directory, named by the SHA-256 of
//!   the key so names have a fixed length whatever the request. Each file
//!   starts with a small versioned header holding the expiry time, so no
//!   shared manifest or lock is needed and writes are atomic (write to a temp
//!   file, rename).
//! - [`NoCache`]: always misses (`--no-cache`).
//!
//! ## Bypassing the cache
//!
//! Pass `--no-cache` to any command, or set `cache.enabled = false`.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

/// Time-to-live applied to every derivative.
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

/// Magic prefix of a disk cache entry. Bump the trailing version byte to
/// invalidate all existing entries when the layout changes.
const ENTRY_MAGIC: &[u8; 6] = b"FOLIO\x01";

/// Header length: magic + expiry as little-endian unix milliseconds.
const HEADER_LEN: usize = ENTRY_MAGIC.len() + 8;

/// Writes between two sweeps of expired entries.
pub const SWEEP_INTERVAL: u64 = 64;

/// Length of a disk entry name: hex SHA-256 of the key.
const ENTRY_NAME_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("cache state poisoned by a panicking writer")]
    Poisoned,
}

/// Byte store keyed by derivative cache keys, with per-entry expiry.
pub trait DerivativeCache: Send + Sync {
    /// Bytes stored under `key`, or `None` when absent or expired.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `bytes` under `key` for `ttl`, replacing any previous value.
    fn put(&self, key: &str, bytes: &[u8], ttl: Duration) -> Result<(), CacheError>;
}

impl<T: DerivativeCache + ?Sized> DerivativeCache for Box<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, bytes: &[u8], ttl: Duration) -> Result<(), CacheError> {
        (**self).put(key, bytes, ttl)
    }
}

impl<T: DerivativeCache + ?Sized> DerivativeCache for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, bytes: &[u8], ttl: Duration) -> Result<(), CacheError> {
        (**self).put(key, bytes, ttl)
    }
}

/// A cache that never holds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl DerivativeCache for NoCache {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(None)
    }

    fn put(&self, _key: &str, _bytes: &[u8], _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }
}

struct MemoryEntry {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// In-process cache. Expired entries are dropped when read and swept every
/// [`SWEEP_INTERVAL`] writes.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    writes: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(purge_map(&mut entries))
    }
}

fn purge_map(entries: &mut HashMap<String, MemoryEntry>) -> usize {
    let before = entries.len();
    let now = Instant::now();
    entries.retain(|_, entry| now < entry.expires_at);
    before - entries.len()
}

impl DerivativeCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        match entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => Ok(Some(entry.bytes.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, bytes: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                bytes: bytes.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        if sweep_due(&self.writes) {
            let purged = purge_map(&mut entries);
            debug!(purged, "swept expired memory cache entries");
        }
        Ok(())
    }
}

/// Count one write; true on every [`SWEEP_INTERVAL`]th.
fn sweep_due(writes: &AtomicU64) -> bool {
    (writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0
}

/// Cache directory with one file per key.
pub struct DiskCache {
    dir: PathBuf,
    tmp_counter: AtomicU64,
    writes: AtomicU64,
}

impl DiskCache {
    /// Open (creating if needed) a cache rooted at `dir`, removing entries
    /// that expired while it was closed.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let cache = Self {
            dir,
            tmp_counter: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        };
        let purged = cache.purge_expired()?;
        debug!(dir = %cache.dir.display(), purged, "opened disk cache");
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File an entry for `key` is stored in.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{:x}", Sha256::digest(key.as_bytes())))
    }

    /// Remove every expired or unreadable entry file. Returns how many were
    /// removed. Files that are not cache entries are left alone.
    pub fn purge_expired(&self) -> io::Result<usize> {
        let now = unix_millis(SystemTime::now());
        let mut purged = 0;
        for dir_entry in std::fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            let is_entry = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_entry_name);
            if !is_entry {
                continue;
            }
            let live = matches!(read_expiry(&path), Ok(Some(expires_at)) if now < expires_at);
            if !live && remove_entry(&path)? {
                purged += 1;
            }
        }
        Ok(purged)
    }
}

fn is_entry_name(name: &str) -> bool {
    name.len() == ENTRY_NAME_LEN && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Expiry from an entry's header, `None` for a foreign layout.
fn read_expiry(path: &Path) -> io::Result<Option<u64>> {
    let mut header = [0u8; HEADER_LEN];
    match File::open(path)?.read_exact(&mut header) {
        Ok(()) => Ok(parse_entry(&header).map(|(expires_at, _)| expires_at)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove an entry file; another sweeper or reader may have got there first.
fn remove_entry(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Split a stored entry into its expiry and payload.
///
/// Returns `None` for files written by another layout version.
fn parse_entry(data: &[u8]) -> Option<(u64, &[u8])> {
    if data.len() < HEADER_LEN || !data.starts_with(ENTRY_MAGIC) {
        return None;
    }
    let (header, payload) = data.split_at(HEADER_LEN);
    let expiry: [u8; 8] = header[ENTRY_MAGIC.len()..].try_into().ok()?;
    Some((u64::from_le_bytes(expiry), payload))
}

impl DerivativeCache for DiskCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.entry_path(key);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match parse_entry(&data) {
            Some((expires_at, payload)) if unix_millis(SystemTime::now()) < expires_at => {
                Ok(Some(payload.to_vec()))
            }
            _ => {
                // Expired or foreign layout; a concurrent put may already have
                // replaced it, which only costs that writer its entry.
                let _ = std::fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    fn put(&self, key: &str, bytes: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        let expires_at = unix_millis(SystemTime::now() + ttl);

        let mut data = Vec::with_capacity(HEADER_LEN + bytes.len());
        data.extend_from_slice(ENTRY_MAGIC);
        data.extend_from_slice(&expires_at.to_le_bytes());
        data.extend_from_slice(bytes);

        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let tmp = self
            .dir
            .join(format!(".{name}.{}.{n}.tmp", std::process::id()));
        std::fs::write(&tmp, &data)?;
        std::fs::rename(&tmp, &path).inspect_err(|_| {
            let _ = std::fs::remove_file(&tmp);
        })?;

        if sweep_due(&self.writes) {
            match self.purge_expired() {
                Ok(purged) => debug!(purged, "swept expired disk cache entries"),
                Err(e) => warn!(dir = %self.dir.display(), error = %e, "cache sweep failed"),
            }
        }
        Ok(())
    }
}

/// Summary of cache performance for a batch of renders.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn miss(&mut self) {
        self.misses += 1;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }

    pub fn merge(self, other: CacheStats) -> CacheStats {
        CacheStats {
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} encoded ({} total)",
                self.hits,
                self.misses,
                self.total()
            )
        } else {
            write!(f, "{} encoded", self.misses)
        }
    }
}
