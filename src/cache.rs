//! Stream URL cache
//!
//! Resolving a track to a playable URL is slow and rate limited upstream,
//! so resolved URLs are kept for a fixed time (six hours by default).
//! Concurrent lookups for the same track share one upstream call.
//! Failures are never cached.

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::utils::{SystemClock, WallClock};

/// Default lifetime of a resolved stream URL
pub const DEFAULT_STREAM_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Cache file name inside the app cache directory
const STREAM_CACHE_FILE: &str = "stream_cache.json";

// ============ Entries and stores ============

/// Cached stream URL with its expiry (epoch milliseconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCacheEntry {
    pub url: String,
    pub expires: i64,
}

impl StreamCacheEntry {
    /// Fresh strictly before `expires`
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms < self.expires
    }
}

/// Key/value storage for cache entries
pub trait CacheStore: Send + Sync {
    fn get(&self, track_id: &str) -> Option<StreamCacheEntry>;
    /// Insert or replace, evicting expired entries as of `now_ms`
    fn put(&self, track_id: &str, entry: StreamCacheEntry, now_ms: i64);
    fn clear(&self);
    fn len(&self) -> usize;
}

/// In-memory store with an optional entry bound
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StreamCacheEntry>>,
    max_entries: Option<usize>,
}

impl MemoryStore {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
        }
    }

    fn with_entries(entries: HashMap<String, StreamCacheEntry>, max_entries: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(entries),
            max_entries,
        }
    }

    fn snapshot(&self) -> HashMap<String, StreamCacheEntry> {
        self.entries.lock().clone()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, track_id: &str) -> Option<StreamCacheEntry> {
        self.entries.lock().get(track_id).cloned()
    }

    fn put(&self, track_id: &str, entry: StreamCacheEntry, now_ms: i64) {
        let mut entries = self.entries.lock();
        entries.insert(track_id.to_string(), entry);
        evict(&mut entries, now_ms, self.max_entries);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Drop expired entries, then the soonest-expiring ones above `max_entries`
///
/// Returns the number of entries removed.
fn evict(
    entries: &mut HashMap<String, StreamCacheEntry>,
    now_ms: i64,
    max_entries: Option<usize>,
) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.is_fresh(now_ms));

    if let Some(max) = max_entries.filter(|max| entries.len() > *max) {
        let mut by_expiry: Vec<(String, i64)> = entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.expires))
            .collect();
        by_expiry.sort_by_key(|(_, expires)| *expires);
        let excess = entries.len() - max;
        for (id, _) in by_expiry.into_iter().take(excess) {
            entries.remove(&id);
        }
    }

    before - entries.len()
}

/// Store persisted as a JSON object keyed by track id
///
/// Writes are best effort: a failed write keeps the in-memory entry and
/// logs a warning.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    memory: MemoryStore,
}

impl JsonFileStore {
    /// Default cache file path
    pub fn default_path() -> Option<PathBuf> {
        crate::utils::cache_dir().map(|dir| dir.join(STREAM_CACHE_FILE))
    }

    /// Open the store at `path`, dropping entries expired as of `now_ms`
    ///
    /// A missing file gives an empty store. An unreadable one is
    /// reported so the caller can decide whether to start empty.
    pub fn open(path: &Path, max_entries: Option<usize>, now_ms: i64) -> Result<Self, CacheError> {
        let mut entries = match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str::<HashMap<String, StreamCacheEntry>>(&content)
                .map_err(|e| CacheError::Parse(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(CacheError::Io(e.to_string())),
        };
        let evicted = evict(&mut entries, now_ms, max_entries);
        if evicted > 0 {
            debug!("Dropped {} stale stream cache entries from {:?}", evicted, path);
        }

        Ok(Self {
            path: path.to_path_buf(),
            memory: MemoryStore::with_entries(entries, max_entries),
        })
    }

    /// Open the store, starting empty if the file is corrupt
    pub fn open_or_empty(path: &Path, max_entries: Option<usize>, now_ms: i64) -> Self {
        Self::open(path, max_entries, now_ms).unwrap_or_else(|e| {
            warn!("Ignoring stream cache at {:?}: {}", path, e);
            Self {
                path: path.to_path_buf(),
                memory: MemoryStore::new(max_entries),
            }
        })
    }

    fn persist(&self) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::Io(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(&self.memory.snapshot())
            .map_err(|e| CacheError::Parse(e.to_string()))?;
        fs::write(&self.path, content).map_err(|e| CacheError::Io(e.to_string()))
    }
}

impl CacheStore for JsonFileStore {
    fn get(&self, track_id: &str) -> Option<StreamCacheEntry> {
        self.memory.get(track_id)
    }

    fn put(&self, track_id: &str, entry: StreamCacheEntry, now_ms: i64) {
        self.memory.put(track_id, entry, now_ms);
        if let Err(e) = self.persist() {
            warn!("Failed to save stream cache to {:?}: {}", self.path, e);
        }
    }

    fn clear(&self) {
        self.memory.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Stream cache cleared: {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete stream cache {:?}: {}", self.path, e),
        }
    }

    fn len(&self) -> usize {
        self.memory.len()
    }
}

// ============ Resolution ============

/// Upstream that turns a track id into a playable URL
pub trait StreamResolver: Send + Sync {
    fn resolve_stream(
        &self,
        track_id: &str,
    ) -> impl Future<Output = Result<String, ResolutionError>> + Send;
}

/// Stream URL could not be resolved
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionError {
    /// Transport failure or timeout
    Request(String),
    /// Upstream answered but reported failure
    Rejected(String),
    /// Upstream answered with something that is not an http(s) URL
    InvalidUrl(String),
}

impl std::fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionError::Request(e) => write!(f, "Stream request failed: {}", e),
            ResolutionError::Rejected(e) => write!(f, "Stream resolution rejected: {}", e),
            ResolutionError::InvalidUrl(url) => write!(f, "Invalid stream URL: {:?}", url),
        }
    }
}

impl std::error::Error for ResolutionError {}

/// Time-bounded cache in front of a `StreamResolver`
pub struct StreamCache<R> {
    resolver: Arc<R>,
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn WallClock>,
    ttl: Duration,
    /// Per-track gates collapsing concurrent misses
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<R: StreamResolver> StreamCache<R> {
    pub fn new(resolver: Arc<R>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            resolver,
            store,
            clock: Arc::new(SystemClock),
            ttl: DEFAULT_STREAM_TTL,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Fresh cached URL for `track_id`, if any
    pub fn lookup(&self, track_id: &str) -> Option<String> {
        let now = self.clock.now_millis();
        self.store
            .get(track_id)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.url)
    }

    /// Resolve `track_id`, calling upstream only on a miss or expiry
    pub async fn resolve(&self, track_id: &str) -> Result<String, ResolutionError> {
        if let Some(url) = self.lookup(track_id) {
            debug!("Stream cache hit for {}", track_id);
            return Ok(url);
        }

        let gate = self.gate(track_id);
        let guard = gate.lock().await;

        // Someone else may have filled it while we waited
        if let Some(url) = self.lookup(track_id) {
            debug!("Stream cache filled by concurrent lookup for {}", track_id);
            drop(guard);
            self.release_gate(track_id, &gate);
            return Ok(url);
        }

        debug!("Stream cache miss for {}, resolving upstream", track_id);
        let result = self.resolver.resolve_stream(track_id).await;
        match &result {
            Ok(url) => {
                let now = self.clock.now_millis();
                let entry = StreamCacheEntry {
                    url: url.clone(),
                    expires: now.saturating_add(self.ttl.as_millis() as i64),
                };
                // Persistent stores write to disk on put
                let store = self.store.clone();
                let key = track_id.to_string();
                if let Err(e) = tokio::task::spawn_blocking(move || store.put(&key, entry, now)).await {
                    warn!("Failed to cache stream URL for {}: {}", track_id, e);
                }
            }
            Err(e) => warn!("Stream resolution failed for {}: {}", track_id, e),
        }

        drop(guard);
        self.release_gate(track_id, &gate);
        result
    }

    /// Drop every cached URL
    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    fn gate(&self, track_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inflight
            .lock()
            .entry(track_id.to_string())
            .or_default()
            .clone()
    }

    /// Forget the gate once nobody else holds it
    fn release_gate(&self, track_id: &str, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self.inflight.lock();
        let unused = inflight
            .get(track_id)
            .is_some_and(|current| Arc::ptr_eq(current, gate) && Arc::strong_count(gate) <= 2);
        if unused {
            inflight.remove(track_id);
        }
    }
}

/// Cache operation errors
#[derive(Debug, Clone)]
pub enum CacheError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Io(e) => write!(f, "Cache IO error: {}", e),
            CacheError::Parse(e) => write!(f, "Cache parse error: {}", e),
        }
    }
}

impl std::error::Error for CacheError {}
