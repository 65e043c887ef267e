use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::errors::{SearchError, SearchResult};

/// Modification times within this many seconds are considered equal
pub const MTIME_TOLERANCE_SECS: f64 = 1.0;

/// What is known about a file's contents
#[derive(Debug, Clone)]
pub enum CachedContent {
    Text(Arc<Vec<String>>),
    /// Content sniffing found binary data; the file is never searched
    Binary,
}

impl CachedContent {
    pub fn lines(&self) -> Option<&Arc<Vec<String>>> {
        match self {
            CachedContent::Text(lines) => Some(lines),
            CachedContent::Binary => None,
        }
    }
}

/// Cached contents of a file, valid while the file keeps the recorded size and mtime
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub mtime: f64,
    pub size: u64,
    pub content: CachedContent,
}

impl CacheEntry {
    pub fn is_valid_for(&self, metadata: &Metadata) -> bool {
        self.size == metadata.len()
            && (self.mtime - mtime_secs(metadata)).abs() <= MTIME_TOLERANCE_SECS
    }
}

/// On-disk form of a [`CacheEntry`]
#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    content: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    binary: bool,
    mtime: f64,
    size: u64,
    /// RFC 3339 time the entry was written
    timestamp: String,
}

/// Shared cache of decoded file contents, keyed by absolute path.
///
/// Entries are checked against the file's current size and modification time on every
/// read; a stale entry is never returned.
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: DashMap<PathBuf, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ContentCache {
    /// Creates a new empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached content for `path` if the entry still matches `metadata`
    pub fn get(&self, path: &Path, metadata: &Metadata) -> Option<CachedContent> {
        let valid = self
            .entries
            .get(path)
            .filter(|entry| entry.is_valid_for(metadata))
            .map(|entry| entry.content.clone());

        match valid {
            Some(content) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(content)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, path: PathBuf, metadata: &Metadata, lines: Arc<Vec<String>>) {
        self.insert_content(path, metadata, CachedContent::Text(lines));
    }

    /// Remembers that `path` holds binary data until its size or mtime changes
    pub fn insert_binary(&self, path: PathBuf, metadata: &Metadata) {
        self.insert_content(path, metadata, CachedContent::Binary);
    }

    fn insert_content(&self, path: PathBuf, metadata: &Metadata, content: CachedContent) {
        self.entries.insert(
            path,
            CacheEntry {
                mtime: mtime_secs(metadata),
                size: metadata.len(),
                content,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Loads a cache from disk, keeping only entries that still match their files.
    /// A missing or unreadable cache file yields an empty cache.
    pub fn load_from(path: &Path) -> SearchResult<Self> {
        let cache = Self::new();
        if !path.exists() {
            return Ok(cache);
        }

        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                warn!("Could not read content cache {}: {}", path.display(), e);
                return Ok(cache);
            }
        };

        let persisted: BTreeMap<String, PersistedEntry> = match serde_json::from_slice(&data) {
            Ok(entries) => entries,
            Err(e) => {
                // Cache is corrupted, start over
                warn!("Discarding corrupted content cache {}: {}", path.display(), e);
                return Ok(cache);
            }
        };

        let total = persisted.len();
        for (file, entry) in persisted {
            let file = PathBuf::from(file);
            let content = if entry.binary {
                CachedContent::Binary
            } else {
                CachedContent::Text(Arc::new(entry.content))
            };
            let entry = CacheEntry {
                mtime: entry.mtime,
                size: entry.size,
                content,
            };
            match std::fs::metadata(&file) {
                Ok(metadata) if entry.is_valid_for(&metadata) => {
                    cache.entries.insert(file, entry);
                }
                _ => debug!("Dropping stale cache entry for {}", file.display()),
            }
        }

        info!(
            "Loaded {} of {} cached files from {}",
            cache.len(),
            total,
            path.display()
        );
        Ok(cache)
    }

    /// Saves the cache to disk
    pub fn save_to(&self, path: &Path) -> SearchResult<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(SearchError::IoError)?;
        }

        let timestamp = humantime::format_rfc3339_seconds(SystemTime::now()).to_string();
        let persisted: BTreeMap<String, PersistedEntry> = self
            .entries
            .iter()
            .map(|entry| {
                (
                    entry.key().to_string_lossy().into_owned(),
                    PersistedEntry {
                        content: entry
                            .content
                            .lines()
                            .map(|lines| lines.as_ref().clone())
                            .unwrap_or_default(),
                        binary: matches!(entry.content, CachedContent::Binary),
                        mtime: entry.mtime,
                        size: entry.size,
                        timestamp: timestamp.clone(),
                    },
                )
            })
            .collect();

        // Write to a temporary file first
        let tmp_path = path.with_extension("tmp");
        let data =
            serde_json::to_vec(&persisted).map_err(|e| SearchError::cache_error(e.to_string()))?;
        std::fs::write(&tmp_path, data).map_err(SearchError::IoError)?;

        // Atomically rename the temporary file
        std::fs::rename(&tmp_path, path).map_err(SearchError::IoError)?;

        debug!("Saved {} cached files to {}", persisted.len(), path.display());
        Ok(())
    }
}

/// Modification time as fractional seconds since the Unix epoch
pub fn mtime_secs(metadata: &Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::Duration;
    use tempfile::tempdir;

    fn lines(list: &[&str]) -> Arc<Vec<String>> {
        Arc::new(list.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_get_validates_signature() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        fs::write(&file, "import b\n").unwrap();

        let cache = ContentCache::new();
        let metadata = fs::metadata(&file).unwrap();
        cache.insert(file.clone(), &metadata, lines(&["import b"]));

        let cached = cache.get(&file, &metadata).unwrap();
        assert_eq!(cached.lines().unwrap()[0], "import b");
        assert_eq!(cache.hits(), 1);

        fs::write(&file, "import b, c\n").unwrap();
        let changed = fs::metadata(&file).unwrap();
        assert!(cache.get(&file, &changed).is_none());
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_mtime_tolerance() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        fs::write(&file, "x").unwrap();

        let cache = ContentCache::new();
        cache.insert(file.clone(), &fs::metadata(&file).unwrap(), lines(&["x"]));

        let handle = File::options().write(true).open(&file).unwrap();
        let original = fs::metadata(&file).unwrap().modified().unwrap();

        handle.set_modified(original + Duration::from_millis(500)).unwrap();
        assert!(cache.get(&file, &fs::metadata(&file).unwrap()).is_some());

        handle.set_modified(original + Duration::from_secs(5)).unwrap();
        assert!(cache.get(&file, &fs::metadata(&file).unwrap()).is_none());
    }

    #[test]
    fn test_save_and_load_round_trip_drops_stale_entries() {
        let dir = tempdir().unwrap();
        let kept = dir.path().join("kept.py");
        let changed = dir.path().join("changed.py");
        let removed = dir.path().join("removed.py");
        for f in [&kept, &changed, &removed] {
            fs::write(f, "content").unwrap();
        }

        let cache = ContentCache::new();
        for f in [&kept, &changed, &removed] {
            cache.insert(f.clone(), &fs::metadata(f).unwrap(), lines(&["content"]));
        }

        let cache_file = dir.path().join("state/cache.json");
        cache.save_to(&cache_file).unwrap();
        assert!(!cache_file.with_extension("tmp").exists());

        fs::write(&changed, "different length").unwrap();
        fs::remove_file(&removed).unwrap();

        let loaded = ContentCache::load_from(&cache_file).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get(&kept, &fs::metadata(&kept).unwrap()).is_some());
    }

    #[test]
    fn test_persisted_format() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.md");
        fs::write(&file, "# Title\nbody").unwrap();

        let cache = ContentCache::new();
        cache.insert(file.clone(), &fs::metadata(&file).unwrap(), lines(&["# Title", "body"]));
        let cache_file = dir.path().join("cache.json");
        cache.save_to(&cache_file).unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(&cache_file).unwrap()).unwrap();
        let entry = &json[file.to_string_lossy().as_ref()];
        assert_eq!(entry["content"][1], "body");
        assert_eq!(entry["size"], 12);
        assert!(entry["mtime"].as_f64().unwrap() > 0.0);
        assert!(entry["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_binary_entries_persist_and_expire() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("blob.dat");
        fs::write(&file, [0u8, 1, 2, 3]).unwrap();

        let cache = ContentCache::new();
        cache.insert_binary(file.clone(), &fs::metadata(&file).unwrap());
        assert!(matches!(
            cache.get(&file, &fs::metadata(&file).unwrap()),
            Some(CachedContent::Binary)
        ));

        let cache_file = dir.path().join("cache.json");
        cache.save_to(&cache_file).unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(&cache_file).unwrap()).unwrap();
        assert_eq!(json[file.to_string_lossy().as_ref()]["binary"], true);

        let loaded = ContentCache::load_from(&cache_file).unwrap();
        assert!(matches!(
            loaded.get(&file, &fs::metadata(&file).unwrap()),
            Some(CachedContent::Binary)
        ));

        fs::write(&file, "now it is text").unwrap();
        assert!(loaded.get(&file, &fs::metadata(&file).unwrap()).is_none());
    }

    #[test]
    fn test_save_under_regular_file_fails_cleanly() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();

        let cache = ContentCache::new();
        assert!(cache.save_to(&blocker.join("cache.json")).is_err());
        assert!(ContentCache::load_from(&blocker.join("cache.json")).unwrap().is_empty());
    }

    #[test]
    fn test_load_corrupted_or_missing() {
        let dir = tempdir().unwrap();
        let missing = ContentCache::load_from(&dir.path().join("none.json")).unwrap();
        assert!(missing.is_empty());

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "{not json").unwrap();
        assert!(ContentCache::load_from(&corrupt).unwrap().is_empty());
    }
}
