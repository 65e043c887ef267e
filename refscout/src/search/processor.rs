use memmap2::Mmap;
use serde::Serialize;
use std::fs::{File, Metadata};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::matcher::{Deadline, TermMatcher};
use crate::cache::{CachedContent, ContentCache};
use crate::errors::{SearchError, SearchResult};
use crate::filters::{is_likely_binary, looks_binary};
use crate::metrics::PerformanceMonitor;
use crate::results::{relative_display, ReferenceMatch};

// Constants for file processing
const BUFFER_CAPACITY: usize = 65536;
pub(crate) const SMALL_FILE_THRESHOLD: u64 = 32 * 1024; // 32KB
pub(crate) const LARGE_FILE_THRESHOLD: u64 = 1024 * 1024; // 1MB

/// Candidates larger than this are not searched
pub const DEFAULT_MAX_SEARCH_FILE_SIZE: u64 = 5 * 1024 * 1024;
pub const DEFAULT_MAX_LINE_LENGTH: usize = 500;

/// Counters for candidate files handled by a [`FileProcessor`]
#[derive(Debug, Default)]
struct SearchCounters {
    files_searched: AtomicU64,
    skipped_binary: AtomicU64,
    skipped_size: AtomicU64,
    timeouts: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub files_searched: u64,
    pub skipped_binary: u64,
    pub skipped_size: u64,
    pub timeouts: u64,
    pub errors: u64,
}

/// Searches candidate files for references to one target at a time.
///
/// Contents are read once per file and shared through the [`ContentCache`]; binary and
/// oversized candidates are skipped before any matching happens.
#[derive(Debug)]
pub struct FileProcessor {
    base: PathBuf,
    cache: Arc<ContentCache>,
    monitor: Option<Arc<PerformanceMonitor>>,
    max_file_size: u64,
    max_line_length: usize,
    timeout: Option<Duration>,
    counters: SearchCounters,
}

impl FileProcessor {
    pub fn new(base: impl Into<PathBuf>, cache: Arc<ContentCache>) -> Self {
        Self {
            base: base.into(),
            cache,
            monitor: None,
            max_file_size: DEFAULT_MAX_SEARCH_FILE_SIZE,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            timeout: None,
            counters: SearchCounters::default(),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_max_line_length(mut self, chars: usize) -> Self {
        self.max_line_length = chars;
        self
    }

    /// Per-candidate time limit; a file exceeding it contributes no references
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stats(&self) -> SearchStats {
        SearchStats {
            files_searched: self.counters.files_searched.load(Ordering::Relaxed),
            skipped_binary: self.counters.skipped_binary.load(Ordering::Relaxed),
            skipped_size: self.counters.skipped_size.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Searches every candidate except `target` itself. Failures on individual candidates
    /// are logged and counted; they never abort the search.
    pub fn search(
        &self,
        target: &Path,
        matcher: &TermMatcher,
        candidates: &[PathBuf],
    ) -> Vec<ReferenceMatch> {
        let mut found = Vec::new();
        for candidate in candidates {
            if candidate == target {
                continue;
            }
            let started = Instant::now();
            match self.search_file(target, candidate, matcher) {
                Ok(matches) => found.extend(matches),
                Err(SearchError::Timeout { path, limit }) => {
                    warn!(
                        "Timed out after {:?} searching {} for references to {}",
                        limit,
                        path.display(),
                        target.display()
                    );
                    self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    debug!("Skipping {}: {}", candidate.display(), e);
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
            if let Some(monitor) = &self.monitor {
                monitor.record_file_processing(candidate, started.elapsed());
            }
        }
        found
    }

    /// References to `target` in a single candidate file
    pub fn search_file(
        &self,
        target: &Path,
        candidate: &Path,
        matcher: &TermMatcher,
    ) -> SearchResult<Vec<ReferenceMatch>> {
        let deadline = match self.timeout {
            Some(limit) => Deadline::new(limit),
            None => Deadline::unbounded(),
        };

        let Some(lines) = self.load_lines(candidate)? else {
            return Ok(Vec::new());
        };
        self.counters.files_searched.fetch_add(1, Ordering::Relaxed);

        let hits = matcher.find_lines(&lines, &deadline).map_err(|_| {
            SearchError::timeout(candidate, deadline.limit().unwrap_or(Duration::ZERO))
        })?;

        let target_file = relative_display(&self.base, target);
        let found_in_file = relative_display(&self.base, candidate);
        Ok(hits
            .into_iter()
            .map(|hit| ReferenceMatch {
                target_file: target_file.clone(),
                found_in_file: found_in_file.clone(),
                line_number: hit.line_number,
                line_content: truncate_chars(lines[hit.line_number - 1].trim(), self.max_line_length),
                matched_term: matcher.term(hit.term_index).unwrap_or_default().to_string(),
            })
            .collect())
    }

    /// Decoded lines of `path`, or `None` for binary and oversized files
    pub fn load_lines(&self, path: &Path) -> SearchResult<Option<Arc<Vec<String>>>> {
        if is_likely_binary(path) {
            self.counters.skipped_binary.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let metadata = std::fs::metadata(path).map_err(|e| SearchError::from_io(path, e))?;
        if metadata.len() > self.max_file_size {
            trace!("Skipping oversized file: {}", path.display());
            self.counters.skipped_size.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        match self.cache.get(path, &metadata) {
            Some(CachedContent::Text(lines)) => return Ok(Some(lines)),
            Some(CachedContent::Binary) => {
                self.counters.skipped_binary.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            None => {}
        }

        let Some(contents) = read_text(path, &metadata)? else {
            trace!("Skipping binary file: {}", path.display());
            self.counters.skipped_binary.fetch_add(1, Ordering::Relaxed);
            self.cache.insert_binary(path.to_path_buf(), &metadata);
            return Ok(None);
        };

        let lines = Arc::new(contents.lines().map(String::from).collect::<Vec<_>>());
        self.cache
            .insert(path.to_path_buf(), &metadata, Arc::clone(&lines));
        Ok(Some(lines))
    }
}

/// Reads `path` with a strategy chosen by size and decodes it lossily.
/// Returns `None` when the leading bytes look binary.
fn read_text(path: &Path, metadata: &Metadata) -> SearchResult<Option<String>> {
    let size = metadata.len();

    if size >= LARGE_FILE_THRESHOLD {
        let file = File::open(path).map_err(|e| SearchError::from_io(path, e))?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(SearchError::IoError)?;
        return Ok(decode(&mmap, path));
    }

    let bytes = if size < SMALL_FILE_THRESHOLD {
        std::fs::read(path).map_err(|e| SearchError::from_io(path, e))?
    } else {
        let file = File::open(path).map_err(|e| SearchError::from_io(path, e))?;
        let mut reader = BufReader::with_capacity(BUFFER_CAPACITY, file);
        let mut bytes = Vec::with_capacity(size as usize);
        reader
            .read_to_end(&mut bytes)
            .map_err(SearchError::IoError)?;
        bytes
    };
    Ok(decode(&bytes, path))
}

fn decode(bytes: &[u8], path: &Path) -> Option<String> {
    if looks_binary(bytes) {
        return None;
    }
    let cow = String::from_utf8_lossy(bytes);
    // If it's Owned, at least one invalid sequence was replaced.
    if let std::borrow::Cow::Owned(_) = cow {
        debug!("Invalid UTF-8 replaced in file: {}", path.display());
    }
    Some(cow.into_owned())
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}
