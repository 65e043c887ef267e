use ignore::WalkBuilder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::config::{mb_to_bytes, IndexConfig};
use crate::errors::unify_path;
use crate::exclusion::{ExclusionEngine, Phase};
use crate::filters::ExtensionSet;

/// What a file has to satisfy to become a target
#[derive(Debug, Clone)]
pub struct ScanCriteria {
    /// Absolute roots to walk
    pub root_dirs: Vec<PathBuf>,
    pub extensions: ExtensionSet,
    pub min_size: u64,
    pub max_size: u64,
    /// Files last modified before this instant are skipped
    pub modified_after: SystemTime,
}

impl ScanCriteria {
    pub fn from_config(config: &IndexConfig) -> Self {
        let params = &config.scan_parameters;
        let window = Duration::from_secs_f64(params.time_window_hours.max(0.0) * 3600.0);
        Self {
            root_dirs: params
                .scan_directories
                .iter()
                .map(|d| config.resolve_path(d))
                .collect(),
            extensions: ExtensionSet::from_config(&params.target_file_extensions),
            min_size: params.min_file_size_bytes,
            max_size: mb_to_bytes(params.max_file_size_mb),
            modified_after: SystemTime::now()
                .checked_sub(window)
                .unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }

    /// Accepts every file under `roots` regardless of size or age
    pub fn unbounded(roots: Vec<PathBuf>) -> Self {
        Self {
            root_dirs: roots,
            extensions: ExtensionSet::default(),
            min_size: 0,
            max_size: u64::MAX,
            modified_after: SystemTime::UNIX_EPOCH,
        }
    }
}

/// A file selected for reference search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Counters collected while walking the scan roots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub dirs_processed: u64,
    pub dirs_skipped: u64,
    pub files_processed: u64,
    pub files_skipped_exclusion: u64,
    pub files_skipped_extension: u64,
    pub files_skipped_size: u64,
    pub files_skipped_time: u64,
    pub errors: u64,
}

/// Targets found by a scan, sorted by path without duplicates
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub files: Vec<TargetFile>,
    pub stats: ScanStats,
}

/// Walks the scan roots and selects target files.
///
/// Excluded directories are pruned during the walk rather than filtered afterwards, so an
/// excluded `node_modules` is never descended into.
#[derive(Debug, Clone)]
pub struct FileScanner {
    exclusion: Arc<ExclusionEngine>,
}

impl FileScanner {
    pub fn new(exclusion: Arc<ExclusionEngine>) -> Self {
        Self { exclusion }
    }

    pub fn scan(&self, criteria: &ScanCriteria) -> ScanOutcome {
        let mut stats = ScanStats::default();
        let mut found: BTreeMap<PathBuf, TargetFile> = BTreeMap::new();

        for root in &criteria.root_dirs {
            let root = unify_path(root);
            if !root.is_dir() {
                warn!("Scan directory does not exist or is not a directory: {}", root.display());
                stats.dirs_skipped += 1;
                continue;
            }
            if self.exclusion.is_excluded(&root, Phase::ScanRoot) {
                debug!("Skipping excluded scan root: {}", root.display());
                stats.dirs_skipped += 1;
                continue;
            }

            debug!("Scanning {}", root.display());
            self.walk_root(&root, criteria, &mut stats, &mut found);
        }

        info!(
            "Scan finished: {} target files ({} files seen, {} directories pruned)",
            found.len(),
            stats.files_processed,
            stats.dirs_skipped
        );

        ScanOutcome {
            files: found.into_values().collect(),
            stats,
        }
    }

    fn walk_root(
        &self,
        root: &Path,
        criteria: &ScanCriteria,
        stats: &mut ScanStats,
        found: &mut BTreeMap<PathBuf, TargetFile>,
    ) {
        let pruned = Arc::new(AtomicU64::new(0));
        let exclusion = Arc::clone(&self.exclusion);
        let pruned_in_filter = Arc::clone(&pruned);

        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                if entry.depth() == 0 || !entry.file_type().is_some_and(|t| t.is_dir()) {
                    return true;
                }
                if exclusion.is_excluded(entry.path(), Phase::ScanDir) {
                    pruned_in_filter.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                true
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Error walking {}: {}", root.display(), e);
                    stats.errors += 1;
                    continue;
                }
            };

            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                stats.dirs_processed += 1;
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            stats.files_processed += 1;
            if let Some(target) = self.check_file(entry.path(), criteria, stats) {
                found.insert(target.path.clone(), target);
            }
        }

        stats.dirs_skipped += pruned.load(Ordering::Relaxed);
    }

    /// Applies the per-file checks in order: exclusion, extension, size, then age
    fn check_file(
        &self,
        path: &Path,
        criteria: &ScanCriteria,
        stats: &mut ScanStats,
    ) -> Option<TargetFile> {
        if self.exclusion.is_excluded(path, Phase::ScanFile) {
            stats.files_skipped_exclusion += 1;
            return None;
        }

        if !criteria.extensions.matches(path) {
            stats.files_skipped_extension += 1;
            return None;
        }

        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                debug!("Cannot stat {}: {}", path.display(), e);
                stats.errors += 1;
                return None;
            }
        };
        if !metadata.is_file() {
            return None;
        }

        let size = metadata.len();
        if size < criteria.min_size || size > criteria.max_size {
            stats.files_skipped_size += 1;
            return None;
        }

        let modified = match metadata.modified() {
            Ok(m) => m,
            Err(e) => {
                debug!("No modification time for {}: {}", path.display(), e);
                stats.errors += 1;
                return None;
            }
        };
        if modified < criteria.modified_after {
            stats.files_skipped_time += 1;
            return None;
        }

        Some(TargetFile {
            path: path.to_path_buf(),
            size,
            modified,
        })
    }
}
