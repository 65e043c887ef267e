use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::errors::unify_path;
use crate::exclusion::{ExclusionEngine, Phase};
use crate::filters::ExtensionSet;

/// Collects the files that are searched for references.
///
/// The list is built once per run and shared by every target. Directories excluded for
/// [`Phase::SearchTarget`] are pruned; files excluded for either search phase are dropped.
#[derive(Debug, Clone)]
pub struct CandidateSelector {
    dirs: Vec<PathBuf>,
    extensions: ExtensionSet,
    exclusion: Arc<ExclusionEngine>,
}

impl CandidateSelector {
    pub fn new(dirs: Vec<PathBuf>, extensions: ExtensionSet, exclusion: Arc<ExclusionEngine>) -> Self {
        Self {
            dirs,
            extensions,
            exclusion,
        }
    }

    pub fn from_config(config: &IndexConfig, exclusion: Arc<ExclusionEngine>) -> Self {
        let finding = &config.reference_finding;
        Self::new(
            finding
                .search_in_directories
                .iter()
                .map(|d| config.resolve_path(d))
                .collect(),
            ExtensionSet::from_config(&finding.search_in_file_extensions),
            exclusion,
        )
    }

    /// Sorted, de-duplicated absolute paths
    pub fn select(&self) -> Vec<PathBuf> {
        let mut selected = BTreeSet::new();

        for dir in &self.dirs {
            let dir = unify_path(dir);
            if dir.is_file() {
                if self.accepts(&dir) {
                    selected.insert(dir);
                }
                continue;
            }
            if !dir.is_dir() {
                warn!("Search directory does not exist: {}", dir.display());
                continue;
            }
            if self.exclusion.is_excluded(&dir, Phase::SearchTarget) {
                debug!("Skipping excluded search directory: {}", dir.display());
                continue;
            }

            let exclusion = Arc::clone(&self.exclusion);
            let walker = WalkBuilder::new(&dir)
                .standard_filters(false)
                .follow_links(false)
                .filter_entry(move |entry| {
                    entry.depth() == 0
                        || !entry.file_type().is_some_and(|t| t.is_dir())
                        || !exclusion.is_excluded(entry.path(), Phase::SearchTarget)
                })
                .build();

            for entry in walker {
                match entry {
                    Ok(entry) if entry.file_type().is_some_and(|t| t.is_file()) => {
                        if self.accepts(entry.path()) {
                            selected.insert(entry.into_path());
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Error walking {}: {}", dir.display(), e),
                }
            }
        }

        info!("Selected {} candidate files to search", selected.len());
        selected.into_iter().collect()
    }

    fn accepts(&self, path: &std::path::Path) -> bool {
        !self.exclusion.is_excluded(path, Phase::SearchTarget)
            && !self.exclusion.is_excluded(path, Phase::SearchContent)
            && self.extensions.matches(path)
    }
}
