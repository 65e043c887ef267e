use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::SystemTime;
use tracing::{info, warn};

use crate::errors::{SearchError, SearchResult};
use crate::scanner::TargetFile;

/// Progress of a run, persisted so an interrupted run can resume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// RFC 3339 time of the last save
    pub timestamp: String,
    /// Absolute paths of targets whose search finished
    pub processed_files: BTreeSet<String>,
    pub total_files: usize,
    pub references_found: usize,
    pub elapsed_seconds: f64,
    #[serde(default)]
    pub completed: bool,
}

impl Checkpoint {
    pub fn new(total_files: usize) -> Self {
        Self {
            timestamp: now_rfc3339(),
            processed_files: BTreeSet::new(),
            total_files,
            references_found: 0,
            elapsed_seconds: 0.0,
            completed: false,
        }
    }

    /// Loads a checkpoint. A missing file is `Ok(None)`; an unreadable one is an error.
    pub fn load(path: &Path) -> SearchResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(path).map_err(|e| SearchError::from_io(path, e))?;
        let checkpoint: Self = serde_json::from_slice(&data).map_err(|e| {
            SearchError::checkpoint_error(format!("{}: {}", path.display(), e))
        })?;
        info!(
            "Loaded checkpoint from {}: {} of {} targets processed",
            path.display(),
            checkpoint.processed_files.len(),
            checkpoint.total_files
        );
        Ok(Some(checkpoint))
    }

    /// Writes the checkpoint through a temporary file so a crash never leaves a torn file
    pub fn save(&mut self, path: &Path) -> SearchResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(SearchError::IoError)?;
        }
        self.timestamp = now_rfc3339();

        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| SearchError::checkpoint_error(e.to_string()))?;
        std::fs::write(&tmp_path, data).map_err(SearchError::IoError)?;
        std::fs::rename(&tmp_path, path).map_err(SearchError::IoError)?;
        Ok(())
    }

    pub fn is_processed(&self, path: &Path) -> bool {
        self.processed_files
            .contains(path.to_string_lossy().as_ref())
    }

    pub fn mark_processed(&mut self, path: &Path, references: usize) {
        if self.processed_files.insert(path.to_string_lossy().into_owned()) {
            self.references_found += references;
        }
        self.completed = self.processed_files.len() >= self.total_files;
    }

    /// Drops targets this checkpoint already covers, keeping order
    pub fn pending(&self, targets: Vec<TargetFile>) -> Vec<TargetFile> {
        let before = targets.len();
        let pending: Vec<_> = targets
            .into_iter()
            .filter(|t| !self.is_processed(&t.path))
            .collect();
        if pending.len() < before {
            info!(
                "Resuming: skipping {} already processed targets",
                before - pending.len()
            );
        }
        pending
    }
}

fn now_rfc3339() -> String {
    humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
}

/// Checkpoint writes never abort a run
pub(crate) fn save_quietly(checkpoint: &mut Checkpoint, path: &Path) {
    if let Err(e) = checkpoint.save(path) {
        warn!("Failed to save checkpoint to {}: {}", path.display(), e);
    }
}
