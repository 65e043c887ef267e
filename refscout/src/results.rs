use serde::{Deserialize, Serialize};
use std::path::Path;

/// One line of one file that refers to a target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceMatch {
    /// Target path relative to the project base
    pub target_file: String,
    /// Referring file, relative to the project base
    pub found_in_file: String,
    /// 1-based
    pub line_number: usize,
    /// Trimmed and truncated line text
    pub line_content: String,
    /// The search term that matched
    pub matched_term: String,
}

/// Every reference found to a single target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReferences {
    pub file_path: String,
    pub references_found: Vec<ReferenceMatch>,
}

impl FileReferences {
    pub fn new(file_path: impl Into<String>, references_found: Vec<ReferenceMatch>) -> Self {
        Self {
            file_path: file_path.into(),
            references_found,
        }
    }

    pub fn len(&self) -> usize {
        self.references_found.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references_found.is_empty()
    }
}

/// Results of an indexing run, one entry per searched target in processing order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexResults {
    pub files: Vec<FileReferences>,
    /// Total number of references found
    pub total_references: usize,
    /// Number of targets searched
    pub targets_searched: usize,
    /// Number of targets with at least one reference
    pub targets_with_references: usize,
}

impl IndexResults {
    /// Creates a new empty result set
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_file_references(&mut self, file: FileReferences) {
        self.targets_searched += 1;
        if !file.is_empty() {
            self.total_references += file.len();
            self.targets_with_references += 1;
        }
        self.files.push(file);
    }

    /// All references, flattened in processing order
    pub fn matches(&self) -> impl Iterator<Item = &ReferenceMatch> {
        self.files.iter().flat_map(|f| f.references_found.iter())
    }

    pub fn for_target(&self, relative_path: &str) -> Option<&FileReferences> {
        self.files.iter().find(|f| f.file_path == relative_path)
    }
}

/// `/`-separated path relative to `base`; paths outside `base` are shown in full
pub fn relative_display(base: &Path, path: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}
