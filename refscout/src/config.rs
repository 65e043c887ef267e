use config::{Config as ConfigBuilder, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::errors::{unify_path, SearchError, SearchResult};
use crate::exclusion::RuleKind;

/// Resolved configuration for an indexing run.
///
/// # Configuration Locations
///
/// The configuration can be loaded from multiple locations in order of precedence:
/// 1. Custom config file passed to [`IndexConfig::load_from`]
/// 2. Local `.refscout.yaml` in the current directory
/// 3. Global `$HOME/.config/refscout/config.yaml`
///
/// # Configuration Format
///
/// ```yaml
/// project_base_path: "."
///
/// scan_parameters:
///   scan_directories: ["src", "docs"]
///   target_file_extensions: ["py", "md"]
///   time_window_hours: 48
///
/// exclusions:
///   global:
///     - "node_modules"
///     - "**/*.min.js"
///   phase_specific:
///     scan_dir:
///       - { pattern: "^build/", type: regex }
///
/// reference_finding:
///   patterns: ["{filename}", "import {module_name}"]
///   search_in_directories: ["."]
///   search_in_file_extensions: ["py", "md"]
///
/// performance:
///   max_workers: 8
///   create_checkpoint: true
/// ```
///
/// Only the scan directories and the reference patterns are mandatory; everything else has a
/// default matching the behaviour of a plain run over the whole tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Root every relative path in this file is resolved against
    #[serde(default = "default_base_path")]
    pub project_base_path: PathBuf,

    /// What counts as a target file
    #[serde(default)]
    pub scan_parameters: ScanParameters,

    /// Exclusion rules, global and per phase
    #[serde(default)]
    pub exclusions: ExclusionSettings,

    /// How references are searched for
    #[serde(default)]
    pub reference_finding: ReferenceFinding,

    /// Concurrency, batching, sampling and persistence
    #[serde(default)]
    pub performance: PerformanceSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanParameters {
    /// Directories walked for target files, relative to the project base
    #[serde(default)]
    pub scan_directories: Vec<PathBuf>,

    /// Extensions a target must carry (with or without the leading dot).
    /// Empty means any extension.
    #[serde(default)]
    pub target_file_extensions: Vec<String>,

    /// Only files modified within this many hours are targets
    #[serde(default = "default_time_window_hours")]
    pub time_window_hours: f64,

    #[serde(default)]
    pub min_file_size_bytes: u64,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: f64,
}

/// A single exclusion pattern, either a bare string or a pattern with an explicit type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternSpec {
    Bare(String),
    Typed {
        pattern: String,
        #[serde(rename = "type", default)]
        kind: RuleKind,
    },
}

impl PatternSpec {
    pub fn pattern(&self) -> &str {
        match self {
            PatternSpec::Bare(p) => p,
            PatternSpec::Typed { pattern, .. } => pattern,
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            PatternSpec::Bare(_) => RuleKind::Auto,
            PatternSpec::Typed { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionSettings {
    /// Patterns applied in every phase
    #[serde(default)]
    pub global: Vec<PatternSpec>,

    /// Patterns keyed by phase name (`scan_root`, `scan_dir`, `scan_file`,
    /// `search_target`, `search_content`)
    #[serde(default)]
    pub phase_specific: BTreeMap<String, Vec<PatternSpec>>,

    /// Memoize exclusion decisions for the duration of a run
    #[serde(default = "default_true")]
    pub cache_exclusions: bool,
}

/// Which engine searches candidate files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    #[default]
    #[serde(alias = "python_regex", alias = "builtin")]
    Native,
    Ripgrep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceFinding {
    #[serde(default)]
    pub search_method: SearchMethod,

    /// Program name or path of the external search tool
    #[serde(default = "default_ripgrep_path")]
    pub ripgrep_path: String,

    /// Reference templates, e.g. `"{filename}"` or `"import {module_name}"`
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Emit dotted module paths for files in a module language
    #[serde(default = "default_true", alias = "resolve_python_modules")]
    pub resolve_modules: bool,

    /// Extensions treated as importable modules
    #[serde(default = "default_module_extensions")]
    pub module_extensions: Vec<String>,

    #[serde(default = "default_search_directories")]
    pub search_in_directories: Vec<PathBuf>,

    /// Extensions of candidate files. Empty means any extension.
    #[serde(default)]
    pub search_in_file_extensions: Vec<String>,

    #[serde(default = "default_timeout_sec")]
    pub file_processing_timeout_sec: f64,

    #[serde(default = "default_max_line_length")]
    pub max_line_length_for_reference_content: usize,

    #[serde(default = "default_max_search_file_size_mb")]
    pub max_search_file_size_mb: f64,

    /// Term counts above this build a shared automaton instead of per-term patterns
    #[serde(default = "default_automaton_threshold")]
    pub automaton_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSettings {
    /// Upper bound on concurrent target searches. Defaults to the CPU count.
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Targets per batch. Derived from the target count when unset.
    #[serde(default)]
    pub batch_size: Option<usize>,

    #[serde(default)]
    pub quick_test: bool,

    #[serde(default = "default_quick_test_count")]
    pub quick_test_count: usize,

    #[serde(default = "default_partial_run_percentage")]
    pub partial_run_percentage: f64,

    /// Reorder targets so the most referenced ones are processed first
    #[serde(default)]
    pub hierarchical_priority: bool,

    #[serde(default = "default_priority_sample_size")]
    pub priority_sample_size: usize,

    #[serde(default)]
    pub create_checkpoint: bool,

    #[serde(default)]
    pub continue_from_checkpoint: bool,

    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    #[serde(default)]
    pub persistent_cache: bool,

    #[serde(default = "default_cache_path")]
    pub persistent_cache_file: PathBuf,

    #[serde(default)]
    pub show_progress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}

fn default_base_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_time_window_hours() -> f64 {
    168.0
}

fn default_max_file_size_mb() -> f64 {
    10.0
}

fn default_ripgrep_path() -> String {
    "rg".to_string()
}

fn default_module_extensions() -> Vec<String> {
    vec!["py".to_string()]
}

fn default_search_directories() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_timeout_sec() -> f64 {
    60.0
}

fn default_max_line_length() -> usize {
    500
}

fn default_max_search_file_size_mb() -> f64 {
    5.0
}

fn default_automaton_threshold() -> usize {
    3
}

fn default_quick_test_count() -> usize {
    3
}

fn default_partial_run_percentage() -> f64 {
    100.0
}

fn default_priority_sample_size() -> usize {
    50
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("reports/cross_reference/checkpoint.json")
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("reports/cross_reference/file_content_cache.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            scan_directories: Vec::new(),
            target_file_extensions: Vec::new(),
            time_window_hours: default_time_window_hours(),
            min_file_size_bytes: 0,
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

impl Default for ExclusionSettings {
    fn default() -> Self {
        Self {
            global: Vec::new(),
            phase_specific: BTreeMap::new(),
            cache_exclusions: true,
        }
    }
}

impl Default for ReferenceFinding {
    fn default() -> Self {
        Self {
            search_method: SearchMethod::Native,
            ripgrep_path: default_ripgrep_path(),
            patterns: Vec::new(),
            resolve_modules: true,
            module_extensions: default_module_extensions(),
            search_in_directories: default_search_directories(),
            search_in_file_extensions: Vec::new(),
            file_processing_timeout_sec: default_timeout_sec(),
            max_line_length_for_reference_content: default_max_line_length(),
            max_search_file_size_mb: default_max_search_file_size_mb(),
            automaton_threshold: default_automaton_threshold(),
        }
    }
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            max_workers: None,
            batch_size: None,
            quick_test: false,
            quick_test_count: default_quick_test_count(),
            partial_run_percentage: default_partial_run_percentage(),
            hierarchical_priority: false,
            priority_sample_size: default_priority_sample_size(),
            create_checkpoint: false,
            continue_from_checkpoint: false,
            checkpoint_path: default_checkpoint_path(),
            persistent_cache: false,
            persistent_cache_file: default_cache_path(),
            show_progress: false,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl IndexConfig {
    /// A configuration that treats every file under `base` as a target and
    /// searches the whole tree for its filename.
    pub fn for_root(base: impl Into<PathBuf>) -> Self {
        Self {
            project_base_path: base.into(),
            scan_parameters: ScanParameters {
                scan_directories: vec![PathBuf::from(".")],
                ..ScanParameters::default()
            },
            exclusions: ExclusionSettings::default(),
            reference_finding: ReferenceFinding {
                patterns: vec!["{filename}".to_string()],
                ..ReferenceFinding::default()
            },
            performance: PerformanceSettings::default(),
            logging: LoggingSettings::default(),
        }
    }

    /// Loads configuration from the default locations plus an optional explicit file.
    /// An explicit file that does not exist is an error.
    pub fn load_from(config_path: Option<&Path>) -> SearchResult<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(global) = dirs::config_dir().map(|p| p.join("refscout/config.yaml")) {
            if global.exists() {
                builder = builder.add_source(File::from(global.as_path()));
            }
        }

        let local = PathBuf::from(".refscout.yaml");
        if local.exists() {
            builder = builder.add_source(File::from(local.as_path()));
        }

        if let Some(path) = config_path {
            if !path.is_file() {
                return Err(SearchError::config_error(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            info!("Loading configuration from: {}", path.display());
            builder = builder.add_source(File::from(path));
        }

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Checks required settings and clamps out-of-range numbers.
    ///
    /// Missing scan directories or reference patterns, or a base path that is not a
    /// directory, are fatal. Numeric values below their minimum are raised to it
    /// with a warning. On success the base path is canonical.
    pub fn validate(&mut self) -> SearchResult<()> {
        if !self.project_base_path.is_dir() {
            return Err(SearchError::config_error(format!(
                "Project base path does not exist or is not a directory: {}",
                self.project_base_path.display()
            )));
        }
        self.project_base_path = unify_path(&self.project_base_path);

        if self.scan_parameters.scan_directories.is_empty() {
            return Err(SearchError::config_error(
                "No scan directories specified in 'scan_parameters.scan_directories'",
            ));
        }

        if self
            .reference_finding
            .patterns
            .iter()
            .all(|p| p.trim().is_empty())
        {
            return Err(SearchError::config_error(
                "No reference patterns specified in 'reference_finding.patterns'",
            ));
        }

        clamp_min(
            "scan_parameters.time_window_hours",
            &mut self.scan_parameters.time_window_hours,
            1.0,
        );
        clamp_min(
            "scan_parameters.max_file_size_mb",
            &mut self.scan_parameters.max_file_size_mb,
            0.0,
        );
        clamp_min(
            "reference_finding.file_processing_timeout_sec",
            &mut self.reference_finding.file_processing_timeout_sec,
            1.0,
        );
        clamp_min(
            "reference_finding.max_search_file_size_mb",
            &mut self.reference_finding.max_search_file_size_mb,
            0.0,
        );

        let pct = self.performance.partial_run_percentage;
        if !(1.0..=100.0).contains(&pct) {
            let clamped = if pct.is_nan() { 100.0 } else { pct.clamp(1.0, 100.0) };
            warn!(
                "Configuration value 'performance.partial_run_percentage' ({}) is out of range, using {}",
                pct, clamped
            );
            self.performance.partial_run_percentage = clamped;
        }

        if self.performance.quick_test_count == 0 {
            warn!("Configuration value 'performance.quick_test_count' is 0, using 1");
            self.performance.quick_test_count = 1;
        }

        Ok(())
    }

    /// Resolves a configured path against the project base
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_base_path.join(path)
        }
    }

    pub fn checkpoint_file(&self) -> PathBuf {
        self.resolve_path(&self.performance.checkpoint_path)
    }

    pub fn cache_file(&self) -> PathBuf {
        self.resolve_path(&self.performance.persistent_cache_file)
    }

    pub fn file_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.reference_finding.file_processing_timeout_sec)
    }

    pub fn max_search_file_size(&self) -> u64 {
        mb_to_bytes(self.reference_finding.max_search_file_size_mb)
    }
}

pub(crate) fn mb_to_bytes(mb: f64) -> u64 {
    (mb.max(0.0) * 1024.0 * 1024.0) as u64
}

fn clamp_min(name: &str, value: &mut f64, min: f64) {
    if value.is_nan() || *value < min {
        warn!(
            "Configuration value '{}' ({}) is below minimum ({}), using minimum",
            name, value, min
        );
        *value = min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        let config_content = r#"
project_base_path: "."
scan_parameters:
  scan_directories: ["src"]
  target_file_extensions: ["py", ".md"]
  time_window_hours: 24
exclusions:
  global:
    - "node_modules"
    - { pattern: "^build/", type: regex }
  phase_specific:
    scan_dir: ["vendor"]
reference_finding:
  search_method: ripgrep
  patterns: ["{filename}", "import {module_name}"]
  resolve_python_modules: false
performance:
  max_workers: 4
  create_checkpoint: true
logging:
  level: "debug"
"#;

        let mut file = File::create(&config_path).unwrap();
        file.write_all(config_content.as_bytes()).unwrap();

        let config = IndexConfig::load_from(Some(&config_path)).unwrap();
        assert_eq!(
            config.scan_parameters.scan_directories,
            vec![PathBuf::from("src")]
        );
        assert_eq!(config.scan_parameters.time_window_hours, 24.0);
        assert_eq!(config.exclusions.global.len(), 2);
        assert_eq!(config.exclusions.global[0].pattern(), "node_modules");
        assert_eq!(config.exclusions.global[1].kind(), RuleKind::Regex);
        assert_eq!(config.exclusions.phase_specific["scan_dir"].len(), 1);
        assert_eq!(
            config.reference_finding.search_method,
            SearchMethod::Ripgrep
        );
        assert!(!config.reference_finding.resolve_modules);
        assert_eq!(config.performance.max_workers, Some(4));
        assert!(config.performance.create_checkpoint);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_default_values() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(
            &config_path,
            "scan_parameters:\n  scan_directories: [\".\"]\nreference_finding:\n  patterns: [\"{filename}\"]\n",
        )
        .unwrap();

        let config = IndexConfig::load_from(Some(&config_path)).unwrap();
        assert_eq!(config.project_base_path, PathBuf::from("."));
        assert_eq!(config.scan_parameters.time_window_hours, 168.0);
        assert!(config.exclusions.cache_exclusions);
        assert_eq!(config.reference_finding.search_method, SearchMethod::Native);
        assert!(config.reference_finding.resolve_modules);
        assert_eq!(config.reference_finding.automaton_threshold, 3);
        assert_eq!(config.performance.partial_run_percentage, 100.0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = IndexConfig::load_from(Some(Path::new("nonexistent.yaml")));
        assert!(matches!(result, Err(SearchError::ConfigError(_))));
    }

    #[test]
    fn test_validate_requires_scan_directories_and_patterns() {
        let dir = tempdir().unwrap();

        let mut config = IndexConfig::for_root(dir.path());
        config.scan_parameters.scan_directories.clear();
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("scan directories"));

        let mut config = IndexConfig::for_root(dir.path());
        config.reference_finding.patterns = vec!["  ".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reference patterns"));

        let mut config = IndexConfig::for_root(dir.path().join("missing"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_clamps_numbers() {
        let dir = tempdir().unwrap();
        let mut config = IndexConfig::for_root(dir.path());
        config.scan_parameters.time_window_hours = 0.0;
        config.reference_finding.file_processing_timeout_sec = 0.0;
        config.performance.partial_run_percentage = 250.0;
        config.performance.quick_test_count = 0;

        config.validate().unwrap();
        assert_eq!(config.scan_parameters.time_window_hours, 1.0);
        assert_eq!(config.reference_finding.file_processing_timeout_sec, 1.0);
        assert_eq!(config.performance.partial_run_percentage, 100.0);
        assert_eq!(config.performance.quick_test_count, 1);
        assert!(config.project_base_path.is_absolute());
    }

    #[test]
    fn test_relative_persistence_paths_resolve_against_base() {
        let dir = tempdir().unwrap();
        let mut config = IndexConfig::for_root(dir.path());
        config.validate().unwrap();

        assert!(config
            .checkpoint_file()
            .starts_with(&config.project_base_path));
        assert!(config.cache_file().ends_with("file_content_cache.json"));
    }
}
