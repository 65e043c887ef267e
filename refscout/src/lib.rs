pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod exclusion;
pub mod filters;
pub mod metrics;
pub mod orchestrator;
pub mod results;
pub mod scanner;
pub mod search;
pub mod terms;

pub use cache::{CachedContent, ContentCache};
pub use checkpoint::Checkpoint;
pub use config::IndexConfig;
pub use errors::{SearchError, SearchResult};
pub use exclusion::{ExclusionEngine, Phase, RuleKind};
pub use metrics::{PerformanceMonitor, PerformanceSummary};
pub use orchestrator::{run, ReferenceIndexer, RunOutput, RunState};
pub use results::{FileReferences, IndexResults, ReferenceMatch};
pub use scanner::{FileScanner, ScanCriteria, ScanStats, TargetFile};
pub use terms::SearchTermGenerator;
