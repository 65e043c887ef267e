//! Runs an indexing pass from configuration to ordered results.
//!
//! A run moves through [`RunState`]s in order:
//!
//! 1. **Init**: validate configuration, compile exclusions, load the content cache and any
//!    checkpoint, start the worker pool.
//! 2. **Scanning**: find target files and the shared candidate list.
//! 3. **Prioritizing** (optional): move the most referenced targets to the front.
//! 4. **BatchProcessing**: search targets batch by batch on the worker pool, persisting the
//!    checkpoint and cache after each batch.
//! 5. **Finalizing**: assemble results in target order and write final state.
//!
//! Output order never depends on which worker finishes first: each result is committed to the
//! slot of its target's position in the (possibly prioritized) scan order.
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::ContentCache;
use crate::checkpoint::{save_quietly, Checkpoint};
use crate::config::{IndexConfig, SearchMethod};
use crate::errors::{SearchError, SearchResult};
use crate::exclusion::{ExclusionEngine, ExclusionStats};
use crate::metrics::{PerformanceMonitor, PerformanceSummary};
use crate::results::{relative_display, FileReferences, IndexResults, ReferenceMatch};
use crate::scanner::{FileScanner, ScanCriteria, ScanStats, TargetFile};
use crate::search::{CandidateSelector, FileProcessor, RipgrepSearcher, SearchStats, TermMatcher};
use crate::terms::SearchTermGenerator;

/// Hard cap on concurrent target searches
pub const MAX_WORKERS: usize = 16;
const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 10;
/// Seed for quick-test sampling, so repeated quick tests pick the same targets
pub const QUICK_TEST_SEED: u64 = 42;

pub const PHASE_INIT: &str = "initialization";
pub const PHASE_SCAN: &str = "find_target_files";
pub const PHASE_PRIORITIZE: &str = "prioritize_targets";
pub const PHASE_SEARCH: &str = "find_references";
pub const PHASE_FINALIZE: &str = "finalize";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Init,
    Scanning,
    Prioritizing,
    BatchProcessing,
    Finalizing,
    Done,
}

#[derive(Debug)]
enum Backend {
    Native,
    Ripgrep(RipgrepSearcher),
}

/// Everything a run produces
#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub results: IndexResults,
    /// Targets after scanning and sampling, including any already covered by a checkpoint
    pub targets_total: usize,
    pub resumed_from_checkpoint: bool,
    pub scan_stats: ScanStats,
    pub search_stats: SearchStats,
    pub exclusion_stats: ExclusionStats,
    pub cache_entries: usize,
    pub summary: PerformanceSummary,
}

/// Drives a full indexing run
#[derive(Debug)]
pub struct ReferenceIndexer {
    config: IndexConfig,
    exclusion: Arc<ExclusionEngine>,
    terms: SearchTermGenerator,
    cache: Arc<ContentCache>,
    processor: FileProcessor,
    backend: Backend,
    monitor: Arc<PerformanceMonitor>,
    pool: ThreadPool,
    checkpoint: Option<Checkpoint>,
    state: RunState,
}

impl ReferenceIndexer {
    /// Validates `config` and prepares everything a run needs.
    ///
    /// Only configuration problems fail here. An unusable external search tool, a corrupt
    /// cache or an unreadable checkpoint are logged and replaced by their defaults.
    pub fn new(mut config: IndexConfig) -> SearchResult<Self> {
        let monitor = Arc::new(PerformanceMonitor::new());
        monitor.start_phase(PHASE_INIT);

        config.validate()?;
        let base = config.project_base_path.clone();
        info!("Indexing references under {}", base.display());

        let exclusion = Arc::new(ExclusionEngine::from_settings(&base, &config.exclusions));
        let terms = SearchTermGenerator::from_config(&config);

        let cache = if config.performance.persistent_cache {
            ContentCache::load_from(&config.cache_file())?
        } else {
            ContentCache::new()
        };
        let cache = Arc::new(cache);

        let finding = &config.reference_finding;
        let processor = FileProcessor::new(&base, Arc::clone(&cache))
            .with_monitor(Arc::clone(&monitor))
            .with_max_file_size(config.max_search_file_size())
            .with_max_line_length(finding.max_line_length_for_reference_content)
            .with_timeout(config.file_timeout());

        let backend = match finding.search_method {
            SearchMethod::Native => Backend::Native,
            SearchMethod::Ripgrep => match RipgrepSearcher::locate(&finding.ripgrep_path, &base) {
                Ok(rg) => Backend::Ripgrep(
                    rg.with_max_file_size(config.max_search_file_size())
                        .with_max_line_length(finding.max_line_length_for_reference_content),
                ),
                Err(e) => {
                    warn!("{}; falling back to the built-in search", e);
                    Backend::Native
                }
            },
        };

        let checkpoint = if config.performance.continue_from_checkpoint {
            Checkpoint::load(&config.checkpoint_file()).unwrap_or_else(|e| {
                warn!("Ignoring checkpoint: {}", e);
                None
            })
        } else {
            None
        };

        let workers = worker_limit(config.performance.max_workers);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("refscout-worker-{}", i))
            .build()
            .map_err(|e| SearchError::config_error(format!("cannot start worker pool: {}", e)))?;
        debug!("Worker pool started with {} threads", workers);

        monitor.end_phase(PHASE_INIT);
        Ok(Self {
            config,
            exclusion,
            terms,
            cache,
            processor,
            backend,
            monitor,
            pool,
            checkpoint,
            state: RunState::Init,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn run(&mut self) -> SearchResult<RunOutput> {
        let perf = self.config.performance.clone();
        let base = self.config.project_base_path.clone();

        self.state = RunState::Scanning;
        self.monitor.start_phase(PHASE_SCAN);
        let scan = FileScanner::new(Arc::clone(&self.exclusion))
            .scan(&ScanCriteria::from_config(&self.config));
        let mut targets = scan.files;
        if perf.quick_test {
            targets = quick_test_sample(targets, perf.quick_test_count, QUICK_TEST_SEED);
            info!("Quick test: limited to {} target files", targets.len());
        }
        let candidates =
            CandidateSelector::from_config(&self.config, Arc::clone(&self.exclusion)).select();
        self.monitor.end_phase(PHASE_SCAN);

        if perf.hierarchical_priority && !perf.quick_test && targets.len() > 1 {
            self.state = RunState::Prioritizing;
            self.monitor.start_phase(PHASE_PRIORITIZE);
            targets = self.prioritize(targets, &candidates, perf.priority_sample_size);
            self.monitor.end_phase(PHASE_PRIORITIZE);
        }

        let targets_total = targets.len();
        let resumed = self.checkpoint.is_some();
        let mut checkpoint = match self.checkpoint.take() {
            Some(mut previous) => {
                targets = previous.pending(targets);
                previous.total_files = targets_total;
                previous
            }
            None => Checkpoint::new(targets_total),
        };

        if perf.partial_run_percentage < 100.0 {
            targets = partial_run(targets, perf.partial_run_percentage);
            info!(
                "Partial run: processing {} target files ({}%)",
                targets.len(),
                perf.partial_run_percentage
            );
        }

        self.state = RunState::BatchProcessing;
        self.monitor.start_phase(PHASE_SEARCH);
        let slots = self.process_batches(&targets, &candidates, &mut checkpoint, &base);
        self.monitor.end_phase(PHASE_SEARCH);

        self.state = RunState::Finalizing;
        self.monitor.start_phase(PHASE_FINALIZE);
        let mut results = IndexResults::new();
        for file in slots.into_iter().flatten() {
            results.add_file_references(file);
        }

        checkpoint.elapsed_seconds = self.monitor.elapsed().as_secs_f64();
        checkpoint.completed = checkpoint.processed_files.len() >= checkpoint.total_files;
        if perf.create_checkpoint {
            save_quietly(&mut checkpoint, &self.config.checkpoint_file());
        }
        if perf.persistent_cache {
            self.save_cache();
        }
        self.monitor.end_phase(PHASE_FINALIZE);
        self.state = RunState::Done;

        info!(
            "Found {} references to {} of {} target files",
            results.total_references, results.targets_with_references, results.targets_searched
        );

        Ok(RunOutput {
            results,
            targets_total,
            resumed_from_checkpoint: resumed,
            scan_stats: scan.stats,
            search_stats: self.processor.stats(),
            exclusion_stats: self.exclusion.stats(),
            cache_entries: self.cache.len(),
            summary: self.monitor.summary(),
        })
    }

    /// Searches `targets` in batches, returning one slot per target in target order.
    /// A slot stays empty when its search failed.
    fn process_batches(
        &self,
        targets: &[TargetFile],
        candidates: &[PathBuf],
        checkpoint: &mut Checkpoint,
        base: &Path,
    ) -> Vec<Option<FileReferences>> {
        let perf = &self.config.performance;
        let mut slots: Vec<Option<FileReferences>> = vec![None; targets.len()];
        if targets.is_empty() {
            info!("No target files to process");
            return slots;
        }

        let batch_size = perf
            .batch_size
            .filter(|&size| size > 0)
            .unwrap_or_else(|| batch_size_for(targets.len()));
        let batch_count = targets.len().div_ceil(batch_size);
        let progress = self.progress_bar(targets.len() as u64);
        info!(
            "Searching references for {} target files in {} batches of {}",
            targets.len(),
            batch_count,
            batch_size
        );

        let mut done = 0;
        for (batch_index, batch) in targets.chunks(batch_size).enumerate() {
            let offset = batch_index * batch_size;
            let started = Instant::now();

            let outcomes: Vec<(usize, SearchResult<Vec<ReferenceMatch>>)> = self.pool.install(|| {
                batch
                    .par_iter()
                    .enumerate()
                    .map(|(i, target)| (offset + i, self.find_references(&target.path, candidates)))
                    .collect()
            });

            let mut batch_references = 0;
            for (index, outcome) in outcomes {
                let target = &targets[index];
                match outcome {
                    Ok(references) => {
                        batch_references += references.len();
                        checkpoint.mark_processed(&target.path, references.len());
                        slots[index] = Some(FileReferences::new(
                            relative_display(base, &target.path),
                            references,
                        ));
                    }
                    Err(e) => warn!(
                        "Failed to search for references to {}: {}",
                        target.path.display(),
                        e
                    ),
                }
                progress.inc(1);
            }

            done += batch.len();
            let elapsed = started.elapsed();
            let rate = batch.len() as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
            info!(
                "Batch {}/{}: {} files, {} references in {} ({:.1} files/s)",
                batch_index + 1,
                batch_count,
                batch.len(),
                batch_references,
                humantime::format_duration(std::time::Duration::from_millis(
                    elapsed.as_millis() as u64
                )),
                rate
            );
            if let Some(remaining) =
                self.monitor
                    .estimated_remaining(PHASE_SEARCH, done, targets.len())
            {
                debug!(
                    "Estimated time remaining: {}",
                    humantime::format_duration(std::time::Duration::from_secs(remaining.as_secs()))
                );
            }

            checkpoint.elapsed_seconds = self.monitor.elapsed().as_secs_f64();
            if perf.create_checkpoint {
                save_quietly(checkpoint, &self.config.checkpoint_file());
            }
            if perf.persistent_cache {
                self.save_cache();
            }
        }

        progress.finish_and_clear();
        slots
    }

    /// References to one target across all candidates
    fn find_references(
        &self,
        target: &Path,
        candidates: &[PathBuf],
    ) -> SearchResult<Vec<ReferenceMatch>> {
        let terms = self.terms.terms_for(target);
        let matcher =
            TermMatcher::with_threshold(terms, self.config.reference_finding.automaton_threshold)?;

        if let Backend::Ripgrep(rg) = &self.backend {
            match rg.search(target, &matcher, candidates) {
                Ok(references) => return Ok(references),
                Err(e) => warn!(
                    "External search failed for {}, using the built-in search: {}",
                    target.display(),
                    e
                ),
            }
        }

        Ok(self.processor.search(target, &matcher, candidates))
    }

    /// Searches the first `sample_size` targets and moves them to the front ordered by
    /// descending reference count. Ties and unsampled targets keep scan order.
    fn prioritize(
        &self,
        mut targets: Vec<TargetFile>,
        candidates: &[PathBuf],
        sample_size: usize,
    ) -> Vec<TargetFile> {
        let sample_size = sample_size.min(targets.len());
        let rest = targets.split_off(sample_size);

        let counts: Vec<usize> = self.pool.install(|| {
            targets
                .par_iter()
                .map(|t| {
                    self.find_references(&t.path, candidates)
                        .map(|r| r.len())
                        .unwrap_or(0)
                })
                .collect()
        });

        let mut ranked: Vec<(usize, TargetFile)> = counts.into_iter().zip(targets).collect();
        ranked.sort_by_key(|(count, _)| Reverse(*count));
        info!(
            "Prioritized {} sampled targets by reference count",
            ranked.len()
        );

        ranked
            .into_iter()
            .map(|(_, target)| target)
            .chain(rest)
            .collect()
    }

    fn save_cache(&self) {
        let path = self.config.cache_file();
        if let Err(e) = self.cache.save_to(&path) {
            warn!("Failed to save content cache to {}: {}", path.display(), e);
        }
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.config.performance.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(len);
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} targets ({eta})")
        {
            progress.set_style(style.progress_chars("=>-"));
        }
        progress
    }
}

/// Validates `config` and runs a single indexing pass
pub fn run(config: IndexConfig) -> SearchResult<RunOutput> {
    ReferenceIndexer::new(config)?.run()
}

/// `min(max(1, configured), 16, available parallelism)`
pub fn worker_limit(configured: Option<usize>) -> usize {
    let available = num_cpus::get().max(1);
    configured
        .unwrap_or(available)
        .max(1)
        .min(MAX_WORKERS)
        .min(available)
}

/// A tenth of the targets per batch, between 1 and 10
pub fn batch_size_for(targets: usize) -> usize {
    (targets / 10).clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}

/// Picks `count` targets pseudo-randomly but reproducibly, returned in their original order
pub fn quick_test_sample(targets: Vec<TargetFile>, count: usize, seed: u64) -> Vec<TargetFile> {
    if targets.len() <= count {
        return targets;
    }

    let mut keyed: Vec<([u8; 8], usize)> = targets
        .iter()
        .enumerate()
        .map(|(index, target)| (sample_key(seed, &target.path), index))
        .collect();
    keyed.sort_unstable();

    let mut picked: Vec<usize> = keyed.into_iter().take(count).map(|(_, i)| i).collect();
    picked.sort_unstable();

    let mut slots: Vec<Option<TargetFile>> = targets.into_iter().map(Some).collect();
    picked
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}

/// Digest prefix of the seed and path, identical across platforms and toolchains
fn sample_key(seed: u64, path: &Path) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; 8];
    key.copy_from_slice(&digest[..8]);
    key
}

/// Keeps the first `max(1, floor(n * percentage / 100))` targets
pub fn partial_run(mut targets: Vec<TargetFile>, percentage: f64) -> Vec<TargetFile> {
    if targets.is_empty() {
        return targets;
    }
    let keep = ((targets.len() as f64 * percentage / 100.0).floor() as usize).max(1);
    targets.truncate(keep);
    targets
}
