use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

#[derive(Debug)]
struct PhaseTiming {
    name: String,
    started: Instant,
    ended: Option<Instant>,
}

impl PhaseTiming {
    fn duration(&self) -> Duration {
        match self.ended {
            Some(ended) => ended.duration_since(self.started),
            None => self.started.elapsed(),
        }
    }
}

/// Tracks wall-clock time per run phase and per-file processing times
#[derive(Debug)]
pub struct PerformanceMonitor {
    started: Instant,
    phases: Mutex<Vec<PhaseTiming>>,

    files_processed: AtomicU64,
    file_total_nanos: AtomicU64,
    file_min_nanos: AtomicU64,
    file_max_nanos: AtomicU64,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            phases: Mutex::new(Vec::new()),
            files_processed: AtomicU64::new(0),
            file_total_nanos: AtomicU64::new(0),
            file_min_nanos: AtomicU64::new(u64::MAX),
            file_max_nanos: AtomicU64::new(0),
        }
    }

    fn phases(&self) -> MutexGuard<'_, Vec<PhaseTiming>> {
        self.phases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts timing `name`. Starting a phase again restarts it.
    pub fn start_phase(&self, name: &str) {
        let mut phases = self.phases();
        let timing = PhaseTiming {
            name: name.to_string(),
            started: Instant::now(),
            ended: None,
        };
        match phases.iter_mut().find(|p| p.name == name) {
            Some(existing) => *existing = timing,
            None => phases.push(timing),
        }
        debug!("Phase started: {}", name);
    }

    /// Stops timing `name` and returns its duration.
    ///
    /// Ending a phase twice returns the first measurement. Ending a phase that was
    /// never started logs a warning and returns zero.
    pub fn end_phase(&self, name: &str) -> Duration {
        let mut phases = self.phases();
        let Some(phase) = phases.iter_mut().find(|p| p.name == name) else {
            warn!("Tried to end phase '{}' which was never started", name);
            return Duration::ZERO;
        };
        if phase.ended.is_none() {
            phase.ended = Some(Instant::now());
            debug!(
                "Phase finished: {} in {}",
                name,
                humantime::format_duration(round_millis(phase.duration()))
            );
        }
        phase.duration()
    }

    /// Duration of `name` so far, or zero if it never started
    pub fn phase_duration(&self, name: &str) -> Duration {
        self.phases()
            .iter()
            .find(|p| p.name == name)
            .map(PhaseTiming::duration)
            .unwrap_or(Duration::ZERO)
    }

    /// Records how long one candidate file took to search
    pub fn record_file_processing(&self, path: &Path, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.files_processed.fetch_add(1, Ordering::Relaxed);
        self.file_total_nanos.fetch_add(nanos, Ordering::Relaxed);

        let mut min = self.file_min_nanos.load(Ordering::Relaxed);
        while nanos < min {
            match self.file_min_nanos.compare_exchange_weak(
                min,
                nanos,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => min = current,
            }
        }

        let mut max = self.file_max_nanos.load(Ordering::Relaxed);
        while nanos > max {
            match self.file_max_nanos.compare_exchange_weak(
                max,
                nanos,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => max = current,
            }
        }
        trace!("Processed {} in {:?}", path.display(), elapsed);
    }

    pub fn files_processed(&self) -> u64 {
        self.files_processed.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Remaining time extrapolated from the rate of `phase` so far. `None` until the phase
    /// has started and made progress.
    pub fn estimated_remaining(&self, phase: &str, done: usize, total: usize) -> Option<Duration> {
        if done == 0 || done > total {
            return None;
        }
        let elapsed = self
            .phases()
            .iter()
            .find(|p| p.name == phase)
            .map(PhaseTiming::duration)?;
        let per_item = elapsed.as_secs_f64() / done as f64;
        Some(Duration::from_secs_f64(per_item * (total - done) as f64))
    }

    pub fn summary(&self) -> PerformanceSummary {
        let total = self.elapsed();
        let total_secs = total.as_secs_f64();

        let phases = self
            .phases()
            .iter()
            .map(|p| {
                let secs = p.duration().as_secs_f64();
                PhaseSummary {
                    name: p.name.clone(),
                    duration_seconds: secs,
                    percentage: if total_secs > 0.0 {
                        secs / total_secs * 100.0
                    } else {
                        0.0
                    },
                }
            })
            .collect();

        let count = self.files_processed();
        let total_nanos = self.file_total_nanos.load(Ordering::Relaxed);
        let file_processing = if count == 0 {
            FileProcessingSummary::default()
        } else {
            FileProcessingSummary {
                count,
                total_seconds: nanos_to_secs(total_nanos),
                avg_seconds: nanos_to_secs(total_nanos) / count as f64,
                min_seconds: nanos_to_secs(self.file_min_nanos.load(Ordering::Relaxed)),
                max_seconds: nanos_to_secs(self.file_max_nanos.load(Ordering::Relaxed)),
            }
        };

        PerformanceSummary {
            total_seconds: total_secs,
            phases,
            file_processing,
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn nanos_to_secs(nanos: u64) -> f64 {
    nanos as f64 / 1_000_000_000.0
}

fn round_millis(d: Duration) -> Duration {
    Duration::from_millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub name: String,
    pub duration_seconds: f64,
    /// Share of the total run time
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileProcessingSummary {
    pub count: u64,
    pub total_seconds: f64,
    pub avg_seconds: f64,
    pub min_seconds: f64,
    pub max_seconds: f64,
}

/// Timing report for a finished run
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub total_seconds: f64,
    pub phases: Vec<PhaseSummary>,
    pub file_processing: FileProcessingSummary,
}

impl fmt::Display for PerformanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let human = |secs: f64| humantime::format_duration(round_millis(Duration::from_secs_f64(secs)));

        writeln!(f, "Total time: {}", human(self.total_seconds))?;
        for phase in &self.phases {
            writeln!(
                f,
                "  {:<24} {:>10} ({:.1}%)",
                phase.name,
                human(phase.duration_seconds).to_string(),
                phase.percentage
            )?;
        }
        let files = &self.file_processing;
        if files.count > 0 {
            writeln!(
                f,
                "Files searched: {} (avg {:.2}ms, min {:.2}ms, max {:.2}ms)",
                files.count,
                files.avg_seconds * 1000.0,
                files.min_seconds * 1000.0,
                files.max_seconds * 1000.0
            )?;
        }
        Ok(())
    }
}
