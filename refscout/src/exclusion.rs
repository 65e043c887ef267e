//! Phase-scoped path exclusion.
//!
//! Every place the indexer touches the filesystem asks the [`ExclusionEngine`] first, naming the
//! [`Phase`] it is in. A rule registered for [`Phase::All`] applies everywhere; any other regex or
//! glob rule only applies in its own phase. Rules come in three kinds:
//!
//! - **literal**: a path relative to the project base; it excludes itself and everything below it
//!   in every phase, whichever phase it was registered for
//! - **glob**: matched against the base-relative path (and the file name for simple globs)
//! - **regex**: searched in the base-relative path
//!
//! Decisions are memoized per `(phase, path)` for the lifetime of the engine unless caching is
//! turned off.
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::config::ExclusionSettings;
use crate::errors::{unify_path, SearchError, SearchResult};

/// Stage of a run at which an exclusion check is made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    All,
    ScanRoot,
    ScanDir,
    ScanFile,
    #[serde(alias = "reference_search_target")]
    SearchTarget,
    #[serde(alias = "reference_search_content")]
    SearchContent,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::All => "all",
            Phase::ScanRoot => "scan_root",
            Phase::ScanDir => "scan_dir",
            Phase::ScanFile => "scan_file",
            Phase::SearchTarget => "search_target",
            Phase::SearchContent => "search_content",
        }
    }

    /// Whether a rule registered for `self` is consulted during `phase`
    pub fn applies_to(self, phase: Phase) -> bool {
        self == Phase::All || self == phase
    }
}

impl FromStr for Phase {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Phase::All),
            "scan_root" => Ok(Phase::ScanRoot),
            "scan_dir" => Ok(Phase::ScanDir),
            "scan_file" => Ok(Phase::ScanFile),
            "search_target" | "reference_search_target" => Ok(Phase::SearchTarget),
            "search_content" | "reference_search_content" => Ok(Phase::SearchContent),
            other => Err(SearchError::config_error(format!(
                "Unknown exclusion phase: {}",
                other
            ))),
        }
    }
}

/// How an exclusion pattern is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Decide from the pattern's characters
    #[default]
    Auto,
    Literal,
    Glob,
    Regex,
}

impl RuleKind {
    /// Classifies a pattern: glob metacharacters win, then regex metacharacters,
    /// otherwise the pattern is a literal path. Never returns [`RuleKind::Auto`].
    pub fn classify(pattern: &str) -> RuleKind {
        if pattern.contains(['*', '?', '[', ']']) {
            RuleKind::Glob
        } else if pattern.contains(['.', '^', '$', '(', ')', '\\', '+', '{', '}']) {
            RuleKind::Regex
        } else {
            RuleKind::Literal
        }
    }
}

#[derive(Debug)]
enum CompiledRule {
    /// Absolute, unified path
    Literal(PathBuf),
    Regex(Regex),
    /// `**` globs, translated to an anchored regex
    DeepGlob(Regex),
    Glob(glob::Pattern),
}

#[derive(Debug)]
struct ExclusionRule {
    pattern: String,
    phase: Phase,
    compiled: CompiledRule,
}

/// Snapshot of the engine's rule counts and decision cache
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExclusionStats {
    pub literal_rules: usize,
    pub regex_rules: usize,
    pub glob_rules: usize,
    pub cache_enabled: bool,
    pub cache_size: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Compiled exclusion rules plus a concurrent decision cache
#[derive(Debug)]
pub struct ExclusionEngine {
    base: PathBuf,
    literals: Vec<ExclusionRule>,
    regexes: Vec<ExclusionRule>,
    globs: Vec<ExclusionRule>,
    cache_enabled: bool,
    decisions: DashMap<(Phase, PathBuf), bool>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ExclusionEngine {
    pub fn new(base: &Path, cache_enabled: bool) -> Self {
        Self {
            base: unify_path(base),
            literals: Vec::new(),
            regexes: Vec::new(),
            globs: Vec::new(),
            cache_enabled,
            decisions: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Builds an engine from configuration. Invalid patterns and unknown phases are
    /// logged and skipped.
    pub fn from_settings(base: &Path, settings: &ExclusionSettings) -> Self {
        let mut engine = Self::new(base, settings.cache_exclusions);

        for spec in &settings.global {
            if let Err(e) = engine.add_pattern(spec.pattern(), Phase::All, spec.kind()) {
                warn!("Skipping exclusion pattern: {}", e);
            }
        }

        for (phase_name, specs) in &settings.phase_specific {
            let phase = match phase_name.parse::<Phase>() {
                Ok(phase) => phase,
                Err(e) => {
                    warn!("Skipping {} exclusion pattern(s): {}", specs.len(), e);
                    continue;
                }
            };
            for spec in specs {
                if let Err(e) = engine.add_pattern(spec.pattern(), phase, spec.kind()) {
                    warn!("Skipping exclusion pattern: {}", e);
                }
            }
        }

        debug!(
            "Exclusion rules compiled: {} literal, {} regex, {} glob",
            engine.literals.len(),
            engine.regexes.len(),
            engine.globs.len()
        );
        engine
    }

    /// Compiles and registers a single pattern
    pub fn add_pattern(&mut self, pattern: &str, phase: Phase, kind: RuleKind) -> SearchResult<()> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(SearchError::invalid_pattern("empty exclusion pattern"));
        }

        // A bare directory name this common is meant to match at any depth
        let (effective, kind) = if pattern == "node_modules" && kind == RuleKind::Auto {
            ("**/node_modules/**".to_string(), RuleKind::Glob)
        } else {
            let kind = match kind {
                RuleKind::Auto => RuleKind::classify(pattern),
                explicit => explicit,
            };
            (pattern.to_string(), kind)
        };

        let compiled = match kind {
            RuleKind::Literal | RuleKind::Auto => {
                CompiledRule::Literal(unify_path(&self.base.join(&effective)))
            }
            RuleKind::Regex => CompiledRule::Regex(Regex::new(&effective).map_err(|e| {
                SearchError::invalid_pattern(format!("{}: {}", effective, e))
            })?),
            RuleKind::Glob if effective.contains("**") => {
                match Regex::new(&glob_to_regex(&effective)) {
                    Ok(re) => CompiledRule::DeepGlob(re),
                    Err(e) => {
                        debug!("Falling back to plain glob for {}: {}", effective, e);
                        CompiledRule::Glob(compile_glob(&effective)?)
                    }
                }
            }
            RuleKind::Glob => CompiledRule::Glob(compile_glob(&effective)?),
        };

        // Literal paths are excluded in every phase; the phase only scopes regex and glob rules
        let (bucket, phase) = match &compiled {
            CompiledRule::Literal(_) => (&mut self.literals, Phase::All),
            CompiledRule::Regex(_) => (&mut self.regexes, phase),
            CompiledRule::DeepGlob(_) | CompiledRule::Glob(_) => (&mut self.globs, phase),
        };
        bucket.push(ExclusionRule {
            pattern: effective,
            phase,
            compiled,
        });
        self.decisions.clear();
        Ok(())
    }

    /// Returns whether `path` is excluded during `phase`, consulting the decision cache
    pub fn is_excluded(&self, path: &Path, phase: Phase) -> bool {
        if !self.cache_enabled {
            return self.evaluate(path, phase);
        }

        let key = (phase, path.to_path_buf());
        if let Some(hit) = self.decisions.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return *hit;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let excluded = self.evaluate(path, phase);
        self.decisions.insert(key, excluded);
        excluded
    }

    /// Evaluates the rules for `path` without touching the decision cache
    pub fn evaluate(&self, path: &Path, phase: Phase) -> bool {
        for rule in &self.literals {
            if let CompiledRule::Literal(root) = &rule.compiled {
                if path == root || path.starts_with(root) {
                    return true;
                }
            }
        }

        // Paths outside the project base are only subject to literal rules
        let Some(relative) = relative_slash_path(&self.base, path) else {
            return false;
        };

        for rule in self.regexes.iter().filter(|r| r.phase.applies_to(phase)) {
            if let CompiledRule::Regex(re) = &rule.compiled {
                if re.is_match(&relative) {
                    return true;
                }
            }
        }

        let file_name = path.file_name().map(|n| n.to_string_lossy());
        for rule in self.globs.iter().filter(|r| r.phase.applies_to(phase)) {
            let matched = match &rule.compiled {
                CompiledRule::DeepGlob(re) => re.is_match(&relative),
                CompiledRule::Glob(pattern) => {
                    pattern.matches(&relative)
                        || file_name.as_deref().is_some_and(|n| pattern.matches(n))
                }
                _ => false,
            };
            if matched {
                return true;
            }
        }

        false
    }

    pub fn clear_cache(&self) {
        self.decisions.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ExclusionStats {
        ExclusionStats {
            literal_rules: self.literals.len(),
            regex_rules: self.regexes.len(),
            glob_rules: self.globs.len(),
            cache_enabled: self.cache_enabled,
            cache_size: self.decisions.len(),
            cache_hits: self.hits.load(Ordering::Relaxed),
            cache_misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Patterns registered for `phase` (including `All`), in registration order per kind
    pub fn patterns_for(&self, phase: Phase) -> Vec<&str> {
        self.literals
            .iter()
            .chain(&self.regexes)
            .chain(&self.globs)
            .filter(|r| r.phase.applies_to(phase))
            .map(|r| r.pattern.as_str())
            .collect()
    }
}

fn compile_glob(pattern: &str) -> SearchResult<glob::Pattern> {
    glob::Pattern::new(pattern)
        .map_err(|e| SearchError::invalid_pattern(format!("{}: {}", pattern, e)))
}

/// `path` relative to `base`, joined with `/` regardless of platform
fn relative_slash_path(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

/// Translates a glob containing `**` into an anchored regex.
///
/// `**/` matches zero or more leading directories, a trailing `/**` matches the directory
/// itself and everything below it, `*` and `?` never cross a `/`.
fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let after_sep = i == 0 || chars[i - 1] == '/';
                if after_sep && chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else if i > 0 && chars[i - 1] == '/' && i + 2 == chars.len() {
                    out.pop();
                    out.push_str("(?:/.*)?");
                    i += 2;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => match chars[i + 1..].iter().position(|&c| c == ']') {
                Some(offset) if offset > 0 => {
                    let class = &chars[i + 1..i + 1 + offset];
                    out.push('[');
                    for (n, &c) in class.iter().enumerate() {
                        match c {
                            '!' if n == 0 => out.push('^'),
                            '\\' | '[' => {
                                out.push('\\');
                                out.push(c);
                            }
                            _ => out.push(c),
                        }
                    }
                    out.push(']');
                    i += offset + 2;
                }
                _ => {
                    out.push_str(r"\[");
                    i += 1;
                }
            },
            c => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
                i += 1;
            }
        }
    }

    out.push('$');
    out
}
