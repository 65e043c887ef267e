use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, trace};

use super::matcher::TermMatcher;
use super::processor::{DEFAULT_MAX_LINE_LENGTH, DEFAULT_MAX_SEARCH_FILE_SIZE};
use crate::errors::{SearchError, SearchResult};
use crate::filters::is_likely_binary;
use crate::results::{relative_display, ReferenceMatch};

/// Keeps command lines well under platform argument limits
const FILES_PER_INVOCATION: usize = 256;

/// Searches candidates by running `rg` over them.
///
/// `rg -i` folds case beyond ASCII, so every reported line is re-checked with the in-process
/// matcher. That both recovers the matched term and keeps results identical to an in-process
/// search.
#[derive(Debug, Clone)]
pub struct RipgrepSearcher {
    program: PathBuf,
    base: PathBuf,
    max_line_length: usize,
    max_file_size: u64,
}

impl RipgrepSearcher {
    /// Resolves `program` on the `PATH` (or as a path)
    pub fn locate(program: &str, base: impl Into<PathBuf>) -> SearchResult<Self> {
        let program = which::which(program)
            .map_err(|e| SearchError::external_tool(format!("{}: {}", program, e)))?;
        debug!("Using external search tool at {}", program.display());
        Ok(Self {
            program,
            base: base.into(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_file_size: DEFAULT_MAX_SEARCH_FILE_SIZE,
        })
    }

    pub fn with_max_line_length(mut self, chars: usize) -> Self {
        self.max_line_length = chars;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// References to `target` among `candidates`, in candidate then line order
    pub fn search(
        &self,
        target: &Path,
        matcher: &TermMatcher,
        candidates: &[PathBuf],
    ) -> SearchResult<Vec<ReferenceMatch>> {
        if matcher.terms().is_empty() {
            return Ok(Vec::new());
        }

        let files: Vec<&PathBuf> = candidates
            .iter()
            .filter(|c| c.as_path() != target && !is_likely_binary(c))
            .collect();

        let target_file = relative_display(&self.base, target);
        let mut found: Vec<(PathBuf, ReferenceMatch)> = Vec::new();

        for chunk in files.chunks(FILES_PER_INVOCATION) {
            let stdout = self.run(matcher, chunk)?;
            for raw in stdout.split(|&b| b == b'\n') {
                let Some((path, line_number, content)) = parse_line(raw) else {
                    continue;
                };
                let Some(term_index) = matcher.find_in_line(&content) else {
                    trace!("Dropping non-ASCII case-folded match in {}", path.display());
                    continue;
                };
                found.push((
                    path.clone(),
                    ReferenceMatch {
                        target_file: target_file.clone(),
                        found_in_file: relative_display(&self.base, &path),
                        line_number,
                        line_content: content
                            .trim()
                            .chars()
                            .take(self.max_line_length)
                            .collect(),
                        matched_term: matcher.term(term_index).unwrap_or_default().to_string(),
                    },
                ));
            }
        }

        found.sort_by(|(a, ma), (b, mb)| a.cmp(b).then(ma.line_number.cmp(&mb.line_number)));
        Ok(found.into_iter().map(|(_, m)| m).collect())
    }

    fn run(&self, matcher: &TermMatcher, files: &[&PathBuf]) -> SearchResult<Vec<u8>> {
        let mut command = Command::new(&self.program);
        command
            .args([
                "--no-config",
                "--fixed-strings",
                "--ignore-case",
                "--line-number",
                "--with-filename",
                "--no-heading",
                "--null",
                "--color",
                "never",
                "--no-messages",
                "--max-filesize",
            ])
            .arg(self.max_file_size.to_string());
        for term in matcher.terms() {
            command.arg("-e").arg(term);
        }
        command.arg("--").args(files);

        let output = command
            .output()
            .map_err(|e| SearchError::external_tool(format!("failed to run {}: {}", self.program.display(), e)))?;

        // Exit code 1 only means nothing matched
        match output.status.code() {
            Some(0) | Some(1) => Ok(output.stdout),
            code => Err(SearchError::external_tool(format!(
                "{} exited with {:?}: {}",
                self.program.display(),
                code,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

/// Parses `path\0line:content`
fn parse_line(raw: &[u8]) -> Option<(PathBuf, usize, String)> {
    let nul = raw.iter().position(|&b| b == 0)?;
    let (path, rest) = (&raw[..nul], &raw[nul + 1..]);
    let colon = rest.iter().position(|&b| b == b':')?;
    let line_number = std::str::from_utf8(&rest[..colon]).ok()?.parse().ok()?;
    let content = String::from_utf8_lossy(&rest[colon + 1..]).into_owned();
    Some((
        PathBuf::from(String::from_utf8_lossy(path).into_owned()),
        line_number,
        content,
    ))
}
