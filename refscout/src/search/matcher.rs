use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::{SearchError, SearchResult};

/// Term counts above this use a single automaton over the whole file
pub const AUTOMATON_THRESHOLD: usize = 3;

/// Matches between deadline checks in the automaton scan
const DEADLINE_CHECK_INTERVAL: usize = 256;

/// Which matching strategy a [`TermMatcher`] uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Automaton,
    Literal,
}

#[derive(Debug, Clone)]
enum MatchStrategy {
    Automaton(Arc<AhoCorasick>),
    /// One pattern per term, searched in the ASCII-lowercased line
    Literal(Vec<Arc<Regex>>),
}

/// Cooperative time limit for matching a single file
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn new(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit: Some(limit),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            limit: None,
        }
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }

    pub fn expired(&self) -> bool {
        self.limit
            .is_some_and(|limit| self.started.elapsed() >= limit)
    }
}

/// Returned when a [`Deadline`] passes mid-scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineExpired;

/// First reference found on a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineHit {
    /// 1-based
    pub line_number: usize,
    /// Index into [`TermMatcher::terms`]
    pub term_index: usize,
}

/// Finds the lines of a file that mention any of a set of terms.
///
/// Matching is an ASCII case-insensitive substring search. Each line yields at most one hit:
/// the term whose occurrence starts leftmost, with ties going to the term that sorts first.
/// Both strategies implement exactly this rule, so switching between them by term count never
/// changes results.
#[derive(Debug, Clone)]
pub struct TermMatcher {
    terms: Vec<String>,
    strategy: MatchStrategy,
}

impl TermMatcher {
    pub fn new(terms: Vec<String>) -> SearchResult<Self> {
        Self::with_threshold(terms, AUTOMATON_THRESHOLD)
    }

    /// Picks the automaton when there are more than `threshold` terms
    pub fn with_threshold(terms: Vec<String>, threshold: usize) -> SearchResult<Self> {
        let terms = normalize_terms(terms);
        let kind = if terms.len() > threshold {
            StrategyKind::Automaton
        } else {
            StrategyKind::Literal
        };
        Self::build(terms, kind)
    }

    pub fn with_strategy(terms: Vec<String>, kind: StrategyKind) -> SearchResult<Self> {
        Self::build(normalize_terms(terms), kind)
    }

    fn build(terms: Vec<String>, kind: StrategyKind) -> SearchResult<Self> {
        let strategy = match kind {
            StrategyKind::Automaton => {
                let automaton = AhoCorasickBuilder::new()
                    .ascii_case_insensitive(true)
                    .match_kind(MatchKind::LeftmostFirst)
                    .build(&terms)
                    .map_err(|e| SearchError::invalid_pattern(e.to_string()))?;
                MatchStrategy::Automaton(Arc::new(automaton))
            }
            StrategyKind::Literal => MatchStrategy::Literal(
                terms
                    .iter()
                    .map(|t| literal_pattern(t))
                    .collect::<SearchResult<_>>()?,
            ),
        };
        Ok(Self { terms, strategy })
    }

    pub fn kind(&self) -> StrategyKind {
        match self.strategy {
            MatchStrategy::Automaton(_) => StrategyKind::Automaton,
            MatchStrategy::Literal(_) => StrategyKind::Literal,
        }
    }

    /// Sorted, de-duplicated terms
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn term(&self, index: usize) -> Option<&str> {
        self.terms.get(index).map(String::as_str)
    }

    /// Index of the term referenced on `line`, if any
    pub fn find_in_line(&self, line: &str) -> Option<usize> {
        match &self.strategy {
            MatchStrategy::Automaton(ac) => ac.find(line).map(|m| m.pattern().as_usize()),
            MatchStrategy::Literal(patterns) => leftmost_literal(patterns, line),
        }
    }

    /// One hit per matching line, in line order
    pub fn find_lines(
        &self,
        lines: &[String],
        deadline: &Deadline,
    ) -> Result<Vec<LineHit>, DeadlineExpired> {
        if deadline.expired() {
            return Err(DeadlineExpired);
        }
        if self.terms.is_empty() {
            return Ok(Vec::new());
        }

        match &self.strategy {
            MatchStrategy::Automaton(ac) => scan_joined(ac, lines, deadline),
            MatchStrategy::Literal(patterns) => {
                let mut hits = Vec::new();
                for (index, line) in lines.iter().enumerate() {
                    if deadline.expired() {
                        return Err(DeadlineExpired);
                    }
                    if let Some(term_index) = leftmost_literal(patterns, line) {
                        hits.push(LineHit {
                            line_number: index + 1,
                            term_index,
                        });
                    }
                }
                Ok(hits)
            }
        }
    }
}

/// Terms are sorted so tie-breaking is stable. Empty terms and terms spanning lines
/// can never match a single line and are dropped.
fn normalize_terms(terms: Vec<String>) -> Vec<String> {
    let mut terms: Vec<String> = terms
        .into_iter()
        .filter(|t| !t.is_empty() && !t.contains('\n'))
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

fn literal_pattern(term: &str) -> SearchResult<Arc<Regex>> {
    Regex::new(&regex::escape(&term.to_ascii_lowercase()))
        .map(Arc::new)
        .map_err(|e| SearchError::invalid_pattern(format!("{}: {}", term, e)))
}

fn leftmost_literal(patterns: &[Arc<Regex>], line: &str) -> Option<usize> {
    let lowered = line.to_ascii_lowercase();
    let mut best: Option<(usize, usize)> = None;
    for (term_index, pattern) in patterns.iter().enumerate() {
        if let Some(m) = pattern.find(&lowered) {
            if best.map_or(true, |(start, _)| m.start() < start) {
                best = Some((m.start(), term_index));
            }
        }
    }
    best.map(|(_, term_index)| term_index)
}

/// Runs the automaton once over the newline-joined file, mapping match offsets back to lines
fn scan_joined(
    ac: &AhoCorasick,
    lines: &[String],
    deadline: &Deadline,
) -> Result<Vec<LineHit>, DeadlineExpired> {
    let mut line_starts = Vec::with_capacity(lines.len());
    let mut text = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        line_starts.push(text.len());
        text.push_str(line);
        text.push('\n');
    }

    let mut hits: Vec<LineHit> = Vec::new();
    for (n, m) in ac.find_iter(&text).enumerate() {
        if n % DEADLINE_CHECK_INTERVAL == 0 && n > 0 && deadline.expired() {
            return Err(DeadlineExpired);
        }
        let line_number = line_starts.partition_point(|&start| start <= m.start());
        if hits.last().is_some_and(|h| h.line_number == line_number) {
            continue;
        }
        hits.push(LineHit {
            line_number,
            term_index: m.pattern().as_usize(),
        });
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(String::from).collect()
    }

    #[test]
    fn test_strategy_selection_by_threshold() {
        let few = TermMatcher::new(terms(&["a", "b", "c"])).unwrap();
        assert_eq!(few.kind(), StrategyKind::Literal);

        let many = TermMatcher::new(terms(&["a", "b", "c", "d"])).unwrap();
        assert_eq!(many.kind(), StrategyKind::Automaton);
    }

    #[test]
    fn test_terms_are_sorted_and_cleaned() {
        let matcher =
            TermMatcher::new(terms(&["zeta", "", "alpha", "two\nlines", "alpha"])).unwrap();
        assert_eq!(matcher.terms(), &["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn test_case_insensitive_matching() {
        for kind in [StrategyKind::Literal, StrategyKind::Automaton] {
            let matcher = TermMatcher::with_strategy(terms(&["Config.PY"]), kind).unwrap();
            let hits = matcher
                .find_lines(&lines("import config.py\nnothing\nCONFIG.py here"), &Deadline::unbounded())
                .unwrap();
            assert_eq!(
                hits.iter().map(|h| h.line_number).collect::<Vec<_>>(),
                vec![1, 3],
                "{:?}",
                kind
            );
        }
    }

    #[test]
    fn test_leftmost_term_wins_per_line() {
        let list = terms(&["mod", "mod.ext", "pkg.mod"]);
        let text = lines("from pkg.mod import x\nuse mod.ext\nmod.ext and pkg.mod");
        for kind in [StrategyKind::Literal, StrategyKind::Automaton] {
            let matcher = TermMatcher::with_strategy(list.clone(), kind).unwrap();
            let found: Vec<(usize, &str)> = matcher
                .find_lines(&text, &Deadline::unbounded())
                .unwrap()
                .iter()
                .map(|h| (h.line_number, matcher.term(h.term_index).unwrap()))
                .collect();
            // "mod" sorts before "mod.ext" and starts at the same offset
            assert_eq!(
                found,
                vec![(1, "pkg.mod"), (2, "mod"), (3, "mod")],
                "{:?}",
                kind
            );
        }
    }

    #[test]
    fn test_strategies_agree() {
        let list = terms(&["alpha", "beta.py", "Gamma", "a.b.c", "ÄÖ"]);
        let text = lines(
            "nothing here\n\
             alpha and BETA.PY\n\
             x = gamma(alpha)\n\
             import a.b.c as abc\n\
             ÄÖ unicode\n\
             äö lowercase unicode does not match\n\
             beta.pyc\n",
        );
        let literal = TermMatcher::with_strategy(list.clone(), StrategyKind::Literal).unwrap();
        let automaton = TermMatcher::with_strategy(list, StrategyKind::Automaton).unwrap();

        let a = literal.find_lines(&text, &Deadline::unbounded()).unwrap();
        let b = automaton.find_lines(&text, &Deadline::unbounded()).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.iter().map(|h| h.line_number).collect::<Vec<_>>(),
            vec![2, 3, 4, 5, 7]
        );

        for line in &text {
            assert_eq!(literal.find_in_line(line), automaton.find_in_line(line));
        }
    }

    #[test]
    fn test_expired_deadline() {
        let matcher = TermMatcher::new(terms(&["x"])).unwrap();
        let deadline = Deadline::new(Duration::ZERO);
        assert!(deadline.expired());
        assert_eq!(
            matcher.find_lines(&lines("x\nx"), &deadline),
            Err(DeadlineExpired)
        );
        assert!(!Deadline::unbounded().expired());
    }

    #[test]
    fn test_no_terms_matches_nothing() {
        let matcher = TermMatcher::new(Vec::new()).unwrap();
        assert!(matcher
            .find_lines(&lines("anything"), &Deadline::unbounded())
            .unwrap()
            .is_empty());
        assert_eq!(matcher.find_in_line("anything"), None);
    }
}
