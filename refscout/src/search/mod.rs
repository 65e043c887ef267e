//! Reference search: finding which candidate files mention a target.
//!
//! The pieces, from the outside in:
//!
//! - [`CandidateSelector`] builds the list of files to search once per run.
//! - [`TermMatcher`] holds a target's search terms and finds the lines that mention any of
//!   them. A few terms are matched one pattern at a time; many terms share one Aho-Corasick
//!   automaton. Both strategies return the same hits.
//! - [`FileProcessor`] loads candidate contents (through the shared content cache), skips
//!   binary and oversized files, enforces the per-file deadline and turns hits into
//!   [`ReferenceMatch`](crate::results::ReferenceMatch) records.
//! - [`RipgrepSearcher`] optionally delegates the scan to an external `rg`. Any failure
//!   falls back to the in-process path for that target.
//!
//! ```rust,ignore
//! let matcher = TermMatcher::new(terms.terms_for(&target))?;
//! let references = processor.search(&target, &matcher, &candidates);
//! ```
pub mod candidates;
pub mod matcher;
pub mod processor;
pub mod ripgrep;

pub use candidates::CandidateSelector;
pub use matcher::{Deadline, StrategyKind, TermMatcher, AUTOMATON_THRESHOLD};
pub use processor::{FileProcessor, SearchStats};
pub use ripgrep::RipgrepSearcher;
