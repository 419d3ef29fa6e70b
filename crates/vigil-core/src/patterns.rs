//! Multi-pattern substring matching for log-line filtering.
//!
//! A [`PatternSet`] is compiled once at agent startup from a word list (one
//! pattern per line, blanks skipped) and queried for every candidate line.
//! Matching is literal: the shipped default list is lowercase and host log
//! lines often are not, so operators supplying their own list should include
//! the casings they expect to see.

use std::path::Path;

use aho_corasick::AhoCorasick;
use thiserror::Error;
use tracing::warn;

/// Patterns used when no pattern file is available.
pub const DEFAULT_PATTERNS: [&str; 10] = [
    "unauthorized access",
    "failed login",
    "invalid user",
    "segfault",
    "buffer overflow",
    "connection refused",
    "access denied",
    "root access",
    "port scan",
    "malware detected",
];

/// Errors raised while compiling a pattern set.
#[derive(Debug, Error)]
pub enum PatternError {
    /// No non-blank pattern was supplied.
    #[error("pattern list is empty")]
    Empty,

    /// The automaton could not be built from the supplied patterns.
    #[error("failed to compile pattern automaton: {0}")]
    Build(String),
}

/// An immutable set of substring patterns compiled into one automaton.
pub struct PatternSet {
    automaton: AhoCorasick,
    len: usize,
}

impl PatternSet {
    /// Compiles a pattern set from raw lines, skipping blank ones.
    pub fn from_lines<I, S>(lines: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = lines
            .into_iter()
            .map(|line| line.as_ref().to_string())
            .filter(|line| !line.trim().is_empty())
            .collect();

        if patterns.is_empty() {
            return Err(PatternError::Empty);
        }

        let automaton = AhoCorasick::new(&patterns)
            .map_err(|err| PatternError::Build(err.to_string()))?;

        Ok(Self {
            automaton,
            len: patterns.len(),
        })
    }

    /// Loads a pattern file, falling back to [`DEFAULT_PATTERNS`] when the
    /// file is missing, unreadable, or contains no usable pattern.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_lines(contents.lines()).unwrap_or_else(|_| {
                warn!(path = %path.display(), "pattern file has no usable patterns, using defaults");
                Self::default()
            }),
            Err(err) => {
                warn!(path = %path.display(), %err, "pattern file not readable, using defaults");
                Self::default()
            }
        }
    }

    /// Whether any pattern occurs as a substring of `line`.
    #[must_use]
    pub fn scan(&self, line: &str) -> bool {
        self.automaton.is_match(line)
    }

    /// Number of compiled patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the set is empty. Always `false` for a compiled set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for PatternSet {
    /// The built-in default set.
    fn default() -> Self {
        Self::from_lines(DEFAULT_PATTERNS).expect("default pattern list compiles")
    }
}
