//! Interactive-prompt heuristics
//!
//! Looks only at the last, unterminated line of a session's output: a REPL or
//! a confirmation question prints its prompt without a trailing newline and
//! then blocks on stdin.

use regex::{Regex, RegexSet};

const BUILTIN_PATTERNS: &[&str] = &[
    r"^>>>\s?$",                             // python
    r"^\.\.\.\s?$",                          // python continuation
    r"^In \[\d+\]:\s?$",                     // ipython
    r"^>\s?$",                               // node, generic
    r"^(?:mysql|sqlite|MariaDB \[[^\]]*\])>\s?$",
    r"^[\w\-]+[=\-]#\s?$",                   // psql
    r"^irb\([^)]*\):\d+:\d+[>*]\s?$",
    r"(?i)\bpassword[^:\n]*:\s*$",
    r"(?i)\bpassphrase[^:\n]*:\s*$",
    r"(?i)\[y/n\]\s*:?\s*$",
    r"(?i)\(y(?:es)?/n(?:o)?\)\s*[:?]?\s*$",
    r"(?i)\bcontinue\?\s*$",
];

/// Compiled prompt patterns
#[derive(Debug, Clone)]
pub struct PromptDetector {
    patterns: RegexSet,
    ansi: Regex,
}

impl PromptDetector {
    /// Builtin patterns plus `extra` user patterns.
    pub fn new(extra: &[String]) -> Result<Self, regex::Error> {
        let patterns = RegexSet::new(
            BUILTIN_PATTERNS
                .iter()
                .copied()
                .chain(extra.iter().map(String::as_str)),
        )?;
        let ansi = Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]")?;
        Ok(Self { patterns, ansi })
    }

    /// True when the output currently ends in something waiting for input.
    pub fn is_prompt(&self, output: &str) -> bool {
        let tail = output.rsplit('\n').next().unwrap_or_default();
        let tail = self.ansi.replace_all(tail, "");
        let tail = tail.trim_end_matches('\r');

        if tail.trim().is_empty() {
            return false;
        }

        self.patterns.is_match(tail)
    }
}
