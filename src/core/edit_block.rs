//! Search/replace edit-block parsing
//!
//! Parses documents made of blocks shaped like:
//!
//! ```text
//! src/lib.rs
//! <<<<<<< SEARCH[:flags]
//! old text
//! =======
//! new text
//! >>>>>>> REPLACE
//! ```
//!
//! - A path line before a block sets the active file for it and every later
//!   block until another path line appears. A path line is a single token
//!   (backticks, quotes and `**` around it are stripped); lines with spaces or
//!   ending in sentence punctuation, like `Done.`, are prose and are ignored
//! - Flags: `g` global, `i` case-insensitive, `d` dry-run (combinable)
//! - Failures are per block: a malformed block is recorded and skipped,
//!   well-formed siblings still parse
//! - Markers are column-0 anchored, like git conflict markers

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use miette::{Diagnostic, SourceSpan};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

pub const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
pub const DIVIDER_MARKER: &str = "=======";
pub const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

/// Per-block matching flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditFlags {
    /// Replace every occurrence instead of the first
    pub global: bool,
    /// Match ignoring letter case
    pub case_insensitive: bool,
    /// Compute and report, never write
    pub dry_run: bool,
}

impl FromStr for EditFlags {
    /// The first unrecognized flag letter
    type Err = char;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = EditFlags::default();
        for c in s.chars().filter(|c| !c.is_whitespace()) {
            match c.to_ascii_lowercase() {
                'g' => flags.global = true,
                'i' => flags.case_insensitive = true,
                'd' => flags.dry_run = true,
                other => return Err(other),
            }
        }
        Ok(flags)
    }
}

impl fmt::Display for EditFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.global {
            f.write_str("g")?;
        }
        if self.case_insensitive {
            f.write_str("i")?;
        }
        if self.dry_run {
            f.write_str("d")?;
        }
        Ok(())
    }
}

/// One well-formed search/replace instruction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditOperation {
    /// Position of the block in the document (0-based, shared with malformed blocks)
    pub index: usize,
    /// 1-based line of the `<<<<<<< SEARCH` header
    pub line: usize,
    pub file_path: PathBuf,
    pub search_text: String,
    pub replace_text: String,
    pub flags: EditFlags,
}

/// Why a block was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MalformedKind {
    #[error("missing `=======` separator")]
    MissingSeparator,

    #[error("missing `>>>>>>> REPLACE` marker")]
    MissingReplaceMarker,

    #[error("nested SEARCH/REPLACE blocks are not supported")]
    NestedBlock,

    #[error("unknown flag `{flag}`")]
    UnknownFlag { flag: char },

    #[error("no file path precedes the block")]
    MissingPath,
}

impl MalformedKind {
    fn help(&self) -> String {
        match self {
            MalformedKind::MissingSeparator => {
                format!("put a `{DIVIDER_MARKER}` line between the search and replace text")
            }
            MalformedKind::MissingReplaceMarker => {
                format!("close the block with a `{REPLACE_MARKER}` line")
            }
            MalformedKind::NestedBlock => {
                "split the edit into sibling blocks; markers cannot appear inside a block".into()
            }
            MalformedKind::UnknownFlag { .. } => "supported flags are g, i and d".into(),
            MalformedKind::MissingPath => {
                "write the target file path on the line before the block".into()
            }
        }
    }
}

/// A block that failed to parse; recorded instead of aborting the document
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("malformed edit block #{index} at line {line}: {kind}")]
pub struct MalformedBlock {
    pub index: usize,
    pub line: usize,
    pub path: Option<PathBuf>,
    pub kind: MalformedKind,
    /// Byte range of the header line within the normalized source
    #[serde(skip)]
    pub span: (usize, usize),
}

impl MalformedBlock {
    /// Build a labeled diagnostic against the document source.
    pub fn diagnostic(&self, source: &str) -> BlockDiagnostic {
        let (lo, hi) = self.span;
        BlockDiagnostic {
            message: self.to_string(),
            src: source.to_string(),
            span: (lo, hi.saturating_sub(lo)).into(),
            help: self.kind.help(),
        }
    }
}

/// Rendered form of a malformed block for the terminal
#[derive(Debug, Diagnostic, thiserror::Error)]
#[error("{message}")]
#[diagnostic(code(shedit::malformed_block))]
pub struct BlockDiagnostic {
    pub message: String,

    #[source_code]
    pub src: String,

    #[label("block starts here")]
    pub span: SourceSpan,

    #[help]
    pub help: String,
}

/// Parsed document: operations and malformed blocks share one index space
#[derive(Debug, Clone, Default)]
pub struct EditDocument {
    pub operations: Vec<EditOperation>,
    pub malformed: Vec<MalformedBlock>,
    /// Normalized text the spans refer to
    pub source: String,
}

impl EditDocument {
    pub fn block_count(&self) -> usize {
        self.operations.len() + self.malformed.len()
    }
}

/// Normalize CRLF and drop a leading BOM
pub fn normalize_input(raw: &str) -> String {
    raw.trim_start_matches('\u{FEFF}').replace("\r\n", "\n")
}

/// Parse with default settings
pub fn parse_edit_blocks(raw: &str) -> EditDocument {
    EditBlockParser::new().parse(raw)
}

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    text: &'a str,
    start: usize,
}

/// Outcome of scanning one block starting at its header
struct BlockScan {
    /// Line index where scanning resumes
    next: usize,
    result: Result<(String, String), MalformedKind>,
}

#[derive(Debug, Default)]
pub struct EditBlockParser;

impl EditBlockParser {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all, fields(bytes = raw.len()))]
    pub fn parse(&self, raw: &str) -> EditDocument {
        let source = normalize_input(raw);
        let lines = split_lines(&source);

        let mut operations = Vec::new();
        let mut malformed = Vec::new();
        let mut active_path: Option<PathBuf> = None;
        let mut index = 0usize;
        let mut i = 0usize;

        while i < lines.len() {
            let line = lines[i];

            if let Some(flag_text) = header_flags(line.text) {
                let scan = self.scan_block(&lines, i);
                let flags = flag_text.parse::<EditFlags>();

                let result = scan.result.and_then(|(search, replace)| {
                    let flags = flags.map_err(|flag| MalformedKind::UnknownFlag { flag })?;
                    let path = active_path.clone().ok_or(MalformedKind::MissingPath)?;
                    Ok((path, search, replace, flags))
                });

                match result {
                    Ok((file_path, search_text, replace_text, flags)) => {
                        operations.push(EditOperation {
                            index,
                            line: i + 1,
                            file_path,
                            search_text,
                            replace_text,
                            flags,
                        });
                    }
                    Err(kind) => {
                        debug!(index, line = i + 1, %kind, "malformed edit block");
                        malformed.push(MalformedBlock {
                            index,
                            line: i + 1,
                            path: active_path.clone(),
                            kind,
                            span: (line.start, line.start + line.text.len()),
                        });
                    }
                }

                index += 1;
                i = scan.next;
                continue;
            }

            if is_divider(line.text) || is_replace_marker(line.text) {
                warn!(line = i + 1, "stray edit-block marker outside a block ignored");
                i += 1;
                continue;
            }

            match path_line(line.text) {
                Some(path) => active_path = Some(path),
                None if !line.text.trim().is_empty() => {
                    debug!(line = i + 1, "text between blocks ignored");
                }
                None => {}
            }
            i += 1;
        }

        EditDocument {
            operations,
            malformed,
            source,
        }
    }

    /// Scan the block whose header sits at `header`.
    fn scan_block(&self, lines: &[Line<'_>], header: usize) -> BlockScan {
        let mut search: Vec<&str> = Vec::new();
        let mut replace: Vec<&str> = Vec::new();
        let mut in_replace = false;
        let mut i = header + 1;

        while i < lines.len() {
            let text = lines[i].text;

            if header_flags(text).is_some() {
                return self.skip_nested(lines, i);
            }

            if is_replace_marker(text) {
                let result = if in_replace {
                    Ok((search.join("\n"), replace.join("\n")))
                } else {
                    Err(MalformedKind::MissingSeparator)
                };
                return BlockScan { next: i + 1, result };
            }

            if is_divider(text) && !in_replace {
                in_replace = true;
            } else if in_replace {
                replace.push(text);
            } else {
                search.push(text);
            }
            i += 1;
        }

        let kind = if in_replace {
            MalformedKind::MissingReplaceMarker
        } else {
            MalformedKind::MissingSeparator
        };
        BlockScan {
            next: lines.len(),
            result: Err(kind),
        }
    }

    /// A header appeared inside an open block. Consume through the marker that
    /// balances the nesting; when the outer block never closes, report it as
    /// unterminated and resume at the inner header so siblings still parse.
    fn skip_nested(&self, lines: &[Line<'_>], inner: usize) -> BlockScan {
        let mut depth = 2usize;
        let mut i = inner + 1;

        while i < lines.len() {
            let text = lines[i].text;
            if header_flags(text).is_some() {
                depth += 1;
            } else if is_replace_marker(text) {
                depth -= 1;
                if depth == 0 {
                    return BlockScan {
                        next: i + 1,
                        result: Err(MalformedKind::NestedBlock),
                    };
                }
            }
            i += 1;
        }

        BlockScan {
            next: resume_at(lines, inner),
            result: Err(MalformedKind::MissingReplaceMarker),
        }
    }
}

/// Where parsing resumes after an unterminated block: on the file path right
/// above the next header when there is one, so that block keeps its own file.
fn resume_at(lines: &[Line<'_>], inner: usize) -> usize {
    let above = inner.checked_sub(1).map(|i| lines[i].text);
    match above {
        Some(text) if path_line(text).is_some() && text.contains(['.', '/', '\\']) => inner - 1,
        _ => inner,
    }
}

/// Split on '\n' keeping the byte start of each line
fn split_lines(source: &str) -> Vec<Line<'_>> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for text in source.split('\n') {
        out.push(Line { text, start });
        start += text.len() + 1;
    }
    out
}

/// Return the flag text when `line` is a SEARCH header ("" when no flags)
fn header_flags(line: &str) -> Option<&str> {
    let rest = line.trim_end().strip_prefix(SEARCH_MARKER)?;
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix(':').map(str::trim)
}

fn is_divider(line: &str) -> bool {
    line.trim_end() == DIVIDER_MARKER
}

fn is_replace_marker(line: &str) -> bool {
    line.trim_end() == REPLACE_MARKER
}

/// File path named by a line outside a block, if the line looks like one.
fn path_line(line: &str) -> Option<PathBuf> {
    let trimmed = line.trim();
    if trimmed.is_empty()
        || trimmed.starts_with("```")
        || header_flags(trimmed).is_some()
        || is_divider(trimmed)
        || is_replace_marker(trimmed)
    {
        return None;
    }

    // Strip decoration LLMs commonly put around a path
    let path = trimmed
        .trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '*'))
        .trim();
    if path.is_empty()
        || path.contains(char::is_whitespace)
        || path.ends_with(['.', ',', ':', ';', '!', '?'])
    {
        return None;
    }
    Some(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_block() {
        let input = "\
src/lib.rs
<<<<<<< SEARCH
fn old() {}
=======
fn new() {}
>>>>>>> REPLACE
";
        let doc = parse_edit_blocks(input);

        assert!(doc.malformed.is_empty());
        assert_eq!(doc.operations.len(), 1);
        let op = &doc.operations[0];
        assert_eq!(op.file_path, PathBuf::from("src/lib.rs"));
        assert_eq!(op.search_text, "fn old() {}");
        assert_eq!(op.replace_text, "fn new() {}");
        assert_eq!(op.flags, EditFlags::default());
        assert_eq!(op.line, 2);
    }

    #[test]
    fn test_path_persists_until_replaced() {
        let input = "\
a.txt
<<<<<<< SEARCH
one
=======
1
>>>>>>> REPLACE

<<<<<<< SEARCH:g
two
=======
2
>>>>>>> REPLACE
b.txt
<<<<<<< SEARCH
three
=======
3
>>>>>>> REPLACE
";
        let doc = parse_edit_blocks(input);

        let paths: Vec<_> = doc
            .operations
            .iter()
            .map(|op| op.file_path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(paths, vec!["a.txt", "a.txt", "b.txt"]);
        assert!(doc.operations[1].flags.global);
        assert_eq!(
            doc.operations.iter().map(|op| op.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_flags_are_order_insensitive() {
        assert_eq!(
            "dgi".parse::<EditFlags>().unwrap(),
            EditFlags {
                global: true,
                case_insensitive: true,
                dry_run: true
            }
        );
        assert_eq!("ig".parse::<EditFlags>(), "gi".parse::<EditFlags>());
        assert_eq!("gx".parse::<EditFlags>(), Err('x'));
        assert_eq!("gid".parse::<EditFlags>().unwrap().to_string(), "gid");
    }

    #[test]
    fn test_unknown_flag_is_malformed() {
        let input = "f.txt\n<<<<<<< SEARCH:gz\na\n=======\nb\n>>>>>>> REPLACE\n";
        let doc = parse_edit_blocks(input);

        assert!(doc.operations.is_empty());
        assert_eq!(
            doc.malformed[0].kind,
            MalformedKind::UnknownFlag { flag: 'z' }
        );
    }

    #[test]
    fn test_missing_separator_keeps_siblings() {
        let input = "\
notes.txt
<<<<<<< SEARCH
alpha
>>>>>>> REPLACE
<<<<<<< SEARCH
beta
=======
gamma
>>>>>>> REPLACE
";
        let doc = parse_edit_blocks(input);

        assert_eq!(doc.block_count(), 2);
        assert_eq!(doc.malformed.len(), 1);
        assert_eq!(doc.malformed[0].kind, MalformedKind::MissingSeparator);
        assert_eq!(doc.malformed[0].index, 0);
        assert_eq!(doc.operations.len(), 1);
        assert_eq!(doc.operations[0].index, 1);
        assert_eq!(doc.operations[0].search_text, "beta");
    }

    #[test]
    fn test_missing_replace_marker_at_eof() {
        let input = "f.txt\n<<<<<<< SEARCH\na\n=======\nb\n";
        let doc = parse_edit_blocks(input);

        assert!(doc.operations.is_empty());
        assert_eq!(doc.malformed[0].kind, MalformedKind::MissingReplaceMarker);
    }

    #[test]
    fn test_nested_block_is_skipped_whole() {
        let input = "\
f.txt
<<<<<<< SEARCH
outer
<<<<<<< SEARCH
inner
=======
inner new
>>>>>>> REPLACE
=======
outer new
>>>>>>> REPLACE
<<<<<<< SEARCH
after
=======
later
>>>>>>> REPLACE
";
        let doc = parse_edit_blocks(input);

        assert_eq!(doc.malformed.len(), 1);
        assert_eq!(doc.malformed[0].kind, MalformedKind::NestedBlock);
        assert_eq!(doc.operations.len(), 1);
        assert_eq!(doc.operations[0].search_text, "after");
    }

    #[test]
    fn test_unterminated_block_resyncs_on_next_header() {
        let input = "\
f.txt
<<<<<<< SEARCH
first
=======
first new
<<<<<<< SEARCH
second
=======
second new
>>>>>>> REPLACE
";
        let doc = parse_edit_blocks(input);

        assert_eq!(doc.malformed.len(), 1);
        assert_eq!(doc.malformed[0].kind, MalformedKind::MissingReplaceMarker);
        assert_eq!(doc.operations.len(), 1);
        assert_eq!(doc.operations[0].search_text, "second");
        assert_eq!(doc.operations[0].replace_text, "second new");
    }

    #[test]
    fn test_unterminated_block_keeps_next_path() {
        let input = "\
a.txt
<<<<<<< SEARCH
x
=======
y
b.txt
<<<<<<< SEARCH
foo
=======
bar
>>>>>>> REPLACE
";
        let doc = parse_edit_blocks(input);

        assert_eq!(doc.malformed.len(), 1);
        assert_eq!(doc.malformed[0].kind, MalformedKind::MissingReplaceMarker);
        assert_eq!(doc.malformed[0].path, Some(PathBuf::from("a.txt")));
        assert_eq!(doc.operations.len(), 1);
        assert_eq!(doc.operations[0].file_path, PathBuf::from("b.txt"));
        assert_eq!(doc.operations[0].search_text, "foo");
    }

    #[test]
    fn test_prose_between_blocks_keeps_active_path() {
        let input = "\
a.txt
<<<<<<< SEARCH
one
=======
two
>>>>>>> REPLACE
Done.
Here is the next change:
<<<<<<< SEARCH
three
=======
four
>>>>>>> REPLACE
";
        let doc = parse_edit_blocks(input);

        assert!(doc.malformed.is_empty());
        assert_eq!(doc.operations.len(), 2);
        assert_eq!(doc.operations[1].file_path, PathBuf::from("a.txt"));
    }

    #[test]
    fn test_path_line_shapes() {
        assert_eq!(path_line("**src/lib.rs**"), Some(PathBuf::from("src/lib.rs")));
        assert_eq!(path_line("  'Makefile'  "), Some(PathBuf::from("Makefile")));
        assert_eq!(path_line("Done."), None);
        assert_eq!(path_line("src/lib.rs:"), None);
        assert_eq!(path_line("update the parser"), None);
        assert_eq!(path_line("```rust"), None);
    }

    #[test]
    fn test_empty_search_and_replace_are_valid() {
        let input = "f.txt\n<<<<<<< SEARCH\n=======\n>>>>>>> REPLACE\n";
        let doc = parse_edit_blocks(input);

        assert!(doc.malformed.is_empty());
        assert_eq!(doc.operations[0].search_text, "");
        assert_eq!(doc.operations[0].replace_text, "");
    }

    #[test]
    fn test_multiline_and_crlf_input() {
        let input = "f.txt\r\n<<<<<<< SEARCH\r\nline 1\r\nline 2\r\n=======\r\nline A\r\n>>>>>>> REPLACE\r\n";
        let doc = parse_edit_blocks(input);

        assert_eq!(doc.operations[0].search_text, "line 1\nline 2");
        assert_eq!(doc.operations[0].replace_text, "line A");
    }

    #[test]
    fn test_block_without_path_is_malformed() {
        let input = "<<<<<<< SEARCH\na\n=======\nb\n>>>>>>> REPLACE\n";
        let doc = parse_edit_blocks(input);

        assert_eq!(doc.malformed[0].kind, MalformedKind::MissingPath);
        assert!(doc.malformed[0].path.is_none());
    }

    #[test]
    fn test_decorated_path_line() {
        let input = "`src/main.rs`\n```rust\n<<<<<<< SEARCH\na\n=======\nb\n>>>>>>> REPLACE\n```\n";
        let doc = parse_edit_blocks(input);

        assert_eq!(doc.operations[0].file_path, PathBuf::from("src/main.rs"));
    }

    #[test]
    fn test_diagnostic_points_at_header() {
        let input = "f.txt\n<<<<<<< SEARCH\nx\n>>>>>>> REPLACE\n";
        let doc = parse_edit_blocks(input);
        let diag = doc.malformed[0].diagnostic(&doc.source);

        assert_eq!(diag.span.offset(), 6);
        assert_eq!(diag.span.len(), SEARCH_MARKER.len());
        assert!(diag.help.contains(DIVIDER_MARKER));
    }
}
