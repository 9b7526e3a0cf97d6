//! Search/replace execution against files
//!
//! Each operation runs against the current content of its file: exact match
//! first (honoring `i` and `g`), then a fuzzy fallback that replaces the single
//! best window when it clears the threshold. Operations on one file form a
//! sequential pipeline; distinct files run in parallel on rayon.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use rayon::prelude::*;
use regex::RegexBuilder;
use serde::Serialize;
use similar::{ChangeTag, TextDiff};
use tracing::{debug, info, instrument, warn};

use crate::core::edit_block::{EditDocument, EditOperation};
use crate::core::fuzzy::{DEFAULT_THRESHOLD, FuzzyLocator, FuzzyMatch};
use crate::infra::config::EditConfig;
use crate::infra::io::{read_text, resolve_user_path, write_atomic};
use crate::infra::utils::NewlineUtils;

/// Search text ceiling in bytes
pub const DEFAULT_MAX_PATTERN_BYTES: usize = 100 * 1024;

/// Longest search text (in chars) handed to the fuzzy fallback
pub const DEFAULT_MAX_FUZZY_CHARS: usize = 4096;

/// Rendered fuzzy diffs are capped to keep warnings readable
const MAX_DIFF_CHARS: usize = 240;

/// Why an operation was skipped
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplyFailure {
    #[error("search text not found{}", closest_note(.closest))]
    PatternNotFound { closest: Option<f64> },

    #[error("search text is {size} bytes, limit is {limit}")]
    PatternTooLarge { size: usize, limit: usize },

    #[error("file unreadable: {message}")]
    FileUnreadable { message: String },

    #[error("write failed: {message}")]
    WriteFailed { message: String },

    #[error("malformed block: {message}")]
    Malformed { message: String },
}

fn closest_note(closest: &Option<f64>) -> String {
    match closest {
        Some(s) => format!(" (closest match {:.0}% similar)", s * 100.0),
        None => String::new(),
    }
}

#[derive(Debug, Clone)]
pub struct PatchConfig {
    pub fuzzy_threshold: f64,
    pub max_pattern_bytes: usize,
    pub max_fuzzy_chars: usize,
    /// Relative edit paths are resolved against this directory
    pub base_dir: PathBuf,
    /// Treat every operation as dry-run (global `--dry-run`)
    pub force_dry_run: bool,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_THRESHOLD,
            max_pattern_bytes: DEFAULT_MAX_PATTERN_BYTES,
            max_fuzzy_chars: DEFAULT_MAX_FUZZY_CHARS,
            base_dir: PathBuf::from("."),
            force_dry_run: false,
        }
    }
}

impl PatchConfig {
    pub fn from_config(edit: &EditConfig, base_dir: PathBuf) -> Self {
        Self {
            fuzzy_threshold: edit.fuzzy_threshold,
            max_pattern_bytes: edit.max_pattern_bytes,
            max_fuzzy_chars: edit.max_fuzzy_chars,
            base_dir,
            force_dry_run: false,
        }
    }

    pub fn with_force_dry_run(mut self, enabled: bool) -> Self {
        self.force_dry_run = enabled;
        self
    }
}

/// Content after one successful operation
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub content: String,
    /// Number of spans replaced
    pub matched: usize,
    /// Set when the fuzzy fallback produced the match
    pub similarity: Option<f64>,
    pub warning: Option<String>,
}

/// Apply one operation to `content`. Pure: never touches the filesystem.
pub fn apply_operation(
    content: &str,
    op: &EditOperation,
    cfg: &PatchConfig,
) -> Result<Applied, ApplyFailure> {
    if op.search_text.is_empty() {
        return Err(ApplyFailure::PatternNotFound { closest: None });
    }

    if op.search_text.len() > cfg.max_pattern_bytes {
        return Err(ApplyFailure::PatternTooLarge {
            size: op.search_text.len(),
            limit: cfg.max_pattern_bytes,
        });
    }

    // Match in the file's own newline style so CRLF files stay CRLF
    let newline = NewlineUtils::detect(content);
    let search = NewlineUtils::convert(&op.search_text, newline);
    let replace = NewlineUtils::convert(&op.replace_text, newline);

    let spans = exact_spans(content, &search, op.flags.case_insensitive, op.flags.global);
    if !spans.is_empty() {
        return Ok(Applied {
            content: splice(content, &spans, &replace),
            matched: spans.len(),
            similarity: None,
            warning: None,
        });
    }

    if search.chars().count() > cfg.max_fuzzy_chars {
        debug!(
            chars = search.chars().count(),
            limit = cfg.max_fuzzy_chars,
            "search text too long for fuzzy fallback"
        );
        return Err(ApplyFailure::PatternNotFound { closest: None });
    }

    let found = FuzzyLocator::new()
        .case_insensitive(op.flags.case_insensitive)
        .locate(content, &search);

    if !found.is_acceptable(cfg.fuzzy_threshold) {
        return Err(ApplyFailure::PatternNotFound {
            closest: Some(found.similarity),
        });
    }

    let warning = fuzzy_warning(content, &search, &found);
    Ok(Applied {
        content: splice(content, &[(found.start, found.end)], &replace),
        matched: 1,
        similarity: Some(found.similarity),
        warning: Some(warning),
    })
}

/// Byte spans of exact occurrences (first only unless `global`)
fn exact_spans(
    content: &str,
    needle: &str,
    case_insensitive: bool,
    global: bool,
) -> Vec<(usize, usize)> {
    let limit = if global { usize::MAX } else { 1 };

    if !case_insensitive {
        return memchr::memmem::find_iter(content.as_bytes(), needle.as_bytes())
            .take(limit)
            .map(|start| (start, start + needle.len()))
            .collect();
    }

    match RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re
            .find_iter(content)
            .take(limit)
            .map(|m| (m.start(), m.end()))
            .collect(),
        Err(e) => {
            warn!(error = %e, "case-insensitive matcher unavailable; falling back to fuzzy");
            Vec::new()
        }
    }
}

/// Replace non-overlapping, ascending spans with `replacement`
fn splice(content: &str, spans: &[(usize, usize)], replacement: &str) -> String {
    let mut out = String::with_capacity(content.len() + spans.len() * replacement.len());
    let mut cursor = 0usize;
    for &(start, end) in spans {
        out.push_str(&content[cursor..start]);
        out.push_str(replacement);
        cursor = end;
    }
    out.push_str(&content[cursor..]);
    out
}

/// Human-readable warning: location, score and a compact char diff
fn fuzzy_warning(content: &str, expected: &str, found: &FuzzyMatch) -> String {
    let line = NewlineUtils::line_of(content, found.start);
    format!(
        "fuzzy match at line {line} ({:.0}% similar): {}",
        found.similarity * 100.0,
        render_char_diff(expected, &found.matched_text)
    )
}

/// Render `{-removed-}{+added+}` runs between expected and found text
fn render_char_diff(expected: &str, found: &str) -> String {
    let diff = TextDiff::from_chars(expected, found);

    let mut runs: Vec<(ChangeTag, String)> = Vec::new();
    for change in diff.iter_all_changes() {
        match runs.last_mut() {
            Some((tag, text)) if *tag == change.tag() => text.push_str(change.value()),
            _ => runs.push((change.tag(), change.value().to_string())),
        }
    }

    let mut out = String::new();
    for (tag, text) in runs {
        let text = text.replace('\r', "").replace('\n', "⏎");
        match tag {
            ChangeTag::Equal => out.push_str(&text),
            ChangeTag::Delete => out.push_str(&format!("{{-{text}-}}")),
            ChangeTag::Insert => out.push_str(&format!("{{+{text}+}}")),
        }
    }

    if out.chars().count() > MAX_DIFF_CHARS {
        let mut capped: String = out.chars().take(MAX_DIFF_CHARS - 1).collect();
        capped.push('…');
        return capped;
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Applied,
    Skipped,
}

/// One entry per parsed operation or malformed block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    pub index: usize,
    pub line: usize,
    pub path: Option<PathBuf>,
    pub status: OperationStatus,
    /// Number of spans replaced (or that would be, for dry-run)
    pub matched: usize,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ApplyFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl OperationResult {
    fn skipped(index: usize, line: usize, path: Option<PathBuf>, reason: ApplyFailure) -> Self {
        Self {
            index,
            line,
            path,
            status: OperationStatus::Skipped,
            matched: 0,
            dry_run: false,
            similarity: None,
            reason: Some(reason),
            warning: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub results: Vec<OperationResult>,
    pub files_written: Vec<PathBuf>,
}

impl ApplyReport {
    pub fn applied_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == OperationStatus::Applied)
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.results.len() - self.applied_count()
    }
}

/// Per-file pipeline outcome
struct FileOutcome {
    results: Vec<OperationResult>,
    written: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct PatchExecutor {
    cfg: PatchConfig,
}

impl PatchExecutor {
    pub fn new(cfg: PatchConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &PatchConfig {
        &self.cfg
    }

    /// Apply every operation of `doc` and report one result per block,
    /// ordered by block index.
    #[instrument(skip_all, fields(blocks = doc.block_count()))]
    pub fn apply_document(&self, doc: &EditDocument) -> ApplyReport {
        let mut groups: IndexMap<PathBuf, Vec<&EditOperation>> = IndexMap::new();
        for op in &doc.operations {
            let path = resolve_user_path(&op.file_path, &self.cfg.base_dir);
            groups.entry(path).or_default().push(op);
        }

        let outcomes: Vec<FileOutcome> = groups
            .into_iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(path, ops)| self.apply_file(&path, &ops))
            .collect();

        let mut report = ApplyReport::default();
        for outcome in outcomes {
            report.results.extend(outcome.results);
            report.files_written.extend(outcome.written);
        }

        for block in &doc.malformed {
            let path = block
                .path
                .as_deref()
                .map(|p| resolve_user_path(p, &self.cfg.base_dir));
            report.results.push(OperationResult::skipped(
                block.index,
                block.line,
                path,
                ApplyFailure::Malformed {
                    message: block.kind.to_string(),
                },
            ));
        }

        report.results.sort_by_key(|r| r.index);
        info!(
            applied = report.applied_count(),
            skipped = report.skipped_count(),
            files = report.files_written.len(),
            "edit document processed"
        );
        report
    }

    /// Run one file's operations in order and write once if anything changed.
    #[instrument(skip(self, ops), fields(ops = ops.len()))]
    fn apply_file(&self, path: &Path, ops: &[&EditOperation]) -> FileOutcome {
        let original = match read_text(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read edit target");
                let message = format!("{e:#}");
                let results = ops
                    .iter()
                    .map(|op| {
                        OperationResult::skipped(
                            op.index,
                            op.line,
                            Some(path.to_path_buf()),
                            ApplyFailure::FileUnreadable {
                                message: message.clone(),
                            },
                        )
                    })
                    .collect();
                return FileOutcome {
                    results,
                    written: None,
                };
            }
        };

        let mut current = original.clone();
        let mut results = Vec::with_capacity(ops.len());

        for op in ops {
            let dry_run = op.flags.dry_run || self.cfg.force_dry_run;
            match apply_operation(&current, op, &self.cfg) {
                Ok(applied) => {
                    if let Some(w) = &applied.warning {
                        warn!(path = %path.display(), block = op.index, "{w}");
                    }
                    results.push(OperationResult {
                        index: op.index,
                        line: op.line,
                        path: Some(path.to_path_buf()),
                        status: OperationStatus::Applied,
                        matched: applied.matched,
                        dry_run,
                        similarity: applied.similarity,
                        reason: None,
                        warning: applied.warning,
                    });
                    // Dry-run results never feed the next operation
                    if !dry_run {
                        current = applied.content;
                    }
                }
                Err(failure) => {
                    debug!(path = %path.display(), block = op.index, %failure, "operation skipped");
                    results.push(OperationResult::skipped(
                        op.index,
                        op.line,
                        Some(path.to_path_buf()),
                        failure,
                    ));
                }
            }
        }

        if current == original {
            return FileOutcome {
                results,
                written: None,
            };
        }

        match write_atomic(path, current.as_bytes()) {
            Ok(()) => {
                info!(path = %path.display(), "file updated");
                FileOutcome {
                    results,
                    written: Some(path.to_path_buf()),
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "write failed");
                let message = format!("{e:#}");
                for r in results
                    .iter_mut()
                    .filter(|r| r.status == OperationStatus::Applied && !r.dry_run)
                {
                    r.status = OperationStatus::Skipped;
                    r.reason = Some(ApplyFailure::WriteFailed {
                        message: message.clone(),
                    });
                }
                FileOutcome {
                    results,
                    written: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::edit_block::{EditFlags, parse_edit_blocks};
    use std::fs;
    use tempfile::tempdir;

    fn op(search: &str, replace: &str, flags: &str) -> EditOperation {
        EditOperation {
            index: 0,
            line: 1,
            file_path: PathBuf::from("f.txt"),
            search_text: search.to_string(),
            replace_text: replace.to_string(),
            flags: flags.parse::<EditFlags>().unwrap(),
        }
    }

    #[test]
    fn test_first_occurrence_only_without_global() {
        let cfg = PatchConfig::default();
        let out = apply_operation("a-a-a", &op("a", "b", ""), &cfg).unwrap();
        assert_eq!(out.content, "b-a-a");
        assert_eq!(out.matched, 1);
    }

    #[test]
    fn test_global_replaces_all() {
        let cfg = PatchConfig::default();
        let out = apply_operation("a-a-a", &op("a", "b", "g"), &cfg).unwrap();
        assert_eq!(out.content, "b-b-b");
        assert_eq!(out.matched, 3);
    }

    #[test]
    fn test_case_insensitive_match() {
        let cfg = PatchConfig::default();
        let out = apply_operation("Say MIXED case", &op("mixed CASE", "ok", "i"), &cfg).unwrap();
        assert_eq!(out.content, "Say ok");
        assert!(out.similarity.is_none());
    }

    #[test]
    fn test_crlf_file_keeps_crlf() {
        let cfg = PatchConfig::default();
        let content = "one\r\ntwo\r\nthree\r\n";
        let out = apply_operation(content, &op("one\ntwo", "uno\ndos", ""), &cfg).unwrap();
        assert_eq!(out.content, "uno\r\ndos\r\nthree\r\n");
    }

    #[test]
    fn test_empty_search_is_not_found() {
        let cfg = PatchConfig::default();
        let err = apply_operation("abc", &op("", "x", ""), &cfg).unwrap_err();
        assert_eq!(err, ApplyFailure::PatternNotFound { closest: None });
    }

    #[test]
    fn test_oversized_search_is_rejected() {
        let cfg = PatchConfig {
            max_pattern_bytes: 8,
            ..PatchConfig::default()
        };
        let err = apply_operation("abc", &op("123456789", "x", ""), &cfg).unwrap_err();
        assert_eq!(err, ApplyFailure::PatternTooLarge { size: 9, limit: 8 });
    }

    #[test]
    fn test_fuzzy_fallback_warns() {
        let cfg = PatchConfig::default();
        let content = "fn main() {\n    println!(\"Hello, world!\");\n}\n";
        let out =
            apply_operation(content, &op("println!(\"Hello, wrld!\");", "println!(\"Bye\");", ""), &cfg)
                .unwrap();

        assert!(out.content.contains("println!(\"Bye\");"));
        assert!(!out.content.contains("Hello"));
        assert!(out.similarity.unwrap() >= DEFAULT_THRESHOLD);
        let warning = out.warning.unwrap();
        assert!(warning.contains("line 2"), "{warning}");
        assert!(warning.contains("{+o+}"), "{warning}");
    }

    #[test]
    fn test_fuzzy_below_threshold_is_not_found() {
        let cfg = PatchConfig::default();
        let err = apply_operation("alpha beta gamma", &op("zzzz qqqq", "x", ""), &cfg).unwrap_err();
        assert!(matches!(
            err,
            ApplyFailure::PatternNotFound { closest: Some(s) } if s < DEFAULT_THRESHOLD
        ));
    }

    #[test]
    fn test_char_diff_rendering() {
        assert_eq!(render_char_diff("wrld", "world"), "w{+o+}rld");
        assert_eq!(render_char_diff("cat", "cut"), "c{-a-}{+u+}t");
    }

    #[test]
    fn test_executor_pipeline_and_dry_run() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        fs::write(&file, "red green blue\n").unwrap();

        let input = "\
notes.txt
<<<<<<< SEARCH
red
=======
orange
>>>>>>> REPLACE
<<<<<<< SEARCH
orange green
=======
orange teal
>>>>>>> REPLACE
<<<<<<< SEARCH:d
blue
=======
black
>>>>>>> REPLACE
<<<<<<< SEARCH
black
=======
white
>>>>>>> REPLACE
";
        let doc = parse_edit_blocks(input);
        let exec = PatchExecutor::new(PatchConfig {
            base_dir: dir.path().to_path_buf(),
            ..PatchConfig::default()
        });
        let report = exec.apply_document(&doc);

        let statuses: Vec<_> = report.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                OperationStatus::Applied,
                OperationStatus::Applied,
                OperationStatus::Applied,
                OperationStatus::Skipped
            ]
        );
        assert!(report.results[2].dry_run);
        assert_eq!(fs::read_to_string(&file).unwrap(), "orange teal blue\n");
        assert_eq!(report.files_written, vec![file]);
    }

    #[test]
    fn test_force_dry_run_leaves_files_untouched() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "keep me").unwrap();

        let doc = parse_edit_blocks("a.txt\n<<<<<<< SEARCH\nkeep\n=======\ndrop\n>>>>>>> REPLACE\n");
        let cfg = PatchConfig {
            base_dir: dir.path().to_path_buf(),
            ..PatchConfig::default()
        }
        .with_force_dry_run(true);
        let report = PatchExecutor::new(cfg).apply_document(&doc);

        assert_eq!(report.applied_count(), 1);
        assert!(report.results[0].dry_run);
        assert!(report.files_written.is_empty());
        assert_eq!(fs::read(&file).unwrap(), b"keep me");
    }

    #[test]
    fn test_missing_file_skips_every_operation() {
        let dir = tempdir().unwrap();
        let input = "\
ghost.txt
<<<<<<< SEARCH
a
=======
b
>>>>>>> REPLACE
<<<<<<< SEARCH
c
=======
d
>>>>>>> REPLACE
";
        let doc = parse_edit_blocks(input);
        let report = PatchExecutor::new(PatchConfig {
            base_dir: dir.path().to_path_buf(),
            ..PatchConfig::default()
        })
        .apply_document(&doc);

        assert_eq!(report.skipped_count(), 2);
        assert!(report.results.iter().all(|r| matches!(
            r.reason,
            Some(ApplyFailure::FileUnreadable { .. })
        )));
    }

    #[test]
    fn test_malformed_blocks_are_reported_in_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("x.txt"), "one two").unwrap();

        let input = "\
x.txt
<<<<<<< SEARCH
one
>>>>>>> REPLACE
<<<<<<< SEARCH
two
=======
2
>>>>>>> REPLACE
";
        let doc = parse_edit_blocks(input);
        let report = PatchExecutor::new(PatchConfig {
            base_dir: dir.path().to_path_buf(),
            ..PatchConfig::default()
        })
        .apply_document(&doc);

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].index, 0);
        assert_eq!(report.results[0].status, OperationStatus::Skipped);
        assert!(matches!(
            report.results[0].reason,
            Some(ApplyFailure::Malformed { .. })
        ));
        assert_eq!(report.results[1].status, OperationStatus::Applied);
        assert_eq!(
            fs::read_to_string(dir.path().join("x.txt")).unwrap(),
            "one 2"
        );
    }
}
