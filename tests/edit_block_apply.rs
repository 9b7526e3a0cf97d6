//! End-to-end edit-block application against real files.

mod util;

use std::fs;

use assert_fs::prelude::*;
use serde::Serialize;
use shedit::core::edit_block::parse_edit_blocks;
use shedit::core::patch::{ApplyFailure, OperationStatus, PatchConfig, PatchExecutor};
use util::{edit_block, make_edit_fixture};

fn executor(dir: &assert_fs::TempDir) -> PatchExecutor
{
    PatchExecutor::new(PatchConfig {
        base_dir: dir.path().to_path_buf(),
        ..PatchConfig::default()
    })
}

#[test]
fn global_flag_replaces_every_occurrence()
{
    let tmp = make_edit_fixture();
    let doc = parse_edit_blocks(&edit_block(Some("notes.txt"), "g", "foo", "bar"));

    let report = executor(&tmp).apply_document(&doc);

    assert_eq!(report.results[0].status, OperationStatus::Applied);
    assert_eq!(report.results[0].matched, 3);
    tmp.child("notes.txt")
        .assert("bar and bar and bar\n");
}

#[test]
fn case_insensitive_flag_matches_mixed_case()
{
    let tmp = make_edit_fixture();
    let doc = parse_edit_blocks(&edit_block(Some("mixed.txt"), "i", "mixed case", "plain"));

    let report = executor(&tmp).apply_document(&doc);

    assert_eq!(report.applied_count(), 1);
    tmp.child("mixed.txt")
        .assert("This has plain text\n");
}

#[test]
fn dry_run_leaves_bytes_identical()
{
    let tmp = make_edit_fixture();
    let before = fs::read(tmp.path().join("notes.txt")).unwrap();

    let doc = parse_edit_blocks(&edit_block(Some("notes.txt"), "gd", "foo", "bar"));
    let report = executor(&tmp).apply_document(&doc);

    assert_eq!(report.results[0].status, OperationStatus::Applied);
    assert!(report.results[0].dry_run);
    assert!(report.files_written.is_empty());
    assert_eq!(fs::read(tmp.path().join("notes.txt")).unwrap(), before);
}

#[test]
fn malformed_block_does_not_block_siblings()
{
    let tmp = make_edit_fixture();
    let input = format!(
        "notes.txt\n<<<<<<< SEARCH\nfoo\n>>>>>>> REPLACE\n{}",
        edit_block(None, "", "foo and", "qux and")
    );
    let doc = parse_edit_blocks(&input);

    let report = executor(&tmp).apply_document(&doc);

    #[derive(Serialize)]
    struct Row
    {
        dry_run: bool,
        index: usize,
        matched: usize,
        status: OperationStatus,
    }

    let rows: Vec<Row> = report
        .results
        .iter()
        .map(|r| Row {
            dry_run: r.dry_run,
            index: r.index,
            matched: r.matched,
            status: r.status,
        })
        .collect();

    insta::assert_yaml_snapshot!(rows, @r"
    - dry_run: false
      index: 0
      matched: 0
      status: skipped
    - dry_run: false
      index: 1
      matched: 1
      status: applied
    ");

    tmp.child("notes.txt")
        .assert("qux and foo and foo\n");
}

#[test]
fn fuzzy_match_above_threshold_is_applied_with_warning()
{
    let tmp = make_edit_fixture();
    // One character off from the file ("Helo" vs "Hello")
    let doc = parse_edit_blocks(&edit_block(
        Some("src/app.py"),
        "",
        "    print(\"Helo, \" + name)",
        "    print(f\"Hi, {name}\")",
    ));

    let report = executor(&tmp).apply_document(&doc);
    let result = &report.results[0];

    assert_eq!(result.status, OperationStatus::Applied);
    assert!(result.similarity.unwrap() >= 0.70);
    assert!(result.warning.as_deref().unwrap().contains("line 2"));

    let text = fs::read_to_string(tmp.path().join("src/app.py")).unwrap();
    assert!(text.contains("print(f\"Hi, {name}\")"));
    assert!(!text.contains("Hello"));
}

#[test]
fn fuzzy_match_below_threshold_is_skipped()
{
    let tmp = make_edit_fixture();
    let doc = parse_edit_blocks(&edit_block(
        Some("src/app.py"),
        "",
        "class Totally::Unrelated<Thing> {}",
        "nothing",
    ));

    let report = executor(&tmp).apply_document(&doc);

    assert_eq!(report.results[0].status, OperationStatus::Skipped);
    assert!(matches!(
        report.results[0].reason,
        Some(ApplyFailure::PatternNotFound { closest: Some(s) }) if s < 0.70
    ));
    tmp.child("src/app.py")
        .assert(predicates::str::contains("print(\"Hello, \" + name)"));
}

#[test]
fn blocks_for_several_files_apply_in_one_document()
{
    let tmp = make_edit_fixture();
    let input = format!(
        "{}{}",
        edit_block(Some("notes.txt"), "", "foo", "one"),
        edit_block(Some("mixed.txt"), "", "MIXED", "UPPER")
    );

    let report = executor(&tmp).apply_document(&parse_edit_blocks(&input));

    assert_eq!(report.applied_count(), 2);
    assert_eq!(report.files_written.len(), 2);
    tmp.child("notes.txt")
        .assert("one and foo and foo\n");
    tmp.child("mixed.txt")
        .assert("This has UPPER case text\n");
}

#[test]
fn crlf_file_keeps_line_endings()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    tmp.child("win.txt")
        .write_str("first\r\nsecond\r\nthird\r\n")
        .unwrap();

    let doc = parse_edit_blocks(&edit_block(Some("win.txt"), "", "first\nsecond", "1st\n2nd"));
    executor(&tmp).apply_document(&doc);

    tmp.child("win.txt")
        .assert("1st\r\n2nd\r\nthird\r\n");
}
