//! Shared test utilities for integration tests
//!
//! Provides common fixture creation and helper functions
//! used across multiple test files.

#![allow(dead_code)]

use assert_fs::prelude::*;

/// Render one SEARCH/REPLACE block, with the path line when given.
pub fn edit_block(
    path: Option<&str>,
    flags: &str,
    search: &str,
    replace: &str,
) -> String
{
    let mut out = String::new();

    if let Some(p) = path
    {
        out.push_str(p);
        out.push('\n');
    }

    // Header carries flags only when there are any
    if flags.is_empty()
    {
        out.push_str("<<<<<<< SEARCH\n");
    }
    else
    {
        out.push_str(&format!("<<<<<<< SEARCH:{flags}\n"));
    }

    out.push_str(search);
    out.push_str("\n=======\n");
    out.push_str(replace);
    out.push_str("\n>>>>>>> REPLACE\n");
    out
}

/// Small project with a few text files to edit.
pub fn make_edit_fixture() -> assert_fs::TempDir
{
    let tmp = assert_fs::TempDir::new().expect("tempdir");

    tmp.child("notes.txt")
        .write_str("foo and foo and foo\n")
        .expect("write notes");

    tmp.child("src/app.py")
        .write_str("def greet(name):\n    print(\"Hello, \" + name)\n\ngreet(\"world\")\n")
        .expect("write app");

    tmp.child("mixed.txt")
        .write_str("This has MIXED case text\n")
        .expect("write mixed");

    tmp
}
