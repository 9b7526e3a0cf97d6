//! Filepath: src/infra/utils.rs
//! Utility helpers organized by small, focused structs.
//! All functions are associated fns to keep call sites
//! ergonomic, testable, and discoverable.

use std::time::Duration;

/// UTF-8 safe slicing helpers
pub struct Utf8Utils;

impl Utf8Utils
{
    /// Byte offset of every char start plus a trailing
    /// sentinel equal to `full.len()`, so char index `i`
    /// maps to `offsets[i]` for `0..=char_count`
    pub fn char_byte_offsets(full: &str) -> Vec<usize>
    {
        let mut offsets: Vec<usize> = full
            .char_indices()
            .map(|(i, _)| i)
            .collect();

        offsets.push(full.len());
        offsets
    }

    /// Largest char boundary at or below `max_bytes`
    pub fn floor_boundary(
        full: &str,
        max_bytes: usize,
    ) -> usize
    {
        if max_bytes >= full.len()
        {
            return full.len();
        }

        let mut idx = max_bytes;
        while idx > 0 && !full.is_char_boundary(idx)
        {
            idx -= 1;
        }

        idx
    }
}

/// Newline-style helpers shared by the patch pipeline
pub struct NewlineUtils;

impl NewlineUtils
{
    /// Detect the dominant newline of `s` from its first line break.
    /// Files without any break default to LF.
    pub fn detect(s: &str) -> &'static str
    {
        match memchr::memchr(b'\n', s.as_bytes())
        {
            Some(pos) if pos > 0 && s.as_bytes()[pos - 1] == b'\r' => "\r\n",
            _ => "\n",
        }
    }

    /// Rewrite LF or CRLF text into the requested newline style
    pub fn convert(
        text: &str,
        newline: &str,
    ) -> String
    {
        // Normalize to LF first so mixed input stays consistent
        let lf = text.replace("\r\n", "\n");

        if newline == "\n"
        {
            return lf;
        }

        lf.replace('\n', newline)
    }

    /// 1-based line number of byte offset `pos` in `s`
    pub fn line_of(
        s: &str,
        pos: usize,
    ) -> usize
    {
        let end = Utf8Utils::floor_boundary(s, pos);
        memchr::memchr_iter(b'\n', &s.as_bytes()[..end]).count() + 1
    }
}

/// Display helpers for human-facing summaries
pub struct DisplayUtils;

impl DisplayUtils
{
    /// Render a duration as seconds with two decimals (e.g. "1.25s")
    pub fn runtime(d: Duration) -> String
    {
        format!("{:.2}s", d.as_secs_f64())
    }

    /// Collapse a command to a single line and cap its length
    pub fn preview(
        text: &str,
        max_chars: usize,
    ) -> String
    {
        let one_line = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        if one_line
            .chars()
            .count()
            <= max_chars
        {
            return one_line;
        }

        let mut out: String = one_line
            .chars()
            .take(max_chars.saturating_sub(1))
            .collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn char_offsets_include_sentinel()
    {
        let offsets = Utf8Utils::char_byte_offsets("aé b");
        assert_eq!(offsets, vec![0, 1, 3, 4, 5]);
    }

    #[test]
    fn floor_boundary_backs_off_multibyte()
    {
        assert_eq!(Utf8Utils::floor_boundary("aé", 2), 1);
        assert_eq!(Utf8Utils::floor_boundary("aé", 10), 3);
    }

    #[test]
    fn newline_detection_and_conversion()
    {
        assert_eq!(NewlineUtils::detect("a\r\nb"), "\r\n");
        assert_eq!(NewlineUtils::detect("a\nb\r\n"), "\n");
        assert_eq!(NewlineUtils::detect("single"), "\n");

        assert_eq!(NewlineUtils::convert("a\nb", "\r\n"), "a\r\nb");
        assert_eq!(NewlineUtils::convert("a\r\nb\nc", "\n"), "a\nb\nc");
    }

    #[test]
    fn line_of_counts_breaks()
    {
        let s = "one\ntwo\nthree";
        assert_eq!(NewlineUtils::line_of(s, 0), 1);
        assert_eq!(NewlineUtils::line_of(s, 4), 2);
        assert_eq!(NewlineUtils::line_of(s, 9), 3);
    }

    #[test]
    fn preview_caps_long_commands()
    {
        assert_eq!(DisplayUtils::preview("echo   hi\n", 20), "echo hi");
        assert_eq!(DisplayUtils::preview("abcdefghij", 5), "abcd…");
        assert_eq!(DisplayUtils::runtime(Duration::from_millis(1250)), "1.25s");
    }
}
