//! Best-window fuzzy location of a needle inside a haystack.
//!
//! The locator works in two passes:
//! - a coarse anchor: slide a needle-sized window over the haystack and keep
//!   the windows sharing the most character bigrams with the needle (O(N));
//! - local refinement: grow, shrink or shift the window while the normalized
//!   similarity improves, with coarse strides first and single chars last.
//!   Candidates are scored with a banded edit distance that gives up as soon
//!   as they cannot beat the current best.
//!
//! The refinement is a local search. It has no global-optimality guarantee;
//! callers absorb small inaccuracies through the acceptance threshold.

use std::collections::HashMap;

use serde::Serialize;
use tracing::trace;

use crate::core::similarity::{levenshtein_within, similarity_chars};
use crate::infra::utils::Utf8Utils;

/// Default acceptance threshold for fuzzy matches
pub const DEFAULT_THRESHOLD: f64 = 0.70;

/// Coarse windows re-scored with the full similarity before refinement
const MAX_ANCHOR_CANDIDATES: usize = 8;

/// Best window found for a needle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuzzyMatch {
    /// Text of the window, sliced from the original haystack
    pub matched_text: String,
    /// Byte offset of the window start (inclusive)
    pub start: usize,
    /// Byte offset of the window end (exclusive)
    pub end: usize,
    /// Similarity of the window to the needle in [0.0, 1.0]
    pub similarity: f64,
}

impl FuzzyMatch {
    pub fn is_acceptable(&self, threshold: f64) -> bool {
        self.similarity >= threshold
    }

    fn empty(similarity: f64) -> Self {
        Self {
            matched_text: String::new(),
            start: 0,
            end: 0,
            similarity,
        }
    }
}

/// Locate `needle` in `haystack` with default (case-sensitive) settings.
pub fn locate(haystack: &str, needle: &str) -> FuzzyMatch {
    FuzzyLocator::new().locate(haystack, needle)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FuzzyLocator {
    case_insensitive: bool,
}

impl FuzzyLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn case_insensitive(mut self, enabled: bool) -> Self {
        self.case_insensitive = enabled;
        self
    }

    /// Always returns the best candidate found; an empty needle or haystack
    /// yields an empty window scored 0.0.
    pub fn locate(&self, haystack: &str, needle: &str) -> FuzzyMatch {
        let hay: Vec<char> = haystack.chars().map(|c| self.fold(c)).collect();
        let nee: Vec<char> = needle.chars().map(|c| self.fold(c)).collect();

        if nee.is_empty() || hay.is_empty() {
            return FuzzyMatch::empty(0.0);
        }

        let offsets = Utf8Utils::char_byte_offsets(haystack);

        let (start, end, score) = match find_exact(&hay, &nee) {
            Some(s) => (s, s + nee.len(), 1.0),
            None => {
                let (s, e) = coarse_anchor(&hay, &nee);
                refine(&hay, &nee, s, e)
            }
        };

        let (lo, hi) = (offsets[start], offsets[end]);
        trace!(start = lo, end = hi, score, "fuzzy window located");

        FuzzyMatch {
            matched_text: haystack[lo..hi].to_string(),
            start: lo,
            end: hi,
            similarity: score,
        }
    }

    /// Single-char case fold so char indices stay aligned with the haystack
    fn fold(&self, c: char) -> char {
        if !self.case_insensitive {
            return c;
        }
        let mut lower = c.to_lowercase();
        match (lower.next(), lower.next()) {
            (Some(l), None) => l,
            _ => c,
        }
    }
}

/// First exact occurrence of `nee` in `hay`, as a char index.
fn find_exact(hay: &[char], nee: &[char]) -> Option<usize> {
    if nee.len() > hay.len() {
        return None;
    }
    hay.windows(nee.len()).position(|w| w == nee)
}

type Gram = (char, char);

/// Multiset overlap between the needle's bigrams and a sliding window's.
struct GramWindow {
    want: HashMap<Gram, i32>,
    have: HashMap<Gram, i32>,
    overlap: i32,
}

impl GramWindow {
    fn add(&mut self, g: Gram) {
        let h = self.have.entry(g).or_default();
        if *h < self.want.get(&g).copied().unwrap_or(0) {
            self.overlap += 1;
        }
        *h += 1;
    }

    fn remove(&mut self, g: Gram) {
        let h = self.have.entry(g).or_default();
        *h -= 1;
        if *h < self.want.get(&g).copied().unwrap_or(0) {
            self.overlap -= 1;
        }
    }
}

/// Pick the needle-sized window sharing the most bigrams with the needle.
/// Ties are broken by the full similarity score.
fn coarse_anchor(hay: &[char], nee: &[char]) -> (usize, usize) {
    let width = nee.len().min(hay.len());
    let q = if width >= 2 { 2 } else { 1 };
    let gram = |s: &[char], p: usize| -> Gram {
        if q == 2 { (s[p], s[p + 1]) } else { (s[p], '\0') }
    };

    let mut want: HashMap<Gram, i32> = HashMap::new();
    for p in 0..=(nee.len() - q) {
        *want.entry(gram(nee, p)).or_default() += 1;
    }

    let mut window = GramWindow {
        want,
        have: HashMap::new(),
        overlap: 0,
    };

    for p in 0..=(width - q) {
        window.add(gram(hay, p));
    }

    let mut best_overlap = window.overlap;
    let mut candidates = vec![0usize];

    for s in 1..=(hay.len() - width) {
        window.remove(gram(hay, s - 1));
        window.add(gram(hay, s + width - q));
        let overlap = window.overlap;

        if overlap > best_overlap {
            best_overlap = overlap;
            candidates.clear();
            candidates.push(s);
        } else if overlap == best_overlap && candidates.len() < MAX_ANCHOR_CANDIDATES {
            candidates.push(s);
        }
    }

    let best = candidates
        .into_iter()
        .map(|s| (s, similarity_chars(&hay[s..s + width], nee)))
        .fold((0usize, -1.0f64), |acc, cur| if cur.1 > acc.1 { cur } else { acc });

    (best.0, best.0 + width)
}

/// Hill-climb the window boundaries while the score improves, halving the
/// stride from a quarter of the needle down to one char.
fn refine(hay: &[char], nee: &[char], mut start: usize, mut end: usize) -> (usize, usize, f64) {
    let mut score = similarity_chars(&hay[start..end], nee);
    let mut stride = (nee.len() / 4).max(1);

    loop {
        loop {
            let mut improved: Option<(usize, usize)> = None;

            for (s, e) in neighbours(start, end, hay.len(), stride) {
                if let Some(candidate) = score_above(&hay[s..e], nee, score) {
                    score = candidate;
                    improved = Some((s, e));
                }
            }

            match improved {
                Some((s, e)) => {
                    start = s;
                    end = e;
                }
                None => break,
            }
        }

        if stride == 1 {
            break;
        }
        stride /= 2;
    }

    (start, end, score)
}

/// Similarity of `window` to `nee` when it beats `floor`.
fn score_above(window: &[char], nee: &[char], floor: f64) -> Option<f64> {
    let longest = window.len().max(nee.len());
    if longest == 0 {
        return None;
    }

    // A distance above this cannot score higher than `floor`
    let limit = ((1.0 - floor) * longest as f64).floor() as usize;
    let distance = levenshtein_within(window, nee, limit)?;
    let candidate = 1.0 - distance as f64 / longest as f64;
    (candidate > floor).then_some(candidate)
}

/// Boundary moves by `step` chars that keep `start <= end <= len`.
fn neighbours(start: usize, end: usize, len: usize, step: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::with_capacity(6);
    if start >= step {
        out.push((start - step, end)); // grow left
        out.push((start - step, end - step)); // shift left
    }
    if end + step <= len {
        out.push((start, end + step)); // grow right
        out.push((start + step, end + step)); // shift right
    }
    if start + step <= end {
        out.push((start + step, end)); // shrink left
        out.push((start, end - step)); // shrink right
    }
    out
}
