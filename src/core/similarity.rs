//! Normalized edit-distance similarity.
//!
//! `similarity(a, b) = 1 - levenshtein(a, b) / max(len(a), len(b))`, measured
//! in chars. The score is symmetric, 1.0 for equal inputs (including two empty
//! strings) and approaches 0.0 as the inputs share less structure.

/// Character-level Levenshtein distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    levenshtein_chars(&a, &b)
}

/// Levenshtein distance over pre-split char slices (two-row DP).
pub fn levenshtein_chars(a: &[char], b: &[char]) -> usize {
    // Keep the shorter side in the row to bound memory
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };

    if short.is_empty() {
        return long.len();
    }

    let mut prev: Vec<usize> = (0..=short.len()).collect();
    let mut curr = vec![0usize; short.len() + 1];

    for (i, lc) in long.iter().enumerate() {
        curr[0] = i + 1;
        for (j, sc) in short.iter().enumerate() {
            let cost = usize::from(lc != sc);
            curr[j + 1] = (prev[j] + cost) // substitute
                .min(prev[j + 1] + 1) // delete
                .min(curr[j] + 1); // insert
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[short.len()]
}

/// Levenshtein distance when it is at most `limit`, else `None`.
///
/// Only the diagonal band of width `2 * limit + 1` is filled, and the scan
/// stops as soon as a whole row exceeds `limit`, so the cost is
/// O(limit * len) rather than O(len^2).
pub fn levenshtein_within(a: &[char], b: &[char], limit: usize) -> Option<usize> {
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };

    if long.len() - short.len() > limit {
        return None;
    }
    if short.is_empty() {
        return Some(long.len());
    }

    let out = limit + 1;
    let mut prev: Vec<usize> = (0..=short.len()).map(|j| j.min(out)).collect();
    let mut curr = vec![out; short.len() + 1];

    for i in 1..=long.len() {
        let lo = i.saturating_sub(limit).max(1);
        let hi = (i + limit).min(short.len());

        curr[0] = i.min(out);
        curr[lo - 1] = if lo == 1 { curr[0] } else { out };
        let mut row_min = curr[lo - 1];

        for j in lo..=hi {
            let cost = usize::from(long[i - 1] != short[j - 1]);
            let cell = (prev[j - 1] + cost)
                .min(prev[j] + 1)
                .min(curr[j - 1] + 1)
                .min(out);
            curr[j] = cell;
            row_min = row_min.min(cell);
        }
        if hi < short.len() {
            curr[hi + 1] = out;
        }

        if row_min > limit {
            return None;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let distance = prev[short.len()];
    (distance <= limit).then_some(distance)
}

/// Normalized similarity ratio in [0.0, 1.0].
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    similarity_chars(&a, &b)
}

/// Similarity over pre-split char slices.
pub fn similarity_chars(a: &[char], b: &[char]) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }

    let distance = levenshtein_chars(a, b);
    1.0 - distance as f64 / longest as f64
}
