//! Line-level diff computation with caching and large-input summarization.
//!
//! One pass of `similar`'s Myers diff produces both output shapes: the
//! structured line tags consumed by interactive display, and the
//! unified-diff text stored in review records. Inputs are tokenized into
//! lines *without* trailing-newline ambiguity, so two files differing only
//! in a trailing newline diff identically.
//!
//! Results are cached under a content hash; identical inputs always return
//! byte-identical results, and the second computation is a cache hit.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use similar::{capture_diff_slices, Algorithm, DiffOp};
use tracing::debug;

use crate::cache::ContentCache;
use crate::error::InvalidInputError;
use crate::perf::PerformanceMonitor;

/// Inputs larger than this many bytes get a summarized diff.
pub const DEFAULT_LARGE_INPUT_THRESHOLD: usize = 100_000;

/// Context lines on each side of a change in the unified output.
const UNIFIED_CONTEXT: usize = 3;

/// Lines sampled from the head and tail of each side in summarized mode.
const SUMMARY_SAMPLE_LINES: usize = 10;

/// Classification of one line in a structured diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLineTag {
    Unchanged,
    Added,
    Removed,
    /// Old-side line of a replaced region. The replacement text follows as
    /// `Added` lines.
    Modified,
}

/// One line of a structured diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub tag: DiffLineTag,
    pub text: String,
}

/// Per-tag line counts for a computed diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffCounts {
    pub unchanged: usize,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

/// The result of one diff computation.
///
/// `summarized` is `true` when either input exceeded the large-input
/// threshold: `lines` then holds a bounded sample rather than the full
/// structural diff, and `counts` reports multiset add/remove totals
/// without attributing modifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    pub lines: Vec<DiffLine>,
    pub unified: String,
    pub counts: DiffCounts,
    pub summarized: bool,
}

impl DiffResult {
    fn approx_bytes(&self) -> usize {
        self.unified.len()
            + self.lines.iter().map(|line| line.text.len() + 16).sum::<usize>()
    }
}

/// Computes line-level differences between expected and generated code.
pub struct CodeDiffer {
    cache: Arc<ContentCache<DiffResult>>,
    monitor: Arc<PerformanceMonitor>,
    large_threshold: usize,
}

impl CodeDiffer {
    pub fn new(cache: Arc<ContentCache<DiffResult>>, monitor: Arc<PerformanceMonitor>) -> Self {
        Self { cache, monitor, large_threshold: DEFAULT_LARGE_INPUT_THRESHOLD }
    }

    pub fn with_large_threshold(mut self, threshold: usize) -> Self {
        self.large_threshold = threshold.max(1);
        self
    }

    /// Computes the diff of `generated` against `expected`.
    ///
    /// `expected = None` marks every generated line as added; no removal or
    /// modification tags appear. Deterministic: identical inputs produce
    /// identical results on every call, served from cache after the first.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidInputError`] when either input contains NUL bytes
    /// (binary content that slipped past the loaders). Fatal to this
    /// computation only.
    pub fn compute(
        &self,
        expected: Option<&str>,
        generated: &str,
    ) -> Result<Arc<DiffResult>, InvalidInputError> {
        if generated.contains('\0') {
            return Err(InvalidInputError("generated code contains NUL bytes".to_owned()));
        }
        if expected.is_some_and(|code| code.contains('\0')) {
            return Err(InvalidInputError("expected code contains NUL bytes".to_owned()));
        }

        let _timer = self.monitor.start("compute_diff");
        let key = cache_key(expected, generated);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let expected_text = expected.unwrap_or("");
        let result = if expected_text.len() > self.large_threshold
            || generated.len() > self.large_threshold
        {
            debug!(
                expected_bytes = expected_text.len(),
                generated_bytes = generated.len(),
                threshold = self.large_threshold,
                "input over threshold, computing summarized diff"
            );
            summarize(expected_text, generated, self.large_threshold)
        } else {
            full_diff(expected_text, generated)
        };

        let bytes = result.approx_bytes();
        Ok(self.cache.put(key, result, bytes))
    }

    /// Cache behavior counters, for sweeps and end-of-session reporting.
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }
}

/// Content-hash cache key. A marker byte keeps `None` distinct from
/// `Some("")`, and a separator keeps `("ab", "c")` distinct from
/// `("a", "bc")`.
fn cache_key(expected: Option<&str>, generated: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"diff-v1\0");
    match expected {
        Some(code) => {
            hasher.update([b'S']);
            hasher.update(code.as_bytes());
        }
        None => hasher.update([b'N']),
    }
    hasher.update([0u8]);
    hasher.update(generated.as_bytes());
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

/// A diff line event: marker plus indices into the old/new line vectors.
#[derive(Clone, Copy)]
struct LineEvent {
    marker: char, // ' ', '-', '+'
    old_index: Option<usize>,
    new_index: Option<usize>,
    modified: bool,
}

fn full_diff(expected: &str, generated: &str) -> DiffResult {
    let old_lines: Vec<&str> = expected.lines().collect();
    let new_lines: Vec<&str> = generated.lines().collect();
    let ops = capture_diff_slices(Algorithm::Myers, &old_lines, &new_lines);
    let events = flatten_ops(&ops);

    let mut lines = Vec::with_capacity(events.len());
    let mut counts = DiffCounts::default();
    for event in &events {
        let (tag, text) = match event.marker {
            ' ' => (DiffLineTag::Unchanged, old_lines[event.old_index.unwrap_or(0)]),
            '-' if event.modified => {
                (DiffLineTag::Modified, old_lines[event.old_index.unwrap_or(0)])
            }
            '-' => (DiffLineTag::Removed, old_lines[event.old_index.unwrap_or(0)]),
            _ => (DiffLineTag::Added, new_lines[event.new_index.unwrap_or(0)]),
        };
        match tag {
            DiffLineTag::Unchanged => counts.unchanged += 1,
            DiffLineTag::Added => counts.added += 1,
            DiffLineTag::Removed => counts.removed += 1,
            DiffLineTag::Modified => counts.modified += 1,
        }
        lines.push(DiffLine { tag, text: text.to_owned() });
    }

    let unified = unified_text(&events, &old_lines, &new_lines);
    DiffResult { lines, unified, counts, summarized: false }
}

/// Flattens diff ops into per-line events, treating a replaced region as
/// modified old lines followed by added new lines. Adjacent delete/insert
/// pairs are normalized to the same shape.
fn flatten_ops(ops: &[DiffOp]) -> Vec<LineEvent> {
    let mut events = Vec::new();
    let mut index = 0;
    while index < ops.len() {
        match ops[index] {
            DiffOp::Equal { old_index, new_index, len } => {
                for offset in 0..len {
                    events.push(LineEvent {
                        marker: ' ',
                        old_index: Some(old_index + offset),
                        new_index: Some(new_index + offset),
                        modified: false,
                    });
                }
                index += 1;
            }
            DiffOp::Replace { old_index, old_len, new_index, new_len } => {
                push_change(&mut events, old_index, old_len, new_index, new_len, true);
                index += 1;
            }
            DiffOp::Delete { old_index, old_len, .. } => {
                // A delete immediately followed by an insert is a
                // replacement split in two.
                if let Some(DiffOp::Insert { new_index, new_len, .. }) = ops.get(index + 1) {
                    push_change(&mut events, old_index, old_len, *new_index, *new_len, true);
                    index += 2;
                } else {
                    push_change(&mut events, old_index, old_len, 0, 0, false);
                    index += 1;
                }
            }
            DiffOp::Insert { new_index, new_len, .. } => {
                push_change(&mut events, 0, 0, new_index, new_len, false);
                index += 1;
            }
        }
    }
    events
}

fn push_change(
    events: &mut Vec<LineEvent>,
    old_index: usize,
    old_len: usize,
    new_index: usize,
    new_len: usize,
    modified: bool,
) {
    for offset in 0..old_len {
        events.push(LineEvent {
            marker: '-',
            old_index: Some(old_index + offset),
            new_index: None,
            modified,
        });
    }
    for offset in 0..new_len {
        events.push(LineEvent {
            marker: '+',
            old_index: None,
            new_index: Some(new_index + offset),
            modified: false,
        });
    }
}

/// Renders events as unified-diff text with `--- expected` / `+++ generated`
/// headers and hunks of [`UNIFIED_CONTEXT`] context lines. Identical inputs
/// render as the empty string.
fn unified_text(events: &[LineEvent], old_lines: &[&str], new_lines: &[&str]) -> String {
    let change_positions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, event)| event.marker != ' ')
        .map(|(position, _)| position)
        .collect();
    if change_positions.is_empty() {
        return String::new();
    }

    // Group changes into hunks: spans within 2*context of each other merge.
    let mut hunks: Vec<(usize, usize)> = Vec::new();
    for &position in &change_positions {
        let start = position.saturating_sub(UNIFIED_CONTEXT);
        let end = (position + UNIFIED_CONTEXT + 1).min(events.len());
        match hunks.last_mut() {
            Some((_, last_end)) if start <= *last_end => *last_end = end.max(*last_end),
            _ => hunks.push((start, end)),
        }
    }

    let mut out = String::from("--- expected\n+++ generated\n");
    for (start, end) in hunks {
        let slice = &events[start..end];
        let old_count = slice.iter().filter(|e| e.marker != '+').count();
        let new_count = slice.iter().filter(|e| e.marker != '-').count();
        let old_start = slice
            .iter()
            .find_map(|e| e.old_index)
            .map(|i| i + 1)
            .unwrap_or(0);
        let new_start = slice
            .iter()
            .find_map(|e| e.new_index)
            .map(|i| i + 1)
            .unwrap_or(0);
        let _ = writeln!(out, "@@ -{old_start},{old_count} +{new_start},{new_count} @@");
        for event in slice {
            let text = match event.marker {
                '+' => new_lines[event.new_index.unwrap_or(0)],
                _ => old_lines[event.old_index.unwrap_or(0)],
            };
            let _ = writeln!(out, "{}{}", event.marker, text);
        }
    }
    out
}

/// Bounded summary for inputs too large for a full structural diff.
///
/// Add/remove counts come from a multiset comparison (exact totals,
/// insensitive to line moves); `modified` is not attributed. The sample
/// keeps the head and tail of each side.
fn summarize(expected: &str, generated: &str, threshold: usize) -> DiffResult {
    let old_lines: Vec<&str> = expected.lines().collect();
    let new_lines: Vec<&str> = generated.lines().collect();

    let mut residual: HashMap<&str, i64> = HashMap::new();
    for line in &new_lines {
        *residual.entry(line).or_insert(0) += 1;
    }
    for line in &old_lines {
        *residual.entry(line).or_insert(0) -= 1;
    }
    let added: usize = residual.values().filter(|&&n| n > 0).sum::<i64>() as usize;
    let removed: usize = residual.values().filter(|&&n| n < 0).map(|n| -n).sum::<i64>() as usize;

    let counts = DiffCounts { unchanged: 0, added, removed, modified: 0 };

    let mut lines = Vec::new();
    let mut unified = String::new();
    let _ = writeln!(unified, "=== summarized diff (inputs exceed {threshold} bytes) ===");
    let _ = writeln!(unified, "expected lines: {}", old_lines.len());
    let _ = writeln!(unified, "generated lines: {}", new_lines.len());
    let _ = writeln!(unified, "added lines: {added}");
    let _ = writeln!(unified, "removed lines: {removed}");
    push_sample(&mut unified, &mut lines, "expected", &old_lines, DiffLineTag::Removed, '-');
    push_sample(&mut unified, &mut lines, "generated", &new_lines, DiffLineTag::Added, '+');
    let _ = writeln!(unified, "=== end summary ===");

    DiffResult { lines, unified, counts, summarized: true }
}

fn push_sample(
    unified: &mut String,
    lines: &mut Vec<DiffLine>,
    label: &str,
    source: &[&str],
    tag: DiffLineTag,
    marker: char,
) {
    if source.is_empty() {
        return;
    }
    let head = source.len().min(SUMMARY_SAMPLE_LINES);
    let _ = writeln!(unified, "{marker}{marker}{marker} {label} (first {head} lines) {marker}{marker}{marker}");
    for line in &source[..head] {
        let _ = writeln!(unified, "{marker}{line}");
        lines.push(DiffLine { tag, text: (*line).to_owned() });
    }
    if source.len() > SUMMARY_SAMPLE_LINES * 2 {
        let tail = &source[source.len() - SUMMARY_SAMPLE_LINES..];
        let _ = writeln!(unified, "{marker}{marker}{marker} {label} (last {SUMMARY_SAMPLE_LINES} lines) {marker}{marker}{marker}");
        for line in tail {
            let _ = writeln!(unified, "{marker}{line}");
            lines.push(DiffLine { tag, text: (*line).to_owned() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn differ() -> CodeDiffer {
        let cache = Arc::new(ContentCache::new(64, 1024 * 1024));
        CodeDiffer::new(cache, Arc::new(PerformanceMonitor::new()))
    }

    #[test]
    fn reformatted_line_reports_one_modified_and_two_added() {
        let result = differ()
            .compute(Some("def f(): return 1\n"), "def f():\n    return 1\n")
            .unwrap();

        let modified: Vec<_> =
            result.lines.iter().filter(|l| l.tag == DiffLineTag::Modified).collect();
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].text, "def f(): return 1");
        assert_eq!(result.counts.added, 2);
        assert_eq!(result.counts.removed, 0);

        assert!(result.unified.contains("-def f(): return 1"));
        let plus_lines = result
            .unified
            .lines()
            .filter(|line| line.starts_with('+') && !line.starts_with("+++"))
            .count();
        assert_eq!(plus_lines, 2);
    }

    #[test]
    fn second_compute_is_a_cache_hit_with_identical_result() {
        let differ = differ();
        let first = differ.compute(Some("a\nb\n"), "a\nc\n").unwrap();
        let second = differ.compute(Some("a\nb\n"), "a\nc\n").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(differ.cache_stats().hits, 1);

        // A fresh differ computes the same bytes.
        let other = super::full_diff("a\nb\n", "a\nc\n");
        assert_eq!(*first, other);
    }

    #[test]
    fn missing_expected_marks_every_line_added() {
        let result = differ().compute(None, "x = 1\ny = 2\n").unwrap();
        assert_eq!(result.lines.len(), 2);
        assert!(result.lines.iter().all(|l| l.tag == DiffLineTag::Added));
        assert_eq!(result.counts.removed + result.counts.modified, 0);
        assert_eq!(result.counts.added, 2);
    }

    #[test]
    fn trailing_newline_does_not_change_the_diff() {
        let with = differ().compute(Some("a\nb\n"), "a\nb\n").unwrap();
        let without = differ().compute(Some("a\nb"), "a\nb\n").unwrap();
        assert_eq!(with.lines, without.lines);
        assert_eq!(with.unified, without.unified);
        assert!(with.unified.is_empty());
    }

    #[test]
    fn identical_inputs_produce_empty_unified_diff() {
        let result = differ().compute(Some("same\n"), "same\n").unwrap();
        assert!(result.unified.is_empty());
        assert_eq!(result.counts.unchanged, 1);
    }

    #[test]
    fn pure_removal_is_tagged_removed_not_modified() {
        let result = differ().compute(Some("a\nb\nc\n"), "a\nc\n").unwrap();
        assert_eq!(result.counts.removed, 1);
        assert_eq!(result.counts.modified, 0);
        assert_eq!(result.counts.unchanged, 2);
    }

    #[test]
    fn oversized_input_is_summarized_not_truncated_silently() {
        let cache = Arc::new(ContentCache::new(8, 1024 * 1024));
        let differ = CodeDiffer::new(cache, Arc::new(PerformanceMonitor::new()))
            .with_large_threshold(64);

        let generated: String =
            (0..100).map(|n| format!("line number {n}\n")).collect();
        let result = differ.compute(Some("line number 0\n"), &generated).unwrap();

        assert!(result.summarized);
        assert!(result.unified.contains("summarized diff"));
        assert_eq!(result.counts.added, 99);
        assert_eq!(result.counts.removed, 0);
        assert!(!result.lines.is_empty());
    }

    #[test]
    fn nul_bytes_fail_fast() {
        let err = differ().compute(Some("ok"), "bad\0binary").unwrap_err();
        assert!(err.to_string().contains("NUL"));
        assert!(differ().compute(Some("bad\0"), "ok").is_err());
    }

    #[test]
    fn unified_hunk_headers_carry_line_numbers() {
        let expected = "one\ntwo\nthree\nfour\nfive\nsix\nseven\neight\nnine\nten\n";
        let generated = "one\ntwo\nthree\nfour\nfive\nsix\nseven\neight\nnine\nCHANGED\n";
        let result = differ().compute(Some(expected), generated).unwrap();
        assert!(result.unified.starts_with("--- expected\n+++ generated\n"));
        assert!(result.unified.contains("@@ -7,4 +7,4 @@"));
    }
}
