//! Lazy content materialization and chunked batch processing.
//!
//! Both utilities exist to keep peak memory bounded on arbitrarily large
//! inputs: the loader defers (and can avoid) full materialization of one
//! large value, the processor bounds how many items are in flight at once.

use std::sync::Mutex;

/// Default threshold above which content is previewed rather than fully
/// returned.
pub const DEFAULT_LARGE_CONTENT_THRESHOLD: usize = 10_000;

/// Characters of prefix included in a preview.
const PREVIEW_CHARS: usize = 2_000;

/// Wraps a content-producing thunk and decides preview-vs-full
/// materialization based on size.
///
/// `peek_size` is always cheap: it reports the size hint supplied at
/// construction (file metadata, column byte length) and never runs the
/// thunk. Content loaded once is retained, so repeated `get_content` calls
/// run the thunk at most once.
pub struct LazyContentLoader {
    size_hint: usize,
    large_threshold: usize,
    thunk: Box<dyn Fn() -> std::io::Result<String> + Send>,
    loaded: Mutex<Option<String>>,
}

impl LazyContentLoader {
    pub fn new<F>(size_hint: usize, thunk: F) -> Self
    where
        F: Fn() -> std::io::Result<String> + Send + 'static,
    {
        Self {
            size_hint,
            large_threshold: DEFAULT_LARGE_CONTENT_THRESHOLD,
            thunk: Box::new(thunk),
            loaded: Mutex::new(None),
        }
    }

    pub fn with_large_threshold(mut self, threshold: usize) -> Self {
        self.large_threshold = threshold.max(1);
        self
    }

    /// Size estimate without materializing the content.
    pub fn peek_size(&self) -> usize {
        self.size_hint
    }

    /// True when the content is expected to exceed the large threshold.
    pub fn is_large(&self) -> bool {
        self.size_hint > self.large_threshold
    }

    /// Returns the content. Small content (at or below the threshold) and
    /// forced requests come back in full; otherwise a prefix preview
    /// terminated by an explicit truncation marker, never a silently
    /// shortened string.
    pub fn get_content(&self, force_full: bool) -> std::io::Result<String> {
        let content = self.materialize()?;
        if force_full || content.chars().count() <= self.large_threshold {
            return Ok(content);
        }
        let shown: String = content.chars().take(PREVIEW_CHARS).collect();
        let total = content.chars().count();
        Ok(format!(
            "{shown}\n[... truncated: showing {} of {} characters ...]",
            shown.chars().count(),
            total
        ))
    }

    fn materialize(&self) -> std::io::Result<String> {
        let mut loaded = self.loaded.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(content) = loaded.as_ref() {
            return Ok(content.clone());
        }
        let content = (self.thunk)()?;
        *loaded = Some(content.clone());
        Ok(content)
    }
}

/// Applies a transformation to a sequence in fixed-size batches, yielding
/// results lazily.
///
/// Order is preserved. Items for which the transform returns `None`
/// (failed or filtered) are skipped without aborting the stream. Dropping
/// the iterator early loses only the batches that were never pulled:
/// nothing is processed ahead of demand beyond the current batch.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedProcessor {
    chunk_size: usize,
}

impl ChunkedProcessor {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size: chunk_size.max(1) }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn process<T, U, F>(&self, items: Vec<T>, transform: F) -> ChunkedResults<T, U, F>
    where
        F: FnMut(T) -> Option<U>,
    {
        ChunkedResults {
            items: items.into_iter(),
            chunk_size: self.chunk_size,
            buffered: std::collections::VecDeque::new(),
            transform,
        }
    }
}

/// Iterator returned by [`ChunkedProcessor::process`].
pub struct ChunkedResults<T, U, F> {
    items: std::vec::IntoIter<T>,
    chunk_size: usize,
    buffered: std::collections::VecDeque<U>,
    transform: F,
}

impl<T, U, F> Iterator for ChunkedResults<T, U, F>
where
    F: FnMut(T) -> Option<U>,
{
    type Item = U;

    fn next(&mut self) -> Option<U> {
        loop {
            if let Some(result) = self.buffered.pop_front() {
                return Some(result);
            }
            let mut pulled = false;
            for _ in 0..self.chunk_size {
                match self.items.next() {
                    Some(item) => {
                        pulled = true;
                        if let Some(result) = (self.transform)(item) {
                            self.buffered.push_back(result);
                        }
                    }
                    None => break,
                }
            }
            if !pulled {
                return None;
            }
            // A batch can transform to nothing; keep pulling batches.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn peek_size_never_runs_the_thunk() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let loader = LazyContentLoader::new(1234, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("content".to_owned())
        });
        assert_eq!(loader.peek_size(), 1234);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn small_content_returned_in_full() {
        let loader = LazyContentLoader::new(5, || Ok("small".to_owned()));
        assert_eq!(loader.get_content(false).unwrap(), "small");
    }

    #[test]
    fn large_content_previews_with_marker_unless_forced() {
        let big = "x".repeat(50_000);
        let big_clone = big.clone();
        let loader =
            LazyContentLoader::new(big.len(), move || Ok(big_clone.clone())).with_large_threshold(100);

        let preview = loader.get_content(false).unwrap();
        assert!(preview.len() < big.len());
        assert!(preview.contains("truncated"));
        assert!(preview.contains("50000"));

        assert_eq!(loader.get_content(true).unwrap(), big);
    }

    #[test]
    fn thunk_runs_at_most_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let loader = LazyContentLoader::new(3, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("abc".to_owned())
        });
        loader.get_content(false).unwrap();
        loader.get_content(true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn chunked_preserves_order_and_skips_failures() {
        let processor = ChunkedProcessor::new(3);
        let results: Vec<i32> = processor
            .process((0..10).collect(), |n| if n == 4 { None } else { Some(n * 2) })
            .collect();
        assert_eq!(results, vec![0, 2, 4, 6, 10, 12, 14, 16, 18]);
    }

    #[test]
    fn chunked_processes_only_pulled_batches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let processor = ChunkedProcessor::new(2);
        let mut iter = processor.process((0..10).collect::<Vec<i32>>(), move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(n)
        });
        iter.next();
        iter.next();
        // Two results pulled: exactly one batch of two transformed.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        drop(iter);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
