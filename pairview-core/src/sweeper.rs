//! Background cache sweeping.
//!
//! A dedicated thread owns the sweep loop for its lifetime and is spoken
//! to only over channels. It touches the content cache and nothing else:
//! session state is owned by the single-threaded review loop and is never
//! visible here, so a sweep can never affect review correctness.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::{debug, trace};

use crate::cache::ContentCache;

enum SweepCommand {
    SweepNow,
    Shutdown,
}

/// Handle to the sweep thread. Requests an orderly shutdown and joins the
/// thread on drop.
pub struct CacheSweeper {
    tx: Sender<SweepCommand>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl CacheSweeper {
    /// Spawns a sweeper over `cache`, waking every `interval`.
    pub fn spawn<V: Send + Sync + 'static>(
        cache: Arc<ContentCache<V>>,
        interval: Duration,
    ) -> Self {
        let (tx, rx) = bounded::<SweepCommand>(4);
        let handle = std::thread::spawn(move || {
            let ticker = tick(interval.max(Duration::from_millis(100)));
            loop {
                select! {
                    recv(rx) -> command => match command {
                        Ok(SweepCommand::SweepNow) => sweep(&cache),
                        Ok(SweepCommand::Shutdown) | Err(_) => break,
                    },
                    recv(ticker) -> _ => sweep(&cache),
                }
            }
            trace!("sweeper thread exiting");
        });
        Self { tx, handle: Some(handle) }
    }

    /// Asks for an immediate sweep without waiting for the next tick.
    pub fn sweep_now(&self) {
        let _ = self.tx.try_send(SweepCommand::SweepNow);
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        let _ = self.tx.send(SweepCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn sweep<V>(cache: &ContentCache<V>) {
    cache.trim_to_budget();
    let stats = cache.stats();
    debug!(
        entries = stats.entries,
        bytes = stats.bytes,
        hits = stats.hits,
        misses = stats.misses,
        evictions = stats.evictions,
        "cache sweep"
    );
}
