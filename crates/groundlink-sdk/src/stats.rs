//! Per-message arrival statistics.
//!
//! Rates are cumulative averages over the life of a session: the first
//! arrival of an id opens its window, and the rate is simply
//! `count / elapsed`. No decay, no sliding window; monotonic and cheap,
//! reset wholesale on every disconnect.

use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
struct StatsEntry {
    count: u64,
    window_start: Instant,
}

/// Arrival counters keyed by message id.
#[derive(Debug, Default)]
pub struct MessageStats {
    entries: HashMap<u32, StatsEntry>,
}

impl MessageStats {
    /// Empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one arrival of `id`, opening its window on first sight.
    pub fn record(&mut self, id: u32) {
        let entry = self.entries.entry(id).or_insert_with(|| StatsEntry {
            count: 0,
            window_start: Instant::now(),
        });
        entry.count += 1;
    }

    /// Cumulative arrival rate of `id` in Hz.
    ///
    /// `0.0` for ids never recorded since the last reset, and when the
    /// elapsed window is not yet positive (guards an immediate query).
    pub fn rate(&self, id: u32) -> f64 {
        let Some(entry) = self.entries.get(&id) else {
            return 0.0;
        };
        let elapsed = entry.window_start.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        entry.count as f64 / elapsed
    }

    /// Number of arrivals recorded for `id` since the last reset.
    pub fn count(&self, id: u32) -> u64 {
        self.entries.get(&id).map_or(0, |e| e.count)
    }

    /// Forget everything; called on every disconnect.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}
