//! Lightweight performance timers
//!
//! Named duration aggregation for the hot pipeline stages (stt, llm,
//! tts). Snapshots are surfaced by the `perf` CLI command.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Default, Clone)]
struct Stat {
    count: u64,
    total: Duration,
    max: Duration,
}

/// Aggregated timings keyed by stage name.
#[derive(Debug, Default)]
pub struct PerfMonitor {
    stats: Mutex<HashMap<String, Stat>>,
}

/// One line of a perf snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PerfEntry {
    pub name: String,
    pub count: u64,
    pub avg_ms: f64,
    pub max_ms: f64,
}

impl PerfMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one measured duration under `name`.
    pub fn record(&self, name: &str, elapsed: Duration) {
        let mut stats = self.stats.lock();
        let stat = stats.entry(name.to_string()).or_default();
        stat.count += 1;
        stat.total += elapsed;
        stat.max = stat.max.max(elapsed);
    }

    /// Time a closure and record it.
    pub fn time<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record(name, start.elapsed());
        out
    }

    /// Snapshot sorted by stage name.
    pub fn snapshot(&self) -> Vec<PerfEntry> {
        let stats = self.stats.lock();
        let mut entries: Vec<PerfEntry> = stats
            .iter()
            .map(|(name, s)| PerfEntry {
                name: name.clone(),
                count: s.count,
                avg_ms: if s.count == 0 {
                    0.0
                } else {
                    s.total.as_secs_f64() * 1000.0 / s.count as f64
                },
                max_ms: s.max.as_secs_f64() * 1000.0,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}
