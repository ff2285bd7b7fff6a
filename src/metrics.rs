//! Scan and write counters.
//!
//! A [`MetricsCollector`] is a cheap, cloneable handle onto a shared set of
//! named `u64` counters. Every [`Scanner`](crate::scanner::Scanner) owns one;
//! format readers and the dataset writer bump counters as they go, and callers
//! can read a snapshot or dump it as JSON afterwards.
//!
//! ```
//! use strata::metrics::{MetricsCollector, ROWS_READ};
//!
//! let metrics = MetricsCollector::new();
//! metrics.increment_counter(ROWS_READ, 10);
//! metrics.increment_counter(ROWS_READ, 5);
//! assert_eq!(metrics.counter(ROWS_READ), 15);
//! ```

use crate::error::{Error, Result};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Fragments whose files were opened by a scan.
pub const FRAGMENTS_SCANNED: &str = "fragments_scanned";
/// Fragments skipped by partition pruning, without I/O.
pub const FRAGMENTS_PRUNED: &str = "fragments_pruned";
/// Row groups considered by statistics-capable formats.
pub const ROW_GROUPS_TOTAL: &str = "row_groups_total";
/// Row groups skipped because their statistics ruled out the filter.
pub const ROW_GROUPS_PRUNED: &str = "row_groups_pruned";
/// Physical batches decoded.
pub const BATCHES_READ: &str = "batches_read";
/// Physical rows decoded, before filtering.
pub const ROWS_READ: &str = "rows_read";
/// Files completed by the dataset writer.
pub const FILES_WRITTEN: &str = "files_written";
/// Rows handed to format writers.
pub const ROWS_WRITTEN: &str = "rows_written";

/// Thread-safe handle onto a set of counters.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsInner>>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    counters: BTreeMap<String, u64>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_start(&self) {
        self.lock().start_time = Some(Instant::now());
    }

    pub fn record_end(&self) {
        self.lock().end_time = Some(Instant::now());
    }

    /// Time between [`record_start`](Self::record_start) and [`record_end`](Self::record_end).
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.start_time, inner.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    /// Add `value` to a counter, creating it at zero first if needed.
    pub fn increment_counter(&self, name: &str, value: u64) {
        *self.lock().counters.entry(name.to_string()).or_default() += value;
    }

    pub fn set_counter(&self, name: &str, value: u64) {
        self.lock().counters.insert(name.to_string(), value);
    }

    /// Current value, zero for counters never touched.
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.lock().counters.clone()
    }

    /// Counters plus elapsed time as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let counters = self.snapshot();
        let mut out = json!({ "counters": counters });
        if let Some(elapsed) = self.elapsed() {
            out["elapsed_ms"] = json!(elapsed.as_secs_f64() * 1000.0);
        }
        out
    }

    /// Write [`to_json`](Self::to_json) to a local file.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be written.
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.to_json())
            .map_err(|e| Error::format(path, e))?;
        std::fs::write(path, text).map_err(|e| Error::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = MetricsCollector::new();
        let clone = metrics.clone();
        clone.increment_counter(BATCHES_READ, 3);
        metrics.set_counter(ROWS_READ, 7);
        assert_eq!(metrics.counter(BATCHES_READ), 3);
        assert_eq!(clone.counter(ROWS_READ), 7);
        assert_eq!(metrics.counter(FRAGMENTS_PRUNED), 0);
        assert_eq!(metrics.to_json()["counters"][ROWS_READ], json!(7));
    }
}
