use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct ForwarderStats {
    pub samples_parsed: AtomicU64,
    pub lines_ignored: AtomicU64,
    pub flushes_ok: AtomicU64,
    pub flushes_failed: AtomicU64,
    pub metrics_sent: AtomicU64,
    pub samples_dropped: AtomicU64,
    pub last_flush_unix: AtomicI64,
    pub last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub buffered_samples: usize,
    pub samples_parsed: u64,
    pub lines_ignored: u64,
    pub flushes_ok: u64,
    pub flushes_failed: u64,
    pub metrics_sent: u64,
    pub samples_dropped: u64,
    pub flush_in_flight: bool,
    pub last_flush_at: Option<i64>,
    pub last_error: Option<String>,
}

impl ForwarderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_flush_ok(&self, metrics: usize, at_unix: i64) {
        self.flushes_ok.fetch_add(1, Ordering::Relaxed);
        self.metrics_sent.fetch_add(metrics as u64, Ordering::Relaxed);
        self.last_flush_unix.store(at_unix, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn record_flush_failed(&self, err: impl Into<String>) {
        self.flushes_failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn record_dropped(&self, dropped: usize) {
        if dropped > 0 {
            self.samples_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, buffered_samples: usize, flush_in_flight: bool) -> StatsSnapshot {
        let last_flush = self.last_flush_unix.load(Ordering::Relaxed);
        StatsSnapshot {
            buffered_samples,
            samples_parsed: self.samples_parsed.load(Ordering::Relaxed),
            lines_ignored: self.lines_ignored.load(Ordering::Relaxed),
            flushes_ok: self.flushes_ok.load(Ordering::Relaxed),
            flushes_failed: self.flushes_failed.load(Ordering::Relaxed),
            metrics_sent: self.metrics_sent.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            flush_in_flight,
            last_flush_at: (last_flush > 0).then_some(last_flush),
            last_error: self.last_error.lock().ok().and_then(|guard| guard.clone()),
        }
    }
}
