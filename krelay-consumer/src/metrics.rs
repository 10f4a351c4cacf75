//! Processed-message counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Outcome of one consumed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessStatus {
    /// Handler succeeded
    Ok,
    /// Handler failed for good (strict halts, loose skips)
    HandlerError,
    /// Commit failed for good
    CommitError,
    /// Skipped as older than the configured age
    SkippedOld,
}

impl ProcessStatus {
    /// Label used in logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::HandlerError => "HANDLER_ERROR",
            Self::CommitError => "COMMIT_ERROR",
            Self::SkippedOld => "SKIPPED_OLD",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free counters shared by every consumer of one facade.
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    ok: AtomicU64,
    handler_error: AtomicU64,
    commit_error: AtomicU64,
    skipped_old: AtomicU64,
    handling_time_us: AtomicU64,
}

impl ConsumerMetrics {
    /// Empty counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one message with `status`.
    pub fn record(&self, status: ProcessStatus) {
        let counter = match status {
            ProcessStatus::Ok => &self.ok,
            ProcessStatus::HandlerError => &self.handler_error,
            ProcessStatus::CommitError => &self.commit_error,
            ProcessStatus::SkippedOld => &self.skipped_old,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add the handling time of a successful message.
    pub fn record_latency(&self, elapsed: Duration) {
        self.handling_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ok: self.ok.load(Ordering::Relaxed),
            handler_error: self.handler_error.load(Ordering::Relaxed),
            commit_error: self.commit_error.load(Ordering::Relaxed),
            skipped_old: self.skipped_old.load(Ordering::Relaxed),
            handling_time: Duration::from_micros(self.handling_time_us.load(Ordering::Relaxed)),
        }
    }
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Messages handled successfully
    pub ok: u64,
    /// Messages whose handler failed for good
    pub handler_error: u64,
    /// Messages whose commit failed for good
    pub commit_error: u64,
    /// Messages skipped as too old
    pub skipped_old: u64,
    /// Total handling time of successful messages
    pub handling_time: Duration,
}

impl MetricsSnapshot {
    /// Count for one status
    #[must_use]
    pub const fn count(&self, status: ProcessStatus) -> u64 {
        match status {
            ProcessStatus::Ok => self.ok,
            ProcessStatus::HandlerError => self.handler_error,
            ProcessStatus::CommitError => self.commit_error,
            ProcessStatus::SkippedOld => self.skipped_old,
        }
    }

    /// Messages seen, whatever their outcome
    #[must_use]
    pub const fn processed(&self) -> u64 {
        self.ok + self.handler_error + self.commit_error + self.skipped_old
    }

    /// Mean handling time of successful messages
    #[must_use]
    pub fn average_handling_time(&self) -> Duration {
        if self.ok == 0 {
            return Duration::ZERO;
        }
        self.handling_time / u32::try_from(self.ok).unwrap_or(u32::MAX)
    }
}
