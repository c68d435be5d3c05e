//! Logging setup and in-process counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `default_directive` (normally `[telemetry] log_level`).
/// Calling this twice is harmless; the second install is ignored.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    upload_sessions_issued: AtomicU64,
    multipart_sessions_issued: AtomicU64,
    files_committed: AtomicU64,
    files_deleted: AtomicU64,
    commit_rejections: AtomicU64,
    backend_retries: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_session_issued(&self, multipart: bool) {
        self.upload_sessions_issued.fetch_add(1, Ordering::Relaxed);
        if multipart {
            self.multipart_sessions_issued.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(counter = "upload_sessions_issued", multipart, "Metric incremented");
    }

    pub fn file_committed(&self) {
        self.files_committed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "files_committed", "Metric incremented");
    }

    pub fn file_deleted(&self) {
        self.files_deleted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "files_deleted", "Metric incremented");
    }

    pub fn commit_rejected(&self) {
        self.commit_rejections.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "commit_rejections", "Metric incremented");
    }

    pub fn backend_retried(&self) {
        self.backend_retries.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "backend_retries", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            upload_sessions_issued: self.upload_sessions_issued.load(Ordering::Relaxed),
            multipart_sessions_issued: self.multipart_sessions_issued.load(Ordering::Relaxed),
            files_committed: self.files_committed.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            commit_rejections: self.commit_rejections.load(Ordering::Relaxed),
            backend_retries: self.backend_retries.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub upload_sessions_issued: u64,
    pub multipart_sessions_issued: u64,
    pub files_committed: u64,
    pub files_deleted: u64,
    pub commit_rejections: u64,
    pub backend_retries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.upload_session_issued(false);
        metrics.upload_session_issued(true);
        metrics.file_committed();
        metrics.commit_rejected();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.upload_sessions_issued, 2);
        assert_eq!(snapshot.multipart_sessions_issued, 1);
        assert_eq!(snapshot.files_committed, 1);
        assert_eq!(snapshot.commit_rejections, 1);
        assert_eq!(snapshot.files_deleted, 0);
    }
}
