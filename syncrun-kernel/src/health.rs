use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::task;

use crate::reconciler::ReconcileReport;
use crate::state::{new_state, Shared};
use crate::ticket_bridge::BridgeReport;

/// Rapport d'un cycle réussi
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub fetch_seconds: f64,
    pub update_seconds: f64,
    pub assets: ReconcileReport,
    pub tickets: Option<BridgeReport>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncHealth {
    pub uptime_seconds: u64,
    pub last_sync: Option<String>,
    pub cycles_ok: u64,
    pub cycles_failed: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_report: Option<serde_json::Value>,
}

#[derive(Default)]
struct Latest {
    last_sync: Option<OffsetDateTime>,
    last_error: Option<String>,
    last_report: Option<CycleReport>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    cycles_ok: Arc<AtomicU64>,
    cycles_failed: Arc<AtomicU64>,
    consecutive_failures: Arc<AtomicU32>,
    latest: Shared<Latest>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            cycles_ok: Arc::new(AtomicU64::new(0)),
            cycles_failed: Arc::new(AtomicU64::new(0)),
            consecutive_failures: Arc::new(AtomicU32::new(0)),
            latest: new_state(Latest::default()),
        }
    }

    pub fn record_success(&self, at: OffsetDateTime, report: CycleReport) {
        self.cycles_ok.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut latest = self.latest.lock();
        latest.last_sync = Some(at);
        latest.last_report = Some(report);
    }

    pub fn record_failure(&self, error: &str) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.latest.lock().last_error = Some(error.to_string());
    }

    /// Horodatage du dernier cycle réussi ; figé tant que les cycles échouent
    pub fn last_sync(&self) -> Option<OffsetDateTime> {
        self.latest.lock().last_sync
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.latest.lock().last_report.clone()
    }

    pub fn get_health(&self) -> SyncHealth {
        let latest = self.latest.lock();
        SyncHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            last_sync: latest.last_sync.and_then(|t| t.format(&Rfc3339).ok()),
            cycles_ok: self.cycles_ok.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_error: latest.last_error.clone(),
            last_report: latest
                .last_report
                .as_ref()
                .and_then(|r| serde_json::to_value(r).ok()),
        }
    }

    /// Journalise périodiquement l'état de santé
    pub fn spawn_health_reporter(&self, every: Duration) -> task::JoinHandle<()> {
        let health_tracker = self.clone();

        task::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let health = health_tracker.get_health();
                tracing::info!(
                    "[health] uptime {}s, last sync {}, cycles ok/failed {}/{}, consecutive failures {}",
                    health.uptime_seconds,
                    health.last_sync.as_deref().unwrap_or("never"),
                    health.cycles_ok,
                    health.cycles_failed,
                    health.consecutive_failures
                );
            }
        })
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_keep_last_sync() {
        let tracker = HealthTracker::new();
        let at = OffsetDateTime::UNIX_EPOCH;
        tracker.record_success(at, CycleReport::default());
        tracker.record_failure("source down");
        tracker.record_failure("source down");

        let health = tracker.get_health();
        assert_eq!(health.cycles_ok, 1);
        assert_eq!(health.cycles_failed, 2);
        assert_eq!(health.consecutive_failures, 2);
        assert_eq!(health.last_sync.as_deref(), Some("1970-01-01T00:00:00Z"));
        assert_eq!(health.last_error.as_deref(), Some("source down"));
        assert_eq!(tracker.last_sync(), Some(at));
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let tracker = HealthTracker::new();
        tracker.record_failure("boom");
        tracker.record_success(OffsetDateTime::UNIX_EPOCH, CycleReport::default());
        assert_eq!(tracker.get_health().consecutive_failures, 0);
        assert!(tracker.get_health().last_report.is_some());
    }
}
