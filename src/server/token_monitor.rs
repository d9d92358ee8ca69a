use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub cleanup_interval: Duration,
    pub health_check_interval: Duration,
    pub stats_interval: Duration,
    pub blacklist_threshold: u64,
    pub refresh_token_threshold: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(60 * 60),
            health_check_interval: Duration::from_secs(5 * 60),
            stats_interval: Duration::from_secs(10 * 60),
            blacklist_threshold: 10_000,
            refresh_token_threshold: 50_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorTask {
    Cleanup,
    HealthCheck,
    Stats,
}

#[derive(Debug)]
struct MonitorState {
    store_status: StoreStatus,
    store_error: Option<String>,
    last_health_check: Option<DateTime<Utc>>,
    last_stats: Option<StoreStats>,
    last_cleanup: Option<CleanupReport>,
    anomalies: Vec<Anomaly>,
}

/// Background reconciler for the session keyspace.
///
/// Runs three independent loops (cleanup, health check, stats) that share
/// one cancellation token. `start` and `stop` are safe to call concurrently
/// and report whether they changed state.
pub struct TokenMonitor {
    session_store: Arc<dyn SessionStore>,
    sink: Arc<dyn MonitoringSink>,
    cfg: MonitorConfig,
    running: Mutex<Option<CancellationToken>>,
    state: RwLock<MonitorState>,
}

impl TokenMonitor {
    pub fn new(
        session_store: Arc<dyn SessionStore>,
        sink: Arc<dyn MonitoringSink>,
        cfg: MonitorConfig,
    ) -> Self {
        Self {
            session_store,
            sink,
            cfg,
            running: Mutex::new(None),
            state: RwLock::new(MonitorState {
                store_status: StoreStatus::Unknown,
                store_error: None,
                last_health_check: None,
                last_stats: None,
                last_cleanup: None,
                anomalies: Vec::new(),
            }),
        }
    }

    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        for task in [
            MonitorTask::Cleanup,
            MonitorTask::HealthCheck,
            MonitorTask::Stats,
        ] {
            tokio::spawn(self.clone().run_loop(task, cancel.clone()));
        }
        *running = Some(cancel);

        info!("token monitor started");
        true
    }

    /// Signals every loop to exit. Loops finish their current pass first and
    /// are not joined.
    pub fn stop(&self) -> bool {
        let cancel = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match cancel {
            Some(cancel) => {
                cancel.cancel();
                info!("token monitor stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn period(&self, task: MonitorTask) -> Duration {
        match task {
            MonitorTask::Cleanup => self.cfg.cleanup_interval,
            MonitorTask::HealthCheck => self.cfg.health_check_interval,
            MonitorTask::Stats => self.cfg.stats_interval,
        }
    }

    async fn run_loop(self: Arc<Self>, task: MonitorTask, cancel: CancellationToken) {
        let period = self.period(task);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(?task, "monitor loop exiting");
                    break;
                }
                _ = ticker.tick() => match task {
                    MonitorTask::Cleanup => {
                        self.perform_cleanup().await;
                    }
                    MonitorTask::HealthCheck => self.perform_health_check().await,
                    MonitorTask::Stats => self.collect_stats().await,
                },
            }
        }
    }

    async fn perform_cleanup(&self) -> CleanupReport {
        let started_at = Utc::now();
        info!("token cleanup started");

        let mut errors = Vec::new();
        let unbounded_blacklist_purged = match self.session_store.purge_unbounded_blacklist().await
        {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "failed to purge blacklist entries without expiry");
                errors.push(format!("blacklist purge: {e}"));
                0
            }
        };
        let sessions = match self.session_store.reconcile_session_sets().await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "failed to reconcile session sets");
                errors.push(format!("session reconcile: {e}"));
                ReconcileReport::default()
            }
        };

        let report = CleanupReport {
            started_at,
            finished_at: Utc::now(),
            unbounded_blacklist_purged,
            sessions,
            errors,
        };
        info!(
            purged = report.unbounded_blacklist_purged,
            members_removed = report.sessions.members_removed,
            sets_deleted = report.sessions.sets_deleted,
            success = report.is_success(),
            "token cleanup finished"
        );
        self.write_state(|s| s.last_cleanup = Some(report.clone()));
        report
    }

    async fn perform_health_check(&self) {
        let now = Utc::now();
        if let Err(e) = self.session_store.ping().await {
            error!(error = %e, "session store health check failed");
            self.write_state(|s| {
                s.store_status = StoreStatus::Unhealthy;
                s.store_error = Some(e.to_string());
                s.last_health_check = Some(now);
            });
            return;
        }
        self.write_state(|s| {
            s.store_status = StoreStatus::Healthy;
            s.store_error = None;
            s.last_health_check = Some(now);
        });

        match self.session_store.stats().await {
            Ok(stats) => {
                let anomalies = self.detect_anomalies(&stats);
                self.write_state(|s| {
                    s.last_stats = Some(stats);
                    s.anomalies = anomalies;
                });
            }
            Err(e) => warn!(error = %e, "failed to read token stats during health check"),
        }
    }

    async fn collect_stats(&self) {
        let stats = match self.session_store.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "failed to collect token stats");
                return;
            }
        };
        info!(
            blacklist = stats.blacklist_count,
            refresh_tokens = stats.refresh_token_count,
            user_sessions = stats.user_sessions_count,
            online_users = stats.online_users_count,
            "token stats"
        );

        let anomalies = self.detect_anomalies(&stats);
        if let Err(e) = self.sink.publish(&stats, &anomalies).await {
            warn!(error = %e, "failed to publish token stats");
        }
        self.write_state(|s| {
            s.last_stats = Some(stats);
            s.anomalies = anomalies;
        });
    }

    fn detect_anomalies(&self, stats: &StoreStats) -> Vec<Anomaly> {
        let checks = [
            (
                AnomalyKind::BlacklistOverThreshold,
                stats.blacklist_count,
                self.cfg.blacklist_threshold,
            ),
            (
                AnomalyKind::RefreshTokensOverThreshold,
                stats.refresh_token_count,
                self.cfg.refresh_token_threshold,
            ),
        ];
        checks
            .into_iter()
            .filter(|(_, observed, threshold)| observed > threshold)
            .map(|(kind, observed, threshold)| {
                warn!(?kind, observed, threshold, "token anomaly detected");
                Anomaly {
                    kind,
                    observed,
                    threshold,
                }
            })
            .collect()
    }

    fn write_state(&self, f: impl FnOnce(&mut MonitorState)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }

    /// Runs one cleanup pass on the caller's task.
    pub async fn force_cleanup(&self) -> CleanupReport {
        info!("forced token cleanup requested");
        self.perform_cleanup().await
    }

    pub async fn health_snapshot(&self) -> HealthSnapshot {
        let store_error = self.session_store.ping().await.err().map(|e| e.to_string());
        let store_healthy = store_error.is_none();
        let monitor_running = self.is_running();
        HealthSnapshot {
            store_healthy,
            store_error,
            monitor_running,
            overall_healthy: store_healthy && monitor_running,
            checked_at: Utc::now(),
        }
    }

    pub async fn monitoring_snapshot(&self) -> MonitoringSnapshot {
        let live = self.session_store.stats().await;
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let (stats, store_status, store_error) = match live {
            Ok(stats) => (Some(stats), StoreStatus::Healthy, None),
            Err(e) => (
                state.last_stats.clone(),
                StoreStatus::Unhealthy,
                Some(e.to_string()),
            ),
        };
        MonitoringSnapshot {
            stats,
            store_status,
            store_error,
            monitor_running: self.is_running(),
            last_check: Utc::now(),
            last_health_check: state.last_health_check,
            last_cleanup: state.last_cleanup.clone(),
            anomalies: state.anomalies.clone(),
        }
    }

    /// Status recorded by the most recent health-check tick.
    pub fn last_store_status(&self) -> StoreStatus {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .store_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::{KvSessionStore, SessionStoreConfig};
    use crate::infra_memory::InMemoryKvStore;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        published: StdMutex<Vec<(StoreStats, Vec<Anomaly>)>>,
    }

    #[async_trait::async_trait]
    impl MonitoringSink for RecordingSink {
        async fn publish(&self, stats: &StoreStats, anomalies: &[Anomaly]) -> anyhow::Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((stats.clone(), anomalies.to_vec()));
            Ok(())
        }
    }

    fn monitor(cfg: MonitorConfig) -> (Arc<InMemoryKvStore>, Arc<RecordingSink>, Arc<TokenMonitor>) {
        let kv = Arc::new(InMemoryKvStore::new());
        let store = Arc::new(KvSessionStore::new(kv.clone(), SessionStoreConfig::default()));
        let sink = Arc::new(RecordingSink::default());
        let monitor = Arc::new(TokenMonitor::new(store, sink.clone(), cfg));
        (kv, sink, monitor)
    }

    #[tokio::test]
    async fn start_and_stop_report_state_changes() {
        let (_, _, monitor) = monitor(MonitorConfig::default());
        assert!(!monitor.is_running());
        assert!(monitor.start());
        assert!(!monitor.start());
        assert!(monitor.is_running());
        assert!(monitor.stop());
        assert!(!monitor.stop());
        assert!(!monitor.is_running());
        // A stopped monitor can be started again.
        assert!(monitor.start());
        assert!(monitor.stop());
    }

    #[tokio::test]
    async fn concurrent_starts_launch_once() {
        let (_, _, monitor) = monitor(MonitorConfig::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let monitor = monitor.clone();
                tokio::spawn(async move { monitor.start() })
            })
            .collect();
        let mut started = 0;
        for handle in handles {
            if handle.await.unwrap() {
                started += 1;
            }
        }
        assert_eq!(started, 1);
        assert!(monitor.stop());
    }

    #[tokio::test]
    async fn anomalies_flag_counts_over_threshold() {
        let (_, _, monitor) = monitor(MonitorConfig {
            blacklist_threshold: 10,
            refresh_token_threshold: 100,
            ..MonitorConfig::default()
        });
        let stats = StoreStats {
            blacklist_count: 11,
            refresh_token_count: 100,
            user_sessions_count: 0,
            online_users_count: 0,
            collected_at: Utc::now(),
        };
        let anomalies = monitor.detect_anomalies(&stats);
        assert_eq!(
            anomalies,
            vec![Anomaly {
                kind: AnomalyKind::BlacklistOverThreshold,
                observed: 11,
                threshold: 10,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stats_loop_publishes_to_sink() {
        let (kv, sink, monitor) = monitor(MonitorConfig {
            stats_interval: Duration::from_secs(10),
            blacklist_threshold: 0,
            ..MonitorConfig::default()
        });
        kv.set_ex("blacklist:x", "{}", Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(monitor.start());
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(monitor.stop());

        let published = sink.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0.blacklist_count, 1);
        assert_eq!(published[0].1.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_marks_store_unhealthy() {
        let (kv, _, monitor) = monitor(MonitorConfig {
            health_check_interval: Duration::from_secs(5),
            ..MonitorConfig::default()
        });
        assert_eq!(monitor.last_store_status(), StoreStatus::Unknown);

        kv.set_available(false);
        assert!(monitor.start());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(monitor.last_store_status(), StoreStatus::Unhealthy);

        kv.set_available(true);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(monitor.last_store_status(), StoreStatus::Healthy);
        assert!(monitor.stop());
    }

    #[tokio::test]
    async fn snapshots_reflect_store_and_running_state() {
        let (kv, _, monitor) = monitor(MonitorConfig::default());

        let health = monitor.health_snapshot().await;
        assert!(health.store_healthy);
        assert!(!health.monitor_running);
        assert!(!health.overall_healthy);

        assert!(monitor.start());
        kv.set_available(false);
        let health = monitor.health_snapshot().await;
        assert!(!health.store_healthy);
        assert!(health.store_error.is_some());

        let snapshot = monitor.monitoring_snapshot().await;
        assert_eq!(snapshot.store_status, StoreStatus::Unhealthy);
        assert!(snapshot.monitor_running);
        assert!(monitor.stop());
    }

    #[tokio::test]
    async fn force_cleanup_records_its_report() {
        let (kv, _, monitor) = monitor(MonitorConfig::default());
        kv.set_persistent("blacklist:stale", "{}");

        let report = monitor.force_cleanup().await;
        assert!(report.is_success());
        assert_eq!(report.unbounded_blacklist_purged, 1);

        let snapshot = monitor.monitoring_snapshot().await;
        assert_eq!(snapshot.last_cleanup, Some(report));
    }
}
