use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scan-based key counts. Eventually consistent, never transactionally exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub blacklist_count: u64,
    pub refresh_token_count: u64,
    pub user_sessions_count: u64,
    pub online_users_count: u64,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub sets_scanned: u64,
    pub members_removed: u64,
    pub sets_deleted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub unbounded_blacklist_purged: u64,
    pub sessions: ReconcileReport,
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    BlacklistOverThreshold,
    RefreshTokensOverThreshold,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub observed: u64,
    pub threshold: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub store_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
    pub monitor_running: bool,
    pub overall_healthy: bool,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSnapshot {
    pub stats: Option<StoreStats>,
    pub store_status: StoreStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
    pub monitor_running: bool,
    pub last_check: DateTime<Utc>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_cleanup: Option<CleanupReport>,
    pub anomalies: Vec<Anomaly>,
}
