use crate::domain_model::*;
use crate::domain_port::MonitoringSink;
use tracing::{info, warn};

/// Publishes snapshots to the log stream; scraped by whatever collects logs.
#[derive(Debug, Default)]
pub struct TracingMonitoringSink;

#[async_trait::async_trait]
impl MonitoringSink for TracingMonitoringSink {
    async fn publish(&self, stats: &StoreStats, anomalies: &[Anomaly]) -> anyhow::Result<()> {
        info!(
            target: "sessionkeeper::metrics",
            blacklist_count = stats.blacklist_count,
            refresh_token_count = stats.refresh_token_count,
            user_sessions_count = stats.user_sessions_count,
            online_users_count = stats.online_users_count,
            collected_at = %stats.collected_at,
            "store stats"
        );
        for anomaly in anomalies {
            warn!(
                target: "sessionkeeper::metrics",
                kind = ?anomaly.kind,
                observed = anomaly.observed,
                threshold = anomaly.threshold,
                "store anomaly"
            );
        }
        Ok(())
    }
}
