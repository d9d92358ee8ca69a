use crate::domain_model::*;

/// Destination for periodic token statistics (Prometheus pusher, log shipper, ...).
#[async_trait::async_trait]
pub trait MonitoringSink: Send + Sync {
    async fn publish(&self, stats: &StoreStats, anomalies: &[Anomaly]) -> anyhow::Result<()>;
}
