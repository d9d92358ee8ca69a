//! Walks one user through issue, refresh, logout-all and cleanup against the
//! in-memory store.
//!
//! $ cargo run --bin session_demo

use sessionkeeper::application_impl::*;
use sessionkeeper::application_port::*;
use sessionkeeper::domain_model::*;
use sessionkeeper::domain_port::*;
use sessionkeeper::infra_memory::*;
use sessionkeeper::logger::*;
use sessionkeeper::server::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _logger = Logger::new_bootstrap();

    let kv = Arc::new(InMemoryKvStore::new());
    let session_store: Arc<dyn SessionStore> =
        Arc::new(KvSessionStore::new(kv.clone(), SessionStoreConfig::default()));
    let codec: Arc<dyn TokenCodec> = Arc::new(JwtHs256Codec::new(JwtConfig {
        issuer: "sessionkeeper.demo".to_string(),
        access_ttl: Duration::from_secs(15 * 60),
        refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        signing_key: b"demo-signing-key".to_vec(),
        leeway: Duration::from_secs(5),
    }));
    let directory = Arc::new(InMemoryUserDirectory::new());
    let server = Server::from_parts(
        codec,
        session_store.clone(),
        directory.clone(),
        Arc::new(TracingMonitoringSink),
        IssuerConfig::default(),
        MonitorConfig::default(),
    );

    let user_id = UserId::new_random();
    directory.insert(user_id, "demo@example.com");

    let laptop = server
        .token_issuer
        .issue_session(user_id, "demo@example.com", "laptop")
        .await?;
    let phone = server
        .token_issuer
        .issue_session(user_id, "demo@example.com", "phone")
        .await?;
    info!(laptop = %laptop.session_id, phone = %phone.session_id, "two sessions issued");

    let ctx = server.auth_validator.validate_access(&laptop.access_token.0).await?;
    info!(user_id = %ctx.user_id, session_id = ?ctx.session_id, "access token accepted");

    let rotated = server
        .token_issuer
        .refresh_session(&laptop.refresh_token, "laptop")
        .await?;
    info!(old = %laptop.session_id, new = %rotated.session_id, "refresh token rotated");

    match server.auth_validator.validate_access(&laptop.access_token.0).await {
        Err(e) => info!(error = %e, "old access token rejected"),
        Ok(_) => warn!("old access token still accepted"),
    }

    for session in session_store.list_session_details(user_id).await? {
        info!(session_id = %session.session_id, device = %session.device_info, "active session");
    }
    if let Some(online) = session_store.get_online_status(user_id).await? {
        info!(devices = online.device_count, tokens = online.active_token_count, "online status");
    }

    let revoked = session_store
        .revoke_all_sessions(user_id, reason::LOGOUT_ALL)
        .await?;
    info!(revoked, "logged out everywhere");

    // A set member with no record behind it, as left by a crash mid-write.
    kv.sadd(&format!("user_sessions:{user_id}"), "orphan").await?;
    let report = server.token_monitor.force_cleanup().await;
    info!(?report, "cleanup finished");

    info!(snapshot = ?server.token_monitor.monitoring_snapshot().await, "monitoring snapshot");
    server.shutdown().await;
    Ok(())
}
