use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Prepended to every key; empty by default.
    pub key_namespace: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub blacklist_min_ttl: Duration,
    pub blacklist_max_ttl: Duration,
    pub blacklist_default_ttl: Duration,
    pub online_status_ttl: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            key_namespace: String::new(),
            access_token_ttl: Duration::from_secs(2 * 60 * 60),
            refresh_token_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            blacklist_min_ttl: Duration::from_secs(5 * 60),
            blacklist_max_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            blacklist_default_ttl: Duration::from_secs(24 * 60 * 60),
            online_status_ttl: Duration::from_secs(60 * 60),
        }
    }
}

const REFRESH_TOKEN: &str = "refresh_token:";
const BLACKLIST: &str = "blacklist:";
const USER_SESSIONS: &str = "user_sessions:";
const USER_ONLINE: &str = "user_online:";

#[derive(Debug, Clone)]
pub struct KeyLayout {
    namespace: String,
}

impl KeyLayout {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn refresh_token(&self, user_id: UserId, session_id: &SessionId) -> String {
        format!("{}{REFRESH_TOKEN}{user_id}:{session_id}", self.namespace)
    }

    pub fn blacklist(&self, token_id: &SessionId) -> String {
        format!("{}{BLACKLIST}{token_id}", self.namespace)
    }

    pub fn user_sessions(&self, user_id: UserId) -> String {
        format!("{}{USER_SESSIONS}{user_id}", self.namespace)
    }

    pub fn user_online(&self, user_id: UserId) -> String {
        format!("{}{USER_ONLINE}{user_id}", self.namespace)
    }

    fn pattern(&self, prefix: &str) -> String {
        format!("{}{prefix}*", self.namespace)
    }

    pub fn user_from_sessions_key(&self, key: &str) -> Option<UserId> {
        key.strip_prefix(&self.namespace)?
            .strip_prefix(USER_SESSIONS)?
            .parse()
            .ok()
    }
}

/// Remaining lifetime of a token clamped into `[min, max]`, or zero when
/// the token is already past expiry.
pub fn clamp_blacklist_ttl(
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    min: Duration,
    max: Duration,
) -> Duration {
    match (expires_at - now).to_std() {
        Ok(remaining) if !remaining.is_zero() => remaining.max(min).min(max),
        _ => Duration::ZERO,
    }
}

pub struct KvSessionStore {
    kv: Arc<dyn KvStore>,
    keys: KeyLayout,
    cfg: SessionStoreConfig,
}

impl KvSessionStore {
    pub fn new(kv: Arc<dyn KvStore>, cfg: SessionStoreConfig) -> Self {
        Self {
            kv,
            keys: KeyLayout::new(cfg.key_namespace.clone()),
            cfg,
        }
    }

    pub fn keys(&self) -> &KeyLayout {
        &self.keys
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, SessionError> {
        match self.kv.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn read_records(
        &self,
        user_id: UserId,
        session_ids: &[SessionId],
    ) -> Result<Vec<RefreshTokenRecord>, SessionError> {
        let reads = session_ids
            .iter()
            .map(|sid| self.get_refresh_token(user_id, sid));
        let mut records = Vec::with_capacity(session_ids.len());
        for read in join_all(reads).await {
            if let Some(record) = read? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Never shortens the set below the longest-lived record it tracks.
    async fn extend_session_set(&self, user_id: UserId, ttl: Duration) -> Result<(), SessionError> {
        let key = self.keys.user_sessions(user_id);
        let keep = matches!(self.kv.ttl(&key).await?, KeyTtl::Expires(current) if current >= ttl);
        if !keep {
            self.kv.expire(&key, ttl.min(self.cfg.refresh_token_ttl)).await?;
        }
        Ok(())
    }

    async fn refresh_online_status(
        &self,
        user_id: UserId,
        device_info: &str,
    ) -> Result<(), SessionError> {
        let sessions = self.list_sessions(user_id).await?;
        let records = self.read_records(user_id, &sessions).await?;
        let devices: HashSet<&str> = records.iter().map(|r| r.device_info.as_str()).collect();
        let status = UserOnlineStatus {
            last_activity: Utc::now(),
            active_token_count: records.len() as u64,
            device_count: devices.len() as u64,
            last_device_info: device_info.to_owned(),
        };
        let raw = serde_json::to_string(&status)?;
        self.kv
            .set_ex(&self.keys.user_online(user_id), &raw, self.cfg.online_status_ttl)
            .await?;
        Ok(())
    }

    async fn refresh_online_status_logged(&self, user_id: UserId, device_info: &str) {
        if let Err(e) = self.refresh_online_status(user_id, device_info).await {
            warn!(%user_id, error = %e, "failed to refresh online status");
        }
    }

    async fn count(&self, prefix: &str) -> Result<u64, SessionError> {
        Ok(self.kv.scan_match(&self.keys.pattern(prefix)).await?.len() as u64)
    }

    async fn reconcile_one(&self, key: &str, report: &mut ReconcileReport) -> Result<(), SessionError> {
        let Some(user_id) = self.keys.user_from_sessions_key(key) else {
            warn!(key, "session set key does not name a user, skipping");
            return Ok(());
        };
        let members = self.kv.smembers(key).await?;
        let mut live = 0usize;
        for member in members {
            let sid = SessionId(member);
            if self.kv.exists(&self.keys.refresh_token(user_id, &sid)).await? {
                live += 1;
            } else {
                self.kv.srem(key, sid.as_str()).await?;
                report.members_removed += 1;
                debug!(%user_id, session_id = %sid, "removed orphaned session membership");
            }
        }
        if live == 0 {
            self.kv.del(&[key.to_owned()]).await?;
            report.sets_deleted += 1;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStore for KvSessionStore {
    async fn store_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), SessionError> {
        let ttl = (record.expires_at - Utc::now())
            .to_std()
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or(SessionError::AlreadyExpired)?;

        let raw = serde_json::to_string(record)?;
        self.kv
            .set_ex(
                &self.keys.refresh_token(record.user_id, &record.session_id),
                &raw,
                ttl,
            )
            .await?;

        self.kv
            .sadd(
                &self.keys.user_sessions(record.user_id),
                record.session_id.as_str(),
            )
            .await?;
        self.extend_session_set(record.user_id, ttl).await?;

        self.refresh_online_status_logged(record.user_id, &record.device_info)
            .await;
        Ok(())
    }

    async fn get_refresh_token(
        &self,
        user_id: UserId,
        session_id: &SessionId,
    ) -> Result<Option<RefreshTokenRecord>, SessionError> {
        self.read_json(&self.keys.refresh_token(user_id, session_id))
            .await
    }

    async fn touch_refresh_token(
        &self,
        user_id: UserId,
        session_id: &SessionId,
    ) -> Result<RefreshTokenRecord, SessionError> {
        let key = self.keys.refresh_token(user_id, session_id);
        let mut record: RefreshTokenRecord =
            self.read_json(&key).await?.ok_or(SessionError::NotFound)?;

        let now = Utc::now();
        let ttl = match self.kv.ttl(&key).await? {
            KeyTtl::Missing => return Err(SessionError::NotFound),
            KeyTtl::Expires(ttl) => ttl,
            KeyTtl::Persistent => (record.expires_at - now)
                .to_std()
                .map_err(|_| SessionError::AlreadyExpired)?,
        };
        if ttl.is_zero() {
            return Err(SessionError::NotFound);
        }

        record.last_used_at = now;
        let raw = serde_json::to_string(&record)?;
        self.kv.set_ex(&key, &raw, ttl).await?;

        self.refresh_online_status_logged(user_id, &record.device_info)
            .await;
        Ok(record)
    }

    async fn delete_refresh_token(
        &self,
        user_id: UserId,
        session_id: &SessionId,
    ) -> Result<(), SessionError> {
        self.kv
            .del(&[self.keys.refresh_token(user_id, session_id)])
            .await?;
        self.kv
            .srem(&self.keys.user_sessions(user_id), session_id.as_str())
            .await?;
        Ok(())
    }

    async fn blacklist_token(
        &self,
        entry: &BlacklistEntry,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, SessionError> {
        let ttl = self.compute_blacklist_ttl(expires_at);
        if ttl.is_zero() {
            // The validator's own expiry check already rejects it.
            return Ok(false);
        }
        let raw = serde_json::to_string(entry)?;
        self.kv
            .set_ex(&self.keys.blacklist(&entry.token_id), &raw, ttl)
            .await?;
        Ok(true)
    }

    async fn revoke_session(
        &self,
        user_id: UserId,
        session_id: &SessionId,
        reason: &str,
    ) -> Result<(), SessionError> {
        let record = self
            .get_refresh_token(user_id, session_id)
            .await?
            .ok_or(SessionError::NotFound)?;

        let entry = BlacklistEntry {
            token_id: session_id.clone(),
            user_id: Some(user_id),
            token_kind: TokenKind::Refresh,
            revoked_at: Utc::now(),
            reason: reason.to_owned(),
            device_info: record.device_info.clone(),
        };
        self.blacklist_token(&entry, record.expires_at).await?;

        // Concurrent revokes of one session all reach here; only the caller
        // whose delete removed the record has revoked it.
        let removed = self
            .kv
            .del(&[self.keys.refresh_token(user_id, session_id)])
            .await?;
        self.kv
            .srem(&self.keys.user_sessions(user_id), session_id.as_str())
            .await?;
        if removed == 0 {
            return Err(SessionError::NotFound);
        }

        debug!(%user_id, %session_id, reason, "session revoked");
        Ok(())
    }

    async fn revoke_all_sessions(
        &self,
        user_id: UserId,
        reason: &str,
    ) -> Result<usize, SessionError> {
        let sessions = self.list_sessions(user_id).await?;
        let records = self.read_records(user_id, &sessions).await?;

        let revoked_at = Utc::now();
        let mut ops = Vec::with_capacity(records.len() * 2 + 1);
        for record in &records {
            let ttl = self.compute_blacklist_ttl(record.expires_at);
            if !ttl.is_zero() {
                let entry = BlacklistEntry {
                    token_id: record.session_id.clone(),
                    user_id: Some(user_id),
                    token_kind: TokenKind::Refresh,
                    revoked_at,
                    reason: reason.to_owned(),
                    device_info: record.device_info.clone(),
                };
                ops.push(KvOp::SetEx {
                    key: self.keys.blacklist(&record.session_id),
                    value: serde_json::to_string(&entry)?,
                    ttl,
                });
            }
            ops.push(KvOp::Del {
                key: self.keys.refresh_token(user_id, &record.session_id),
            });
        }
        ops.push(KvOp::Del {
            key: self.keys.user_sessions(user_id),
        });
        self.kv.exec_batch(ops).await?;

        info!(%user_id, revoked = records.len(), reason, "all sessions revoked");
        Ok(records.len())
    }

    async fn revoke_token(&self, token_id: &SessionId, reason: &str) -> Result<(), SessionError> {
        if self.is_blacklisted(token_id).await? {
            return Err(SessionError::AlreadyRevoked);
        }
        let now = Utc::now();
        let entry = BlacklistEntry {
            token_id: token_id.clone(),
            user_id: None,
            token_kind: TokenKind::Access,
            revoked_at: now,
            reason: reason.to_owned(),
            device_info: String::new(),
        };
        self.blacklist_token(&entry, now + self.cfg.blacklist_default_ttl)
            .await?;
        info!(%token_id, reason, "token revoked by administrator");
        Ok(())
    }

    async fn is_blacklisted(&self, token_id: &SessionId) -> Result<bool, SessionError> {
        Ok(self.kv.exists(&self.keys.blacklist(token_id)).await?)
    }

    async fn get_blacklist_entry(
        &self,
        token_id: &SessionId,
    ) -> Result<Option<BlacklistEntry>, SessionError> {
        self.read_json(&self.keys.blacklist(token_id)).await
    }

    async fn list_sessions(&self, user_id: UserId) -> Result<Vec<SessionId>, SessionError> {
        let members = self.kv.smembers(&self.keys.user_sessions(user_id)).await?;
        Ok(members.into_iter().map(SessionId).collect())
    }

    async fn list_session_details(
        &self,
        user_id: UserId,
    ) -> Result<Vec<SessionInfo>, SessionError> {
        let sessions = self.list_sessions(user_id).await?;
        let mut details: Vec<SessionInfo> = self
            .read_records(user_id, &sessions)
            .await?
            .into_iter()
            .map(|r| SessionInfo {
                access_token_expires_at: r.last_used_at + self.cfg.access_token_ttl,
                session_id: r.session_id,
                device_info: r.device_info,
                created_at: r.created_at,
                last_used_at: r.last_used_at,
                refresh_token_expires_at: r.expires_at,
            })
            .collect();
        details.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(details)
    }

    async fn get_online_status(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserOnlineStatus>, SessionError> {
        self.read_json(&self.keys.user_online(user_id)).await
    }

    fn compute_blacklist_ttl(&self, expires_at: DateTime<Utc>) -> Duration {
        clamp_blacklist_ttl(
            expires_at,
            Utc::now(),
            self.cfg.blacklist_min_ttl,
            self.cfg.blacklist_max_ttl,
        )
    }

    async fn stats(&self) -> Result<StoreStats, SessionError> {
        Ok(StoreStats {
            blacklist_count: self.count(BLACKLIST).await?,
            refresh_token_count: self.count(REFRESH_TOKEN).await?,
            user_sessions_count: self.count(USER_SESSIONS).await?,
            online_users_count: self.count(USER_ONLINE).await?,
            collected_at: Utc::now(),
        })
    }

    async fn purge_unbounded_blacklist(&self) -> Result<u64, SessionError> {
        Ok(self
            .kv
            .purge_persistent(&self.keys.pattern(BLACKLIST))
            .await?)
    }

    async fn reconcile_session_sets(&self) -> Result<ReconcileReport, SessionError> {
        let keys = self
            .kv
            .scan_match(&self.keys.pattern(USER_SESSIONS))
            .await?;
        let mut report = ReconcileReport::default();
        for key in keys {
            report.sets_scanned += 1;
            // One broken set must not stop the pass.
            if let Err(e) = self.reconcile_one(&key, &mut report).await {
                warn!(key, error = %e, "failed to reconcile session set");
            }
        }
        Ok(report)
    }

    async fn ping(&self) -> Result<(), SessionError> {
        Ok(self.kv.ping().await?)
    }
}
