use crate::domain_model::*;
use crate::domain_port::KvError;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("refresh token already expired")]
    AlreadyExpired,
    #[error("token already revoked")]
    AlreadyRevoked,
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("store error: {0}")]
    Store(String),
}

impl From<KvError> for SessionError {
    fn from(e: KvError) -> Self {
        SessionError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Serialization(e.to_string())
    }
}

/// Owner of the refresh-record / blacklist / session-set / online-status keyspace.
///
/// Multi-key operations are ordered so that the more conservative state is
/// written first: a blacklist entry always lands before the record it revokes
/// is deleted.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Upserts the record, adds it to the user's session set and refreshes the
    /// online status. Fails with `AlreadyExpired` when `expires_at` is past.
    async fn store_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), SessionError>;

    /// Absent both when never issued and when the store TTL already reclaimed it.
    async fn get_refresh_token(
        &self,
        user_id: UserId,
        session_id: &SessionId,
    ) -> Result<Option<RefreshTokenRecord>, SessionError>;

    /// Bumps `last_used_at`, keeping the remaining TTL.
    async fn touch_refresh_token(
        &self,
        user_id: UserId,
        session_id: &SessionId,
    ) -> Result<RefreshTokenRecord, SessionError>;

    /// Idempotent.
    async fn delete_refresh_token(
        &self,
        user_id: UserId,
        session_id: &SessionId,
    ) -> Result<(), SessionError>;

    /// Writes the entry with a TTL derived from `expires_at`. Returns false
    /// when the token is already past expiry and nothing was written.
    async fn blacklist_token(
        &self,
        entry: &BlacklistEntry,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, SessionError>;

    /// Blacklists the session, then removes its record. Of several
    /// concurrent calls for one session exactly one returns `Ok`; the rest
    /// get `NotFound`.
    async fn revoke_session(
        &self,
        user_id: UserId,
        session_id: &SessionId,
        reason: &str,
    ) -> Result<(), SessionError>;

    /// Returns how many sessions were moved to the blacklist.
    async fn revoke_all_sessions(&self, user_id: UserId, reason: &str)
    -> Result<usize, SessionError>;

    /// Administrative revoke of an arbitrary token id with the default blacklist TTL.
    async fn revoke_token(&self, token_id: &SessionId, reason: &str) -> Result<(), SessionError>;

    async fn is_blacklisted(&self, token_id: &SessionId) -> Result<bool, SessionError>;

    async fn get_blacklist_entry(
        &self,
        token_id: &SessionId,
    ) -> Result<Option<BlacklistEntry>, SessionError>;

    async fn list_sessions(&self, user_id: UserId) -> Result<Vec<SessionId>, SessionError>;

    async fn list_session_details(&self, user_id: UserId)
    -> Result<Vec<SessionInfo>, SessionError>;

    async fn get_online_status(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserOnlineStatus>, SessionError>;

    /// Zero when `expires_at` is already past, otherwise the remaining
    /// lifetime clamped into the configured `[min, max]` range.
    fn compute_blacklist_ttl(&self, expires_at: DateTime<Utc>) -> Duration;

    async fn stats(&self) -> Result<StoreStats, SessionError>;

    /// Deletes blacklist keys that were written without an expiry.
    async fn purge_unbounded_blacklist(&self) -> Result<u64, SessionError>;

    /// Drops set members whose refresh record is gone and deletes emptied sets.
    async fn reconcile_session_sets(&self) -> Result<ReconcileReport, SessionError>;

    async fn ping(&self) -> Result<(), SessionError>;
}
