use crate::domain_model::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier minted once per issuance and embedded in both tokens of a pair.
/// It doubles as the blacklist key.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId(value.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => f.write_str("access"),
            TokenKind::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRecord {
    pub user_id: UserId,
    pub email: String,
    pub session_id: SessionId,
    pub device_info: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistEntry {
    pub token_id: SessionId,
    /// `None` when an administrator revokes a token id without knowing its owner.
    pub user_id: Option<UserId>,
    pub token_kind: TokenKind,
    pub revoked_at: DateTime<Utc>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_info: String,
}

/// Advisory presence cache. Never consulted for auth decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOnlineStatus {
    pub last_activity: DateTime<Utc>,
    pub active_token_count: u64,
    pub device_count: u64,
    pub last_device_info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub device_info: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    /// Estimated as `last_used_at + access lifetime`. Access-token issuance
    /// times are not tracked, so this is an approximation.
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

/// Well-known revocation reasons written into blacklist entries.
pub mod reason {
    pub const TOKEN_REFRESH: &str = "token_refresh";
    pub const USER_LOGOUT: &str = "user_logout";
    pub const LOGOUT_ALL: &str = "logout_all";
    pub const MANUAL_REVOKE: &str = "manual_revoke";
    pub const ADMIN_REVOKE: &str = "admin_revoke";
    pub const ADMIN_REVOKE_ALL: &str = "admin_revoke_all";
    pub const SESSION_LIMIT: &str = "session_limit";
    pub const ISSUE_FAILED: &str = "issue_failed";
}
