use crate::application_port::SessionError;
use crate::domain_model::*;
use crate::domain_port::UserDirectoryError;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token invalid")]
    TokenInvalid,
    #[error("token expired")]
    TokenExpired,
    #[error("token revoked")]
    TokenRevoked,
    #[error("wrong token kind")]
    WrongTokenKind,
    #[error("user not found")]
    UserNotFound,
    #[error("session not found")]
    SessionNotFound,
    #[error("store error: {0}")]
    Store(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<SessionError> for AuthError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound => AuthError::SessionNotFound,
            SessionError::AlreadyRevoked => AuthError::TokenRevoked,
            SessionError::AlreadyExpired => AuthError::TokenExpired,
            SessionError::Store(e) => AuthError::Store(e),
            SessionError::Serialization(e) => AuthError::InternalError(e),
        }
    }
}

impl From<UserDirectoryError> for AuthError {
    fn from(e: UserDirectoryError) -> Self {
        AuthError::Store(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AccessToken(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RefreshToken(pub String);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedSession {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

/// Everything needed to mint one token of a pair.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: UserId,
    pub email: String,
    pub session_id: SessionId,
}

/// Verified contents of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: UserId,
    pub email: String,
    pub session_id: Option<SessionId>,
    pub kind: TokenKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait TokenCodec: Send + Sync {
    async fn issue(
        &self,
        kind: TokenKind,
        subject: &TokenSubject,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), AuthError>;

    /// Signature, algorithm, issuer and time claims only. No store lookups.
    async fn verify(&self, token: &str) -> Result<AuthContext, AuthError>;
}

#[async_trait::async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_session(
        &self,
        user_id: UserId,
        email: &str,
        device_info: &str,
    ) -> Result<IssuedSession, AuthError>;

    async fn refresh_session(
        &self,
        refresh_token: &RefreshToken,
        device_info: &str,
    ) -> Result<IssuedSession, AuthError>;
}

/// The gate consulted by request middleware.
#[async_trait::async_trait]
pub trait AuthValidator: Send + Sync {
    /// Accepts either token kind.
    async fn validate(&self, token: &str) -> Result<AuthContext, AuthError>;

    async fn validate_access(&self, token: &str) -> Result<AuthContext, AuthError> {
        let ctx = self.validate(token).await?;
        if ctx.kind != TokenKind::Access {
            return Err(AuthError::WrongTokenKind);
        }
        Ok(ctx)
    }
}
