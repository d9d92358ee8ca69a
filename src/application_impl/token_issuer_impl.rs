use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{SubsecRound, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Zero disables the cap.
    pub max_sessions_per_user: usize,
    /// Refresh exchange revokes the presented session and issues a new one.
    /// When false the session is kept and only a new access token is minted.
    pub rotate_refresh_tokens: bool,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_user: 5,
            rotate_refresh_tokens: true,
        }
    }
}

pub struct JwtTokenIssuer {
    token_codec: Arc<dyn TokenCodec>,
    session_store: Arc<dyn SessionStore>,
    user_directory: Arc<dyn UserDirectory>,
    cfg: IssuerConfig,
}

impl JwtTokenIssuer {
    pub fn new(
        token_codec: Arc<dyn TokenCodec>,
        session_store: Arc<dyn SessionStore>,
        user_directory: Arc<dyn UserDirectory>,
        cfg: IssuerConfig,
    ) -> Self {
        Self {
            token_codec,
            session_store,
            user_directory,
            cfg,
        }
    }

    /// Revokes the oldest sessions other than `keep` until the user is back
    /// under the cap. Runs after the new record is written, so a failed issue
    /// never costs the user an existing session.
    async fn enforce_session_cap(&self, user_id: UserId, keep: &SessionId) {
        let max = self.cfg.max_sessions_per_user;
        if max == 0 {
            return;
        }
        let sessions = match self.session_store.list_session_details(user_id).await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(%user_id, error = %e, "could not list sessions for cap check");
                return;
            }
        };
        if sessions.len() <= max {
            return;
        }
        let excess = sessions.len() - max;
        let oldest = sessions.iter().filter(|s| &s.session_id != keep).take(excess);
        for session in oldest {
            match self
                .session_store
                .revoke_session(user_id, &session.session_id, reason::SESSION_LIMIT)
                .await
            {
                Ok(()) => {
                    info!(%user_id, session_id = %session.session_id, "evicted oldest session");
                }
                Err(SessionError::NotFound) => {}
                Err(e) => {
                    warn!(%user_id, session_id = %session.session_id, error = %e, "failed to evict session");
                    return;
                }
            }
        }
    }

    /// Signs both tokens of a new session. Nothing is written yet.
    async fn mint(
        &self,
        user_id: UserId,
        email: &str,
        device_info: &str,
    ) -> Result<(IssuedSession, RefreshTokenRecord), AuthError> {
        // Whole seconds, so the stored TTL never outlives the `exp` claim.
        let now = Utc::now().trunc_subsecs(0);
        let subject = TokenSubject {
            user_id,
            email: email.to_owned(),
            session_id: SessionId::generate(),
        };

        let (access, access_exp) = self
            .token_codec
            .issue(TokenKind::Access, &subject, now)
            .await?;
        let (refresh, refresh_exp) = self
            .token_codec
            .issue(TokenKind::Refresh, &subject, now)
            .await?;

        let record = RefreshTokenRecord {
            user_id,
            email: subject.email,
            session_id: subject.session_id.clone(),
            device_info: device_info.to_owned(),
            created_at: now,
            last_used_at: now,
            expires_at: refresh_exp,
        };
        let issued = IssuedSession {
            user_id,
            session_id: subject.session_id,
            access_token: AccessToken(access),
            refresh_token: RefreshToken(refresh),
            access_token_expires_at: access_exp,
            refresh_token_expires_at: refresh_exp,
        };
        Ok((issued, record))
    }

    async fn persist(&self, record: &RefreshTokenRecord) -> Result<(), AuthError> {
        if let Err(e) = self.session_store.store_refresh_token(record).await {
            error!(user_id = %record.user_id, session_id = %record.session_id, error = %e, "failed to persist session");
            self.discard_unpersisted(record).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Tokens whose record could not be written must not be usable if the
    /// store comes back, so try once to blacklist the session.
    async fn discard_unpersisted(&self, record: &RefreshTokenRecord) {
        let entry = BlacklistEntry {
            token_id: record.session_id.clone(),
            user_id: Some(record.user_id),
            token_kind: TokenKind::Refresh,
            revoked_at: Utc::now(),
            reason: reason::ISSUE_FAILED.to_string(),
            device_info: record.device_info.clone(),
        };
        if let Err(e) = self.session_store.blacklist_token(&entry, record.expires_at).await {
            warn!(
                user_id = %record.user_id,
                session_id = %record.session_id,
                error = %e,
                "could not blacklist unpersisted session"
            );
        }
    }

    /// Takes back a session that was written but never handed out.
    async fn withdraw(&self, record: &RefreshTokenRecord) {
        match self
            .session_store
            .revoke_session(record.user_id, &record.session_id, reason::ISSUE_FAILED)
            .await
        {
            Ok(()) | Err(SessionError::NotFound) => {}
            Err(e) => warn!(
                user_id = %record.user_id,
                session_id = %record.session_id,
                error = %e,
                "could not withdraw unused session"
            ),
        }
    }

    async fn reissue_access(
        &self,
        record: RefreshTokenRecord,
        refresh_token: &RefreshToken,
    ) -> Result<IssuedSession, AuthError> {
        let subject = TokenSubject {
            user_id: record.user_id,
            email: record.email.clone(),
            session_id: record.session_id.clone(),
        };
        let (access, access_exp) = self
            .token_codec
            .issue(TokenKind::Access, &subject, Utc::now().trunc_subsecs(0))
            .await?;
        Ok(IssuedSession {
            user_id: record.user_id,
            session_id: record.session_id,
            access_token: AccessToken(access),
            refresh_token: refresh_token.clone(),
            access_token_expires_at: access_exp,
            refresh_token_expires_at: record.expires_at,
        })
    }
}

#[async_trait::async_trait]
impl TokenIssuer for JwtTokenIssuer {
    async fn issue_session(
        &self,
        user_id: UserId,
        email: &str,
        device_info: &str,
    ) -> Result<IssuedSession, AuthError> {
        // Sign both before touching the store.
        let (issued, record) = self.mint(user_id, email, device_info).await?;
        self.persist(&record).await?;
        self.enforce_session_cap(user_id, &record.session_id).await;

        info!(%user_id, session_id = %record.session_id, device_info, "session issued");
        Ok(issued)
    }

    async fn refresh_session(
        &self,
        refresh_token: &RefreshToken,
        device_info: &str,
    ) -> Result<IssuedSession, AuthError> {
        let ctx = self.token_codec.verify(&refresh_token.0).await?;
        if ctx.kind != TokenKind::Refresh {
            return Err(AuthError::WrongTokenKind);
        }
        let session_id = ctx.session_id.ok_or(AuthError::TokenInvalid)?;
        let user_id = ctx.user_id;

        if self.session_store.is_blacklisted(&session_id).await? {
            return Err(AuthError::TokenRevoked);
        }

        let record = self
            .session_store
            .get_refresh_token(user_id, &session_id)
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        let profile = self
            .user_directory
            .get_user_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !self.cfg.rotate_refresh_tokens {
            let record = self
                .session_store
                .touch_refresh_token(user_id, &session_id)
                .await
                .map_err(|e| match e {
                    SessionError::NotFound => AuthError::TokenInvalid,
                    other => other.into(),
                })?;
            debug!(%user_id, %session_id, "access token reissued");
            return self.reissue_access(record, refresh_token).await;
        }

        let email = if profile.email.is_empty() {
            record.email
        } else {
            profile.email
        };
        let (issued, new_record) = self.mint(user_id, &email, device_info).await?;
        self.persist(&new_record).await?;

        // A concurrent exchange of the same token loses here, and its new
        // session is taken back.
        if let Err(e) = self
            .session_store
            .revoke_session(user_id, &session_id, reason::TOKEN_REFRESH)
            .await
        {
            self.withdraw(&new_record).await;
            return Err(match e {
                SessionError::NotFound => AuthError::TokenInvalid,
                other => other.into(),
            });
        }
        self.enforce_session_cap(user_id, &new_record.session_id).await;

        info!(%user_id, old_session_id = %session_id, session_id = %new_record.session_id, "session rotated");
        Ok(issued)
    }
}
