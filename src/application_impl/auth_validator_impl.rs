use crate::application_port::*;
use std::sync::Arc;
use tracing::{debug, error};

pub struct JwtAuthValidator {
    token_codec: Arc<dyn TokenCodec>,
    session_store: Arc<dyn SessionStore>,
}

impl JwtAuthValidator {
    pub fn new(token_codec: Arc<dyn TokenCodec>, session_store: Arc<dyn SessionStore>) -> Self {
        Self {
            token_codec,
            session_store,
        }
    }
}

#[async_trait::async_trait]
impl AuthValidator for JwtAuthValidator {
    async fn validate(&self, token: &str) -> Result<AuthContext, AuthError> {
        let ctx = self.token_codec.verify(token).await?;

        // The blacklist is the only way to invalidate a signed token early,
        // so a store failure here must deny rather than allow.
        if let Some(session_id) = &ctx.session_id {
            let revoked = self
                .session_store
                .is_blacklisted(session_id)
                .await
                .map_err(|e| {
                    error!(%session_id, error = %e, "blacklist lookup failed, denying token");
                    AuthError::Store(e.to_string())
                })?;
            if revoked {
                debug!(user_id = %ctx.user_id, %session_id, "rejected revoked token");
                return Err(AuthError::TokenRevoked);
            }
        }

        Ok(ctx)
    }
}
