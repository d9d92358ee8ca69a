use crate::application_port::*;
use crate::domain_model::*;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub signing_key: Vec<u8>,
    /// Tolerated clock skew when checking `exp` and `nbf`.
    pub leeway: Duration,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("signing_key", &"<redacted>")
            .field("leeway", &self.leeway)
            .finish()
    }
}

impl JwtConfig {
    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: UserId,
    email: String,
    #[serde(rename = "sessionID", default, skip_serializing_if = "Option::is_none")]
    session_id: Option<SessionId>,
    #[serde(rename = "tokenKind")]
    token_kind: TokenKind,
    sub: String,
    iss: String,
    iat: i64,
    nbf: i64,
    exp: i64,
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, AuthError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(AuthError::TokenInvalid)
}

pub struct JwtHs256Codec {
    cfg: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtHs256Codec {
    pub fn new(cfg: JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.leeway = cfg.leeway.as_secs();
        validation.set_issuer(&[cfg.issuer.clone()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iat", "iss", "sub"]);

        JwtHs256Codec {
            encoding_key: EncodingKey::from_secret(&cfg.signing_key),
            decoding_key: DecodingKey::from_secret(&cfg.signing_key),
            validation,
            cfg,
        }
    }
}

#[async_trait::async_trait]
impl TokenCodec for JwtHs256Codec {
    async fn issue(
        &self,
        kind: TokenKind,
        subject: &TokenSubject,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let ttl = chrono::Duration::from_std(self.cfg.ttl(kind))
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        let exp_dt = now + ttl;
        let claims = Claims {
            user_id: subject.user_id,
            email: subject.email.clone(),
            session_id: Some(subject.session_id.clone()),
            token_kind: kind,
            sub: subject.user_id.to_string(),
            iss: self.cfg.issuer.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: exp_dt.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        Ok((token, exp_dt))
    }

    async fn verify(&self, token: &str) -> Result<AuthContext, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid,
            }
        })?;
        let claims = data.claims;

        // `sub` and `userId` are written together; disagreement means tampering upstream.
        if claims.sub != claims.user_id.to_string() {
            return Err(AuthError::TokenInvalid);
        }

        Ok(AuthContext {
            user_id: claims.user_id,
            email: claims.email,
            session_id: claims.session_id,
            kind: claims.token_kind,
            issued_at: timestamp(claims.iat)?,
            expires_at: timestamp(claims.exp)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(key: &[u8]) -> JwtHs256Codec {
        JwtHs256Codec::new(JwtConfig {
            issuer: "sessionkeeper.test".to_string(),
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            signing_key: key.to_vec(),
            leeway: Duration::ZERO,
        })
    }

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: UserId::new_random(),
            email: "someone@example.com".to_string(),
            session_id: SessionId::generate(),
        }
    }

    #[tokio::test]
    async fn issued_token_verifies_with_all_claims() {
        let codec = codec(b"test-key");
        let subject = subject();
        let now = Utc::now();
        let (token, exp) = codec.issue(TokenKind::Refresh, &subject, now).await.unwrap();

        let ctx = codec.verify(&token).await.unwrap();
        assert_eq!(ctx.user_id, subject.user_id);
        assert_eq!(ctx.email, subject.email);
        assert_eq!(ctx.session_id, Some(subject.session_id));
        assert_eq!(ctx.kind, TokenKind::Refresh);
        assert_eq!(ctx.expires_at.timestamp(), exp.timestamp());
    }

    #[tokio::test]
    async fn token_signed_with_another_key_is_invalid() {
        let (token, _) = codec(b"key-one")
            .issue(TokenKind::Access, &subject(), Utc::now())
            .await
            .unwrap();
        let result = codec(b"key-two").verify(&token).await;
        assert!(matches!(result, Err(AuthError::TokenInvalid)));
    }

    #[tokio::test]
    async fn expired_token_is_reported_as_expired() {
        let codec = codec(b"test-key");
        let long_ago = Utc::now() - chrono::Duration::days(1);
        let (token, _) = codec
            .issue(TokenKind::Access, &subject(), long_ago)
            .await
            .unwrap();
        assert!(matches!(
            codec.verify(&token).await,
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn garbage_is_invalid() {
        let result = codec(b"test-key").verify("not.a.jwt").await;
        assert!(matches!(result, Err(AuthError::TokenInvalid)));
    }
}
