use super::error::*;
use crate::application_port::*;
use crate::domain_model::*;
use crate::logger::*;
use crate::server::TokenMonitor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use warp::http::StatusCode;
use warp::http::header::{HeaderValue, SET_COOKIE};
use warp::hyper::body::Bytes;
use warp::{self, Reply, reject};

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(code: ApiErrorCode, message: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code,
                message: message.into(),
            }),
        }
    }
}

fn device_or_unknown(user_agent: Option<String>) -> String {
    user_agent
        .filter(|ua| !ua.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

// region cookies

fn token_cookie(name: &str, value: &str, expires_at: DateTime<Utc>, secure: bool) -> String {
    let max_age = (expires_at - Utc::now()).num_seconds().max(0);
    let mut cookie = format!("{name}={value}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn cleared_cookie(name: &str, secure: bool) -> String {
    token_cookie(name, "", Utc::now(), secure)
}

fn with_cookies(
    reply: impl Reply,
    cookies: &[String],
) -> Result<warp::reply::Response, warp::Rejection> {
    let mut response = reply.into_response();
    for cookie in cookies {
        let value = HeaderValue::from_str(cookie)
            .map_err(ApiErrorCode::internal)
            .map_err(reject::custom)?;
        response.headers_mut().append(SET_COOKIE, value);
    }
    Ok(response)
}

fn cleared_token_cookies(secure: bool) -> [String; 2] {
    [
        cleared_cookie(ACCESS_TOKEN_COOKIE, secure),
        cleared_cookie(REFRESH_TOKEN_COOKIE, secure),
    ]
}

// endregion

// region auth

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// The token comes from the JSON body when present, else from the
/// `refresh_token` cookie. Both new tokens are also set as cookies.
pub async fn refresh(
    body: Bytes,
    cookie: Option<String>,
    user_agent: Option<String>,
    token_issuer: Arc<dyn TokenIssuer>,
    secure_cookies: bool,
) -> Result<impl warp::Reply, warp::Rejection> {
    let request: RefreshRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RefreshRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| reject::custom(ApiErrorCode::BadRequest))?
    };
    let refresh_token = request
        .refresh_token
        .filter(|t| !t.is_empty())
        .or(cookie.filter(|t| !t.is_empty()))
        .ok_or_else(|| reject::custom(ApiErrorCode::InvalidToken))?;

    let device_info = device_or_unknown(user_agent);
    let issued = token_issuer
        .refresh_session(&RefreshToken(refresh_token), &device_info)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    let cookies = [
        token_cookie(
            ACCESS_TOKEN_COOKIE,
            &issued.access_token.0,
            issued.access_token_expires_at,
            secure_cookies,
        ),
        token_cookie(
            REFRESH_TOKEN_COOKIE,
            &issued.refresh_token.0,
            issued.refresh_token_expires_at,
            secure_cookies,
        ),
    ];
    with_cookies(warp::reply::json(&ApiResponse::ok(issued)), &cookies)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub session_id: SessionId,
}

pub async fn logout(
    ctx: AuthContext,
    session_store: Arc<dyn SessionStore>,
    secure_cookies: bool,
) -> Result<impl warp::Reply, warp::Rejection> {
    let session_id = ctx
        .session_id
        .clone()
        .ok_or_else(|| reject::custom(ApiErrorCode::InvalidToken))?;

    match session_store
        .revoke_session(ctx.user_id, &session_id, reason::USER_LOGOUT)
        .await
    {
        Ok(()) => {}
        // Record already gone; still make sure the presented token stops working.
        Err(SessionError::NotFound) => {
            let entry = BlacklistEntry {
                token_id: session_id.clone(),
                user_id: Some(ctx.user_id),
                token_kind: ctx.kind,
                revoked_at: chrono::Utc::now(),
                reason: reason::USER_LOGOUT.to_string(),
                device_info: String::new(),
            };
            session_store
                .blacklist_token(&entry, ctx.expires_at)
                .await
                .map_err(ApiErrorCode::from)
                .map_err(reject::custom)?;
        }
        Err(e) => return Err(reject::custom(ApiErrorCode::from(e))),
    }

    with_cookies(
        warp::reply::json(&ApiResponse::ok(LogoutResponse { session_id })),
        &cleared_token_cookies(secure_cookies),
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokedCountResponse {
    pub revoked: usize,
}

pub async fn logout_all(
    ctx: AuthContext,
    session_store: Arc<dyn SessionStore>,
    secure_cookies: bool,
) -> Result<impl warp::Reply, warp::Rejection> {
    let revoked = session_store
        .revoke_all_sessions(ctx.user_id, reason::LOGOUT_ALL)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    with_cookies(
        warp::reply::json(&ApiResponse::ok(RevokedCountResponse { revoked })),
        &cleared_token_cookies(secure_cookies),
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListResponse {
    pub current_session_id: Option<SessionId>,
    pub sessions: Vec<SessionInfo>,
}

pub async fn list_own_sessions(
    ctx: AuthContext,
    session_store: Arc<dyn SessionStore>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let sessions = session_store
        .list_session_details(ctx.user_id)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(SessionListResponse {
        current_session_id: ctx.session_id,
        sessions,
    })))
}

pub async fn revoke_own_session(
    session_id: String,
    ctx: AuthContext,
    session_store: Arc<dyn SessionStore>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let session_id = SessionId::from(session_id.as_str());
    session_store
        .revoke_session(ctx.user_id, &session_id, reason::MANUAL_REVOKE)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(LogoutResponse {
        session_id,
    })))
}

// endregion

// region monitor

pub async fn health(token_monitor: Arc<TokenMonitor>) -> Result<impl warp::Reply, warp::Rejection> {
    let snapshot = token_monitor.health_snapshot().await;
    let status = if snapshot.overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::ok(snapshot)),
        status,
    ))
}

pub async fn stats(
    _ctx: AuthContext,
    session_store: Arc<dyn SessionStore>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let stats = session_store
        .stats()
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(stats)))
}

pub async fn monitoring_data(
    _ctx: AuthContext,
    token_monitor: Arc<TokenMonitor>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let snapshot = token_monitor.monitoring_snapshot().await;
    Ok(warp::reply::json(&ApiResponse::ok(snapshot)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetricsResponse {
    pub stats: StoreStats,
    pub health: HealthSnapshot,
    pub uptime_secs: u64,
}

pub async fn system_metrics(
    _ctx: AuthContext,
    session_store: Arc<dyn SessionStore>,
    token_monitor: Arc<TokenMonitor>,
    started_at: Instant,
) -> Result<impl warp::Reply, warp::Rejection> {
    let stats = session_store
        .stats()
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;
    let health = token_monitor.health_snapshot().await;

    Ok(warp::reply::json(&ApiResponse::ok(SystemMetricsResponse {
        stats,
        health,
        uptime_secs: started_at.elapsed().as_secs(),
    })))
}

pub async fn force_cleanup(
    ctx: AuthContext,
    token_monitor: Arc<TokenMonitor>,
) -> Result<impl warp::Reply, warp::Rejection> {
    info!(requested_by = %ctx.user_id, "manual cleanup");
    let report = token_monitor.force_cleanup().await;
    Ok(warp::reply::json(&ApiResponse::ok(report)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatusResponse {
    pub token_id: SessionId,
    pub blacklisted: bool,
    pub entry: Option<BlacklistEntry>,
}

pub async fn token_status(
    token_id: String,
    _ctx: AuthContext,
    session_store: Arc<dyn SessionStore>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let token_id = SessionId::from(token_id.as_str());
    let blacklisted = session_store
        .is_blacklisted(&token_id)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;
    let entry = if blacklisted {
        session_store
            .get_blacklist_entry(&token_id)
            .await
            .map_err(ApiErrorCode::from)
            .map_err(reject::custom)?
    } else {
        None
    };

    Ok(warp::reply::json(&ApiResponse::ok(TokenStatusResponse {
        token_id,
        blacklisted,
        entry,
    })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSessionsResponse {
    pub user_id: UserId,
    pub online: Option<UserOnlineStatus>,
    pub sessions: Vec<SessionInfo>,
}

pub async fn user_sessions(
    user_id: UserId,
    _ctx: AuthContext,
    session_store: Arc<dyn SessionStore>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let sessions = session_store
        .list_session_details(user_id)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;
    let online = session_store
        .get_online_status(user_id)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(UserSessionsResponse {
        user_id,
        online,
        sessions,
    })))
}

pub async fn revoke_user_sessions(
    user_id: UserId,
    ctx: AuthContext,
    session_store: Arc<dyn SessionStore>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let revoked = session_store
        .revoke_all_sessions(user_id, reason::ADMIN_REVOKE_ALL)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;
    info!(%user_id, revoked, requested_by = %ctx.user_id, "sessions revoked by administrator");

    Ok(warp::reply::json(&ApiResponse::ok(RevokedCountResponse {
        revoked,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeTokenRequest {
    pub token_id: String,
    pub reason: Option<String>,
}

pub async fn revoke_token(
    body: RevokeTokenRequest,
    _ctx: AuthContext,
    session_store: Arc<dyn SessionStore>,
) -> Result<impl warp::Reply, warp::Rejection> {
    if body.token_id.trim().is_empty() {
        return Err(reject::custom(ApiErrorCode::BadRequest));
    }
    let token_id = SessionId::from(body.token_id.as_str());
    let revoke_reason = body
        .reason
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| reason::ADMIN_REVOKE.to_string());
    session_store
        .revoke_token(&token_id, &revoke_reason)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(LogoutResponse {
        session_id: token_id,
    })))
}

// endregion
