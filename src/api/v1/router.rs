use super::error::*;
use super::handler::{self, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use crate::application_port::*;
use crate::domain_model::UserId;
use crate::server::*;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use warp::{Filter, http, reject};

const MAX_BODY_BYTES: u64 = 16 * 1024;

pub fn routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    auth_routes(server.clone()).or(monitor_routes(server))
}

fn auth_routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let secure_cookies = server.secure_cookies;

    let refresh = warp::post()
        .and(warp::path!("auth" / "refresh"))
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(warp::cookie::optional::<String>(REFRESH_TOKEN_COOKIE))
        .and(warp::header::optional::<String>(http::header::USER_AGENT.as_ref()))
        .and(with(server.token_issuer.clone()))
        .and(warp::any().map(move || secure_cookies))
        .and_then(handler::refresh);

    let logout = warp::post()
        .and(warp::path!("auth" / "logout"))
        .and(with_verification(server.auth_validator.clone()))
        .and(with(server.session_store.clone()))
        .and(warp::any().map(move || secure_cookies))
        .and_then(handler::logout);

    let logout_all = warp::post()
        .and(warp::path!("auth" / "logout_all"))
        .and(with_verification(server.auth_validator.clone()))
        .and(with(server.session_store.clone()))
        .and(warp::any().map(move || secure_cookies))
        .and_then(handler::logout_all);

    let sessions = warp::get()
        .and(warp::path!("auth" / "sessions"))
        .and(with_verification(server.auth_validator.clone()))
        .and(with(server.session_store.clone()))
        .and_then(handler::list_own_sessions);

    let revoke_session = warp::delete()
        .and(warp::path!("auth" / "sessions" / String))
        .and(with_verification(server.auth_validator.clone()))
        .and(with(server.session_store.clone()))
        .and_then(handler::revoke_own_session);

    refresh
        .or(logout)
        .or(logout_all)
        .or(sessions)
        .or(revoke_session)
}

fn monitor_routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let health = warp::get()
        .and(warp::path!("monitor" / "health"))
        .and(with(server.token_monitor.clone()))
        .and_then(handler::health);

    let stats = warp::get()
        .and(warp::path!("monitor" / "stats"))
        .and(with_verification(server.auth_validator.clone()))
        .and(with(server.session_store.clone()))
        .and_then(handler::stats);

    let started_at: Instant = server.started_at;
    let metrics = warp::get()
        .and(warp::path!("monitor" / "metrics"))
        .and(with_verification(server.auth_validator.clone()))
        .and(with(server.session_store.clone()))
        .and(with(server.token_monitor.clone()))
        .and(warp::any().map(move || started_at))
        .and_then(handler::system_metrics);

    let data = warp::get()
        .and(warp::path!("monitor" / "data"))
        .and(with_verification(server.auth_validator.clone()))
        .and(with(server.token_monitor.clone()))
        .and_then(handler::monitoring_data);

    let cleanup = warp::post()
        .and(warp::path!("monitor" / "cleanup"))
        .and(with_verification(server.auth_validator.clone()))
        .and(with(server.token_monitor.clone()))
        .and_then(handler::force_cleanup);

    let token_status = warp::get()
        .and(warp::path!("monitor" / "tokens" / String))
        .and(with_verification(server.auth_validator.clone()))
        .and(with(server.session_store.clone()))
        .and_then(handler::token_status);

    let revoke_token = warp::post()
        .and(warp::path!("monitor" / "tokens" / "revoke"))
        .and(warp::body::json())
        .and(with_verification(server.auth_validator.clone()))
        .and(with(server.session_store.clone()))
        .and_then(handler::revoke_token);

    let user_sessions = warp::get()
        .and(warp::path!("monitor" / "users" / UserId / "sessions"))
        .and(with_verification(server.auth_validator.clone()))
        .and(with(server.session_store.clone()))
        .and_then(handler::user_sessions);

    let revoke_user_sessions = warp::delete()
        .and(warp::path!("monitor" / "users" / UserId / "sessions"))
        .and(with_verification(server.auth_validator.clone()))
        .and(with(server.session_store.clone()))
        .and_then(handler::revoke_user_sessions);

    health
        .or(stats)
        .or(metrics)
        .or(data)
        .or(cleanup)
        .or(token_status)
        .or(revoke_token)
        .or(user_sessions)
        .or(revoke_user_sessions)
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}

/// Requires a valid, unrevoked access token, taken from the `access_token`
/// cookie or else from `Authorization: Bearer`.
fn with_verification(
    auth_validator: Arc<dyn AuthValidator>,
) -> impl Filter<Extract = (AuthContext,), Error = warp::Rejection> + Clone {
    warp::cookie::optional::<String>(ACCESS_TOKEN_COOKIE)
        .and(warp::header::optional::<String>(
            http::header::AUTHORIZATION.as_ref(),
        ))
        .and_then(move |cookie: Option<String>, header: Option<String>| {
            let auth_validator = auth_validator.clone();
            async move {
                let token = match (cookie.filter(|c| !c.is_empty()), header) {
                    (Some(token), _) => token,
                    (None, Some(header)) => match header.strip_prefix("Bearer ") {
                        Some(token) => token.trim().to_owned(),
                        None => return Err(reject::custom(ApiErrorCode::InvalidToken)),
                    },
                    (None, None) => return Err(reject::custom(ApiErrorCode::InvalidToken)),
                };
                auth_validator
                    .validate_access(&token)
                    .await
                    .map_err(ApiErrorCode::from)
                    .map_err(reject::custom)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::*;
    use crate::domain_port::*;
    use crate::infra_memory::*;
    use serde_json::Value;
    use std::time::Duration;

    struct Fixture {
        server: Arc<Server>,
        directory: Arc<InMemoryUserDirectory>,
    }

    fn fixture() -> Fixture {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let session_store: Arc<dyn SessionStore> =
            Arc::new(KvSessionStore::new(kv, SessionStoreConfig::default()));
        let codec: Arc<dyn TokenCodec> = Arc::new(JwtHs256Codec::new(JwtConfig {
            issuer: "sessionkeeper.test".to_string(),
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(24 * 60 * 60),
            signing_key: b"router-test-key".to_vec(),
            leeway: Duration::ZERO,
        }));
        let directory = Arc::new(InMemoryUserDirectory::new());
        let server = Arc::new(Server::from_parts(
            codec,
            session_store,
            directory.clone(),
            Arc::new(TracingMonitoringSink),
            IssuerConfig::default(),
            Default::default(),
        ));
        Fixture { server, directory }
    }

    fn json_of(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn logout_revokes_the_presented_session() {
        let f = fixture();
        let user = UserId::new_random();
        f.directory.insert(user, "someone@example.com");
        let issued = f
            .server
            .token_issuer
            .issue_session(user, "someone@example.com", "test-agent")
            .await
            .unwrap();
        let api = routes(f.server.clone()).recover(recover_error);
        let bearer = format!("Bearer {}", issued.access_token.0);

        let resp = warp::test::request()
            .method("POST")
            .path("/auth/logout")
            .header("authorization", &bearer)
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 200);

        let resp = warp::test::request()
            .method("GET")
            .path("/auth/sessions")
            .header("authorization", &bearer)
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 401);
        let json = json_of(resp.body());
        assert_eq!(json["error"]["code"], "TokenRevoked");

        f.server.shutdown().await;
    }

    #[tokio::test]
    async fn refresh_token_cannot_authorize_requests() {
        let f = fixture();
        let user = UserId::new_random();
        f.directory.insert(user, "someone@example.com");
        let issued = f
            .server
            .token_issuer
            .issue_session(user, "someone@example.com", "test-agent")
            .await
            .unwrap();
        let api = routes(f.server.clone()).recover(recover_error);

        let resp = warp::test::request()
            .method("GET")
            .path("/monitor/stats")
            .header("authorization", format!("Bearer {}", issued.refresh_token.0))
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 401);
        assert_eq!(json_of(resp.body())["error"]["code"], "WrongTokenKind");

        f.server.shutdown().await;
    }

    #[tokio::test]
    async fn refresh_endpoint_rotates_session() {
        let f = fixture();
        let user = UserId::new_random();
        f.directory.insert(user, "someone@example.com");
        let issued = f
            .server
            .token_issuer
            .issue_session(user, "someone@example.com", "test-agent")
            .await
            .unwrap();
        let api = routes(f.server.clone()).recover(recover_error);

        let resp = warp::test::request()
            .method("POST")
            .path("/auth/refresh")
            .header("user-agent", "curl/8")
            .json(&serde_json::json!({ "refreshToken": issued.refresh_token.0 }))
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 200);
        let json = json_of(resp.body());
        assert_eq!(json["success"], true);
        assert_ne!(json["data"]["sessionId"], issued.session_id.as_str());

        f.server.shutdown().await;
    }

    #[tokio::test]
    async fn health_is_public_and_missing_token_is_unauthorized() {
        let f = fixture();
        let api = routes(f.server.clone()).recover(recover_error);

        let resp = warp::test::request()
            .method("GET")
            .path("/monitor/health")
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 200);
        assert_eq!(json_of(resp.body())["data"]["overallHealthy"], true);

        let resp = warp::test::request()
            .method("GET")
            .path("/monitor/data")
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 401);

        f.server.shutdown().await;
    }

    #[tokio::test]
    async fn admin_can_revoke_arbitrary_token_once() {
        let f = fixture();
        let admin = UserId::new_random();
        f.directory.insert(admin, "admin@example.com");
        let issued = f
            .server
            .token_issuer
            .issue_session(admin, "admin@example.com", "console")
            .await
            .unwrap();
        let api = routes(f.server.clone()).recover(recover_error);
        let bearer = format!("Bearer {}", issued.access_token.0);

        let revoke = || {
            warp::test::request()
                .method("POST")
                .path("/monitor/tokens/revoke")
                .header("authorization", &bearer)
                .json(&serde_json::json!({ "tokenId": "leaked-token" }))
        };
        assert_eq!(revoke().reply(&api).await.status(), 200);
        assert_eq!(revoke().reply(&api).await.status(), 409);

        let resp = warp::test::request()
            .method("GET")
            .path("/monitor/tokens/leaked-token")
            .header("authorization", &bearer)
            .reply(&api)
            .await;
        let json = json_of(resp.body());
        assert_eq!(json["data"]["blacklisted"], true);
        assert_eq!(json["data"]["entry"]["reason"], "admin_revoke");

        f.server.shutdown().await;
    }

    fn set_cookies(resp: &http::Response<warp::hyper::body::Bytes>) -> Vec<String> {
        resp.headers()
            .get_all(http::header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn access_cookie_authorizes_requests() {
        let f = fixture();
        let user = UserId::new_random();
        f.directory.insert(user, "someone@example.com");
        let issued = f
            .server
            .token_issuer
            .issue_session(user, "someone@example.com", "browser")
            .await
            .unwrap();
        let api = routes(f.server.clone()).recover(recover_error);

        let resp = warp::test::request()
            .method("GET")
            .path("/auth/sessions")
            .header("cookie", format!("access_token={}", issued.access_token.0))
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 200);
        assert_eq!(
            json_of(resp.body())["data"]["currentSessionId"],
            issued.session_id.as_str()
        );

        f.server.shutdown().await;
    }

    #[tokio::test]
    async fn refresh_reads_cookie_and_sets_both_token_cookies() {
        let f = fixture();
        let user = UserId::new_random();
        f.directory.insert(user, "someone@example.com");
        let issued = f
            .server
            .token_issuer
            .issue_session(user, "someone@example.com", "browser")
            .await
            .unwrap();
        let api = routes(f.server.clone()).recover(recover_error);

        let resp = warp::test::request()
            .method("POST")
            .path("/auth/refresh")
            .header("cookie", format!("refresh_token={}", issued.refresh_token.0))
            .body("")
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 200);
        let json = json_of(resp.body());
        let access = json["data"]["accessToken"].as_str().unwrap().to_string();
        let refresh = json["data"]["refreshToken"].as_str().unwrap().to_string();

        let cookies = set_cookies(&resp);
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().any(|c| c.starts_with(&format!("access_token={access};"))));
        assert!(cookies.iter().any(|c| c.starts_with(&format!("refresh_token={refresh};"))));
        assert!(cookies.iter().all(|c| c.contains("HttpOnly") && !c.contains("Secure")));

        f.server.shutdown().await;
    }

    #[tokio::test]
    async fn refresh_without_any_token_is_unauthorized() {
        let f = fixture();
        let api = routes(f.server.clone()).recover(recover_error);

        let resp = warp::test::request()
            .method("POST")
            .path("/auth/refresh")
            .body("")
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 401);
        assert_eq!(json_of(resp.body())["error"]["code"], "InvalidToken");

        f.server.shutdown().await;
    }

    #[tokio::test]
    async fn logout_clears_token_cookies() {
        let f = fixture();
        let user = UserId::new_random();
        f.directory.insert(user, "someone@example.com");
        let issued = f
            .server
            .token_issuer
            .issue_session(user, "someone@example.com", "browser")
            .await
            .unwrap();
        let api = routes(f.server.clone()).recover(recover_error);

        let resp = warp::test::request()
            .method("POST")
            .path("/auth/logout")
            .header("cookie", format!("access_token={}", issued.access_token.0))
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 200);

        let cookies = set_cookies(&resp);
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().any(|c| c.starts_with("access_token=;")));
        assert!(cookies.iter().any(|c| c.starts_with("refresh_token=;")));
        assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));

        f.server.shutdown().await;
    }

    #[tokio::test]
    async fn metrics_combine_stats_and_health() {
        let f = fixture();
        let user = UserId::new_random();
        f.directory.insert(user, "someone@example.com");
        let issued = f
            .server
            .token_issuer
            .issue_session(user, "someone@example.com", "console")
            .await
            .unwrap();
        let api = routes(f.server.clone()).recover(recover_error);

        let resp = warp::test::request()
            .method("GET")
            .path("/monitor/metrics")
            .header("authorization", format!("Bearer {}", issued.access_token.0))
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 200);
        let json = json_of(resp.body());
        assert_eq!(json["data"]["stats"]["refreshTokenCount"], 1);
        assert_eq!(json["data"]["health"]["storeHealthy"], true);
        assert!(json["data"]["uptimeSecs"].is_u64());

        let resp = warp::test::request()
            .method("GET")
            .path("/monitor/metrics")
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 401);

        f.server.shutdown().await;
    }
}
