use crate::application_impl::{IssuerConfig, JwtConfig, SessionStoreConfig};
use crate::infra_redis::RedisTimeouts;
use crate::logger::LogConfig;
use crate::server::MonitorConfig;
use anyhow::{Result, anyhow};
use config::{Config, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub http: Http,
    pub log: Log,
    pub redis: Redis,
    pub jwt: Jwt,
    pub session: Session,
    pub monitor: Monitor,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub address: String,
    /// Serve plain HTTP when either path is missing.
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    #[serde(default)]
    pub secure_cookies: bool,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[derive(Deserialize)]
pub struct Redis {
    pub dsn: String,
    pub connect_timeout_secs: u64,
    pub response_timeout_secs: u64,
}

#[derive(Deserialize)]
pub struct Jwt {
    pub issuer: String,
    /// Overridden by `JWT_SIGNING_KEY` when set.
    pub signing_key: String,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    #[serde(default)]
    pub leeway_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Session {
    pub backend: String, // "redis" or "memory"
    #[serde(default)]
    pub key_namespace: String,
    pub blacklist_min_ttl_secs: u64,
    pub blacklist_max_ttl_secs: u64,
    pub blacklist_default_ttl_secs: u64,
    pub online_status_ttl_secs: u64,
    pub max_sessions_per_user: usize,
    pub rotate_refresh_tokens: bool,
}

#[derive(Debug, Deserialize)]
pub struct Monitor {
    pub cleanup_interval_secs: u64,
    pub health_check_interval_secs: u64,
    pub stats_interval_secs: u64,
    pub blacklist_threshold: u64,
    pub refresh_token_threshold: u64,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub backend: String, // "fake" accepts every user
}

// Both carry credentials.
impl std::fmt::Debug for Redis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redis")
            .field("dsn", &"<redacted>")
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("response_timeout_secs", &self.response_timeout_secs)
            .finish()
    }
}

impl std::fmt::Debug for Jwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jwt")
            .field("issuer", &self.issuer)
            .field("signing_key", &"<redacted>")
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

impl Settings {
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            filter: self.log.filter.clone(),
        }
    }

    pub fn redis_timeouts(&self) -> RedisTimeouts {
        RedisTimeouts {
            connect: Duration::from_secs(self.redis.connect_timeout_secs),
            response: Duration::from_secs(self.redis.response_timeout_secs),
        }
    }

    pub fn jwt_config(&self) -> JwtConfig {
        let key = std::env::var("JWT_SIGNING_KEY").unwrap_or_else(|_| self.jwt.signing_key.clone());
        JwtConfig {
            issuer: self.jwt.issuer.clone(),
            access_ttl: Duration::from_secs(self.jwt.access_ttl_secs),
            refresh_ttl: Duration::from_secs(self.jwt.refresh_ttl_secs),
            signing_key: key.into_bytes(),
            leeway: Duration::from_secs(self.jwt.leeway_secs),
        }
    }

    /// Record and set TTLs follow the token lifetimes so the store never
    /// outlives the signatures it backs.
    pub fn session_store_config(&self) -> SessionStoreConfig {
        SessionStoreConfig {
            key_namespace: self.session.key_namespace.clone(),
            access_token_ttl: Duration::from_secs(self.jwt.access_ttl_secs),
            refresh_token_ttl: Duration::from_secs(self.jwt.refresh_ttl_secs),
            blacklist_min_ttl: Duration::from_secs(self.session.blacklist_min_ttl_secs),
            blacklist_max_ttl: Duration::from_secs(self.session.blacklist_max_ttl_secs),
            blacklist_default_ttl: Duration::from_secs(self.session.blacklist_default_ttl_secs),
            online_status_ttl: Duration::from_secs(self.session.online_status_ttl_secs),
        }
    }

    pub fn issuer_config(&self) -> IssuerConfig {
        IssuerConfig {
            max_sessions_per_user: self.session.max_sessions_per_user,
            rotate_refresh_tokens: self.session.rotate_refresh_tokens,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            cleanup_interval: Duration::from_secs(self.monitor.cleanup_interval_secs),
            health_check_interval: Duration::from_secs(self.monitor.health_check_interval_secs),
            stats_interval: Duration::from_secs(self.monitor.stats_interval_secs),
            blacklist_threshold: self.monitor.blacklist_threshold,
            refresh_token_threshold: self.monitor.refresh_token_threshold,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.session.blacklist_min_ttl_secs > self.session.blacklist_max_ttl_secs {
            return Err(anyhow!(
                "session.blacklist_min_ttl_secs ({}) exceeds blacklist_max_ttl_secs ({})",
                self.session.blacklist_min_ttl_secs,
                self.session.blacklist_max_ttl_secs
            ));
        }
        if self.jwt.signing_key.is_empty() && std::env::var("JWT_SIGNING_KEY").is_err() {
            return Err(anyhow!("no JWT signing key configured"));
        }
        let intervals = [
            ("monitor.cleanup_interval_secs", self.monitor.cleanup_interval_secs),
            ("monitor.health_check_interval_secs", self.monitor.health_check_interval_secs),
            ("monitor.stats_interval_secs", self.monitor.stats_interval_secs),
            ("jwt.access_ttl_secs", self.jwt.access_ttl_secs),
            ("jwt.refresh_ttl_secs", self.jwt.refresh_ttl_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(anyhow!("{name} must be positive"));
        }
        Ok(())
    }
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;
    settings.validate()?;

    Ok(settings)
}
