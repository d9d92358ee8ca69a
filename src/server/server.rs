use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_memory::*;
use crate::infra_redis::*;
use crate::logger::*;
use crate::server::*;
use crate::settings::Settings;
use std::sync::Arc;
use std::time::Instant;

pub struct Server {
    pub token_issuer: Arc<dyn TokenIssuer>,
    pub auth_validator: Arc<dyn AuthValidator>,
    pub session_store: Arc<dyn SessionStore>,
    pub token_monitor: Arc<TokenMonitor>,
    /// Adds `Secure` to the token cookies.
    pub secure_cookies: bool,
    pub started_at: Instant,
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let kv: Arc<dyn KvStore> = match settings.session.backend.as_str() {
            "redis" => {
                Arc::new(RedisKvStore::connect(&settings.redis.dsn, &settings.redis_timeouts()).await?)
            }
            "memory" => {
                warn!("session backend is in-memory; sessions are lost on restart");
                Arc::new(InMemoryKvStore::new())
            }
            other => return Err(anyhow::anyhow!("Unknown session backend: {}", other)),
        };

        let user_directory: Arc<dyn UserDirectory> = match settings.user.backend.as_str() {
            "fake" => Arc::new(InMemoryUserDirectory::permissive()),
            other => return Err(anyhow::anyhow!("Unknown user backend: {}", other)),
        };

        let session_store: Arc<dyn SessionStore> = Arc::new(KvSessionStore::new(
            kv,
            settings.session_store_config(),
        ));
        let token_codec: Arc<dyn TokenCodec> = Arc::new(JwtHs256Codec::new(settings.jwt_config()));

        let mut server = Self::from_parts(
            token_codec,
            session_store,
            user_directory,
            Arc::new(TracingMonitoringSink),
            settings.issuer_config(),
            settings.monitor_config(),
        );
        server.secure_cookies = settings.http.secure_cookies;
        Ok(server)
    }

    /// Wires the services around already-built adapters and starts the monitor.
    pub fn from_parts(
        token_codec: Arc<dyn TokenCodec>,
        session_store: Arc<dyn SessionStore>,
        user_directory: Arc<dyn UserDirectory>,
        sink: Arc<dyn MonitoringSink>,
        issuer_config: IssuerConfig,
        monitor_config: MonitorConfig,
    ) -> Self {
        let auth_validator: Arc<dyn AuthValidator> = Arc::new(JwtAuthValidator::new(
            token_codec.clone(),
            session_store.clone(),
        ));
        let token_issuer: Arc<dyn TokenIssuer> = Arc::new(JwtTokenIssuer::new(
            token_codec,
            session_store.clone(),
            user_directory,
            issuer_config,
        ));

        let token_monitor = Arc::new(TokenMonitor::new(
            session_store.clone(),
            sink,
            monitor_config,
        ));
        token_monitor.start();

        info!("server started");

        Self {
            token_issuer,
            auth_validator,
            session_store,
            token_monitor,
            secure_cookies: false,
            started_at: Instant::now(),
        }
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");
        if !self.token_monitor.stop() {
            debug!("token monitor was not running");
        }
    }
}
