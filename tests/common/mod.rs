#![allow(dead_code)]

use chrono::{DateTime, Utc};
use sessionkeeper::application_impl::*;
use sessionkeeper::application_port::*;
use sessionkeeper::domain_model::*;
use sessionkeeper::domain_port::*;
use sessionkeeper::infra_memory::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const EMAIL: &str = "someone@example.com";

pub fn jwt_config() -> JwtConfig {
    JwtConfig {
        issuer: "sessionkeeper.test".to_string(),
        access_ttl: Duration::from_secs(15 * 60),
        refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        signing_key: b"integration-test-key".to_vec(),
        leeway: Duration::ZERO,
    }
}

/// Wraps the in-memory store so tests can interleave concurrent callers
/// (every call yields first) and fail writes to chosen keys.
#[derive(Default)]
pub struct GatedKvStore {
    inner: InMemoryKvStore,
    yield_each_call: AtomicBool,
    failing_prefix: Mutex<Option<String>>,
}

impl GatedKvStore {
    pub fn set_available(&self, available: bool) {
        self.inner.set_available(available);
    }

    pub fn set_persistent(&self, key: &str, value: &str) {
        self.inner.set_persistent(key, value);
    }

    pub fn yield_each_call(&self, on: bool) {
        self.yield_each_call.store(on, Ordering::SeqCst);
    }

    /// `set_ex` on keys starting with `prefix` fails until cleared with `None`.
    pub fn fail_writes_to(&self, prefix: Option<&str>) {
        *self.failing_prefix.lock().unwrap() = prefix.map(str::to_owned);
    }

    async fn gate(&self) {
        if self.yield_each_call.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait::async_trait]
impl KvStore for GatedKvStore {
    async fn ping(&self) -> Result<(), KvError> {
        self.gate().await;
        self.inner.ping().await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.gate().await;
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        self.gate().await;
        let failing = self.failing_prefix.lock().unwrap().clone();
        if failing.is_some_and(|prefix| key.starts_with(&prefix)) {
            return Err(KvError::Unavailable);
        }
        self.inner.set_ex(key, value, ttl).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64, KvError> {
        self.gate().await;
        self.inner.del(keys).await
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        self.gate().await;
        self.inner.exists(key).await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, KvError> {
        self.gate().await;
        self.inner.ttl(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        self.gate().await;
        self.inner.expire(key, ttl).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        self.gate().await;
        self.inner.sadd(key, member).await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        self.gate().await;
        self.inner.srem(key, member).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        self.gate().await;
        self.inner.smembers(key).await
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        self.gate().await;
        self.inner.scan_match(pattern).await
    }

    async fn purge_persistent(&self, pattern: &str) -> Result<u64, KvError> {
        self.gate().await;
        self.inner.purge_persistent(pattern).await
    }

    async fn exec_batch(&self, ops: Vec<KvOp>) -> Result<(), KvError> {
        self.gate().await;
        self.inner.exec_batch(ops).await
    }
}

pub struct Harness {
    pub kv: Arc<GatedKvStore>,
    pub store: Arc<KvSessionStore>,
    pub directory: Arc<InMemoryUserDirectory>,
    pub issuer: JwtTokenIssuer,
    pub validator: JwtAuthValidator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_issuer(IssuerConfig::default())
    }

    pub fn with_issuer(cfg: IssuerConfig) -> Self {
        let codec: Arc<dyn TokenCodec> = Arc::new(JwtHs256Codec::new(jwt_config()));
        Self::with_codec(codec, cfg)
    }

    pub fn with_codec(codec: Arc<dyn TokenCodec>, cfg: IssuerConfig) -> Self {
        let kv = Arc::new(GatedKvStore::default());
        let store = Arc::new(KvSessionStore::new(kv.clone(), SessionStoreConfig::default()));
        let directory = Arc::new(InMemoryUserDirectory::new());
        let issuer = JwtTokenIssuer::new(codec.clone(), store.clone(), directory.clone(), cfg);
        let validator = JwtAuthValidator::new(codec, store.clone());
        Self {
            kv,
            store,
            directory,
            issuer,
            validator,
        }
    }

    pub fn user(&self) -> UserId {
        let user_id = UserId::new_random();
        self.directory.insert(user_id, EMAIL);
        user_id
    }

    pub async fn login(&self, user_id: UserId, device: &str) -> IssuedSession {
        self.issuer
            .issue_session(user_id, EMAIL, device)
            .await
            .expect("issue session")
    }
}

pub fn record(user_id: UserId, device: &str, created_at: DateTime<Utc>) -> RefreshTokenRecord {
    RefreshTokenRecord {
        user_id,
        email: EMAIL.to_string(),
        session_id: SessionId::generate(),
        device_info: device.to_string(),
        created_at,
        last_used_at: created_at,
        expires_at: Utc::now() + chrono::Duration::days(7),
    }
}
