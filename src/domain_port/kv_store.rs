use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("backing store unavailable")]
    Unavailable,
    #[error("backing store error: {0}")]
    Backend(String),
}

/// Remaining lifetime of a key as reported by the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    Persistent,
    Expires(Duration),
}

/// One step of a pipelined batch. Steps are applied in order, best effort,
/// without cross-step atomicity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    SetEx {
        key: String,
        value: String,
        ttl: Duration,
    },
    Del {
        key: String,
    },
}

/// Primitives the session store needs from a remote cache. Each call on a
/// single key is atomic at the store level.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    async fn ping(&self) -> Result<(), KvError>;

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Returns the number of keys that existed.
    async fn del(&self, keys: &[String]) -> Result<u64, KvError>;

    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl, KvError>;

    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError>;

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError>;

    /// Incremental scan over keys matching a glob pattern (`*` wildcard).
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, KvError>;

    /// Deletes every key matching `pattern` that has no expiry. The TTL check
    /// and delete of each key are atomic; the pass as a whole is not.
    async fn purge_persistent(&self, pattern: &str) -> Result<u64, KvError>;

    async fn exec_batch(&self, ops: Vec<KvOp>) -> Result<(), KvError>;
}

/// Store TTLs have one-second granularity; never round a live key down to zero.
pub fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 { secs + 1 } else { secs.max(1) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_secs_rounds_up_and_never_returns_zero() {
        assert_eq!(ttl_secs(Duration::from_secs(10)), 10);
        assert_eq!(ttl_secs(Duration::from_millis(10_200)), 11);
        assert_eq!(ttl_secs(Duration::from_millis(1)), 1);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
    }
}
