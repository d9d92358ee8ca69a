use crate::domain_port::*;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, RedisError, Script};
use std::time::Duration;

const PURGE_PERSISTENT: &str = include_str!("purge_persistent.lua");
const SCAN_BATCH: usize = 500;

#[derive(Debug, Clone)]
pub struct RedisTimeouts {
    pub connect: Duration,
    pub response: Duration,
}

pub struct RedisKvStore {
    conn: ConnectionManager,
}

impl RedisKvStore {
    pub fn new(conn: ConnectionManager) -> Self {
        RedisKvStore { conn }
    }

    /// Timeouts are fixed for the lifetime of the connection manager.
    pub async fn connect(dsn: &str, timeouts: &RedisTimeouts) -> anyhow::Result<Self> {
        let client = redis::Client::open(dsn)?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(timeouts.connect)
            .set_response_timeout(timeouts.response);
        let conn = client.get_connection_manager_with_config(config).await?;
        Ok(Self::new(conn))
    }
}

fn store_err(e: RedisError) -> KvError {
    if e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() {
        KvError::Unavailable
    } else {
        KvError::Backend(e.to_string())
    }
}

#[async_trait::async_trait]
impl KvStore for RedisKvStore {
    async fn ping(&self) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(KvError::Backend(format!("unexpected PING reply: {pong}")))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        let val: Option<String> = conn.get(key).await.map_err(store_err)?;
        Ok(val)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value, ttl_secs(ttl))
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, KvError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(keys).await.map_err(store_err)?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(key).await.map_err(store_err)?;
        Ok(found)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, KvError> {
        let mut conn = self.conn.clone();
        let secs: i64 = conn.ttl(key).await.map_err(store_err)?;
        Ok(match secs {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            s if s >= 0 => KeyTtl::Expires(Duration::from_secs(s as u64)),
            other => return Err(KvError::Backend(format!("unexpected TTL reply: {other}"))),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let applied: bool = conn
            .expire(key, ttl_secs(ttl) as i64)
            .await
            .map_err(store_err)?;
        Ok(applied)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await.map_err(store_err)?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(key, member).await.map_err(store_err)?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(key).await.map_err(store_err)?;
        Ok(members)
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn purge_persistent(&self, pattern: &str) -> Result<u64, KvError> {
        let mut conn = self.conn.clone();
        let script = Script::new(PURGE_PERSISTENT);
        // One SCAN batch per EVAL, so the server is only blocked for a batch.
        let mut cursor = "0".to_string();
        let mut purged = 0;
        loop {
            let (next, n): (String, u64) = script
                .arg(&cursor)
                .arg(pattern)
                .arg(SCAN_BATCH)
                .invoke_async(&mut conn)
                .await
                .map_err(store_err)?;
            purged += n;
            if next == "0" {
                break;
            }
            cursor = next;
        }
        Ok(purged)
    }

    async fn exec_batch(&self, ops: Vec<KvOp>) -> Result<(), KvError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for op in &ops {
            match op {
                KvOp::SetEx { key, value, ttl } => {
                    pipe.set_ex(key, value, ttl_secs(*ttl)).ignore();
                }
                KvOp::Del { key } => {
                    pipe.del(key).ignore();
                }
            }
        }
        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> RedisKvStore {
        let dsn = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let timeouts = RedisTimeouts {
            connect: Duration::from_secs(5),
            response: Duration::from_secs(5),
        };
        RedisKvStore::connect(&dsn, &timeouts).await.unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires actual Redis server
    async fn purge_walks_every_scan_batch() {
        let store = store().await;
        let prefix = format!("purge-test:{}:", uuid::Uuid::new_v4());
        let persistent = SCAN_BATCH * 2 + 3;

        let mut conn = store.conn.clone();
        let mut pipe = redis::pipe();
        for i in 0..persistent {
            pipe.set(format!("{prefix}{i}"), "x").ignore();
        }
        let _: () = pipe.query_async(&mut conn).await.unwrap();
        store
            .set_ex(&format!("{prefix}bounded"), "x", Duration::from_secs(60))
            .await
            .unwrap();

        let purged = store.purge_persistent(&format!("{prefix}*")).await.unwrap();
        assert_eq!(purged, persistent as u64);
        assert_eq!(
            store.scan_match(&format!("{prefix}*")).await.unwrap(),
            vec![format!("{prefix}bounded")]
        );

        store.del(&[format!("{prefix}bounded")]).await.unwrap();
    }
}
