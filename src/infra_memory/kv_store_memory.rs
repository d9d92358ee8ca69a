use crate::domain_port::*;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local `KvStore` with lazy expiry on `tokio::time::Instant`, so
/// paused-clock tests can advance through TTLs. `set_available(false)`
/// makes every call fail with `KvError::Unavailable`.
#[derive(Debug)]
pub struct InMemoryKvStore {
    entries: DashMap<String, Entry>,
    available: AtomicBool,
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Writes a string value without expiry, the way a faulty writer would.
    pub fn set_persistent(&self, key: &str, value: &str) {
        self.entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Str(value.to_owned()),
                expires_at: None,
            },
        );
    }

    fn check(&self) -> Result<(), KvError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KvError::Unavailable)
        }
    }

    /// Drops the key if it has expired and returns a snapshot of the live entry.
    fn live(&self, key: &str) -> Option<Entry> {
        let snapshot = self.entries.get(key).map(|e| e.value().clone())?;
        if snapshot.is_live(Instant::now()) {
            Some(snapshot)
        } else {
            self.evict_if_expired(key);
            None
        }
    }

    fn evict_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, e| !e.is_live(now));
    }

    fn put_str(&self, key: &str, value: &str, ttl: Duration) {
        self.entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Str(value.to_owned()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs(ttl))),
            },
        );
    }

    fn remove_member(&self, key: &str, member: &str) {
        let emptied = match self.entries.get_mut(key) {
            Some(mut entry) => match &mut entry.value {
                Value::Set(members) => {
                    members.remove(member);
                    members.is_empty()
                }
                Value::Str(_) => false,
            },
            None => false,
        };
        // An empty set does not exist.
        if emptied {
            self.entries
                .remove_if(key, |_, e| matches!(&e.value, Value::Set(m) if m.is_empty()));
        }
    }

    fn live_keys(&self, pattern: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_live(now) && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort_unstable();
        keys
    }
}

fn wrong_type(key: &str) -> KvError {
    KvError::Backend(format!("WRONGTYPE operation against key {key}"))
}

/// Glob matching limited to the `*` wildcard, which is all the key layout uses.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !key.starts_with(first) || key.len() < first.len() + last.len() || !key.ends_with(last) {
        return false;
    }
    let mut rest = &key[first.len()..key.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}

#[async_trait::async_trait]
impl KvStore for InMemoryKvStore {
    async fn ping(&self) -> Result<(), KvError> {
        self.check()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.check()?;
        match self.live(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s)),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        self.check()?;
        self.put_str(key, value, ttl);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, KvError> {
        self.check()?;
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|k| self.entries.remove(k))
            .filter(|(_, e)| e.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        self.check()?;
        Ok(self.live(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, KvError> {
        self.check()?;
        Ok(match self.live(key) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(Instant::now())),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        self.check()?;
        if self.live(key).is_none() {
            return Ok(false);
        }
        let deadline = Instant::now() + Duration::from_secs(ttl_secs(ttl));
        Ok(match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(deadline);
                true
            }
            None => false,
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        self.check()?;
        // An expired set must not be resurrected with its old members.
        self.evict_if_expired(key);
        let mut entry = self.entries.entry(key.to_owned()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(members) => {
                members.insert(member.to_owned());
                Ok(())
            }
            Value::Str(_) => Err(wrong_type(key)),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        self.check()?;
        if let Some(entry) = self.live(key) {
            if matches!(entry.value, Value::Str(_)) {
                return Err(wrong_type(key));
            }
            self.remove_member(key, member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        self.check()?;
        match self.live(key) {
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => {
                let mut members: Vec<String> = members.into_iter().collect();
                members.sort_unstable();
                Ok(members)
            }
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        self.check()?;
        Ok(self.live_keys(pattern))
    }

    async fn purge_persistent(&self, pattern: &str) -> Result<u64, KvError> {
        self.check()?;
        let mut purged = 0;
        for key in self.live_keys(pattern) {
            if self
                .entries
                .remove_if(&key, |_, e| e.expires_at.is_none())
                .is_some()
            {
                purged += 1;
            }
        }
        Ok(purged)
    }

    async fn exec_batch(&self, ops: Vec<KvOp>) -> Result<(), KvError> {
        self.check()?;
        for op in ops {
            match op {
                KvOp::SetEx { key, value, ttl } => self.put_str(&key, &value, ttl),
                KvOp::Del { key } => {
                    self.entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_prefix_and_infix_patterns() {
        assert!(glob_match("blacklist:*", "blacklist:abc"));
        assert!(!glob_match("blacklist:*", "refresh_token:u:abc"));
        assert!(glob_match("refresh_token:*:s1", "refresh_token:u1:s1"));
        assert!(!glob_match("refresh_token:*:s1", "refresh_token:u1:s2"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_disappear_after_their_ttl() {
        let store = InMemoryKvStore::new();
        store
            .set_ex("k", "v", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test(start_paused = true)]
    async fn adding_to_an_expired_set_starts_a_new_one() {
        let store = InMemoryKvStore::new();
        store.sadd("s", "old").await.unwrap();
        store.expire("s", Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        store.sadd("s", "new").await.unwrap();

        assert_eq!(store.smembers("s").await.unwrap(), vec!["new".to_string()]);
        assert_eq!(store.ttl("s").await.unwrap(), KeyTtl::Persistent);
    }

    #[tokio::test]
    async fn removing_last_member_deletes_the_set() {
        let store = InMemoryKvStore::new();
        store.sadd("s", "a").await.unwrap();
        store.srem("s", "a").await.unwrap();
        assert!(!store.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn purge_only_touches_persistent_keys() {
        let store = InMemoryKvStore::new();
        store.set_persistent("blacklist:a", "{}");
        store
            .set_ex("blacklist:b", "{}", Duration::from_secs(60))
            .await
            .unwrap();
        store.set_persistent("other:c", "{}");

        assert_eq!(store.purge_persistent("blacklist:*").await.unwrap(), 1);
        assert!(!store.exists("blacklist:a").await.unwrap());
        assert!(store.exists("blacklist:b").await.unwrap());
        assert!(store.exists("other:c").await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_store_rejects_every_call() {
        let store = InMemoryKvStore::new();
        store.set_available(false);
        assert!(matches!(store.ping().await, Err(KvError::Unavailable)));
        assert!(matches!(store.get("k").await, Err(KvError::Unavailable)));
    }
}
