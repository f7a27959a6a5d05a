//! Best-effort distributed locks
//!
//! Named Redis locks reduce contention on hot documents; they are NOT a
//! correctness mechanism. Row locks (`SELECT … FOR UPDATE`) are the
//! authoritative serializer, so an unreachable lock store degrades to
//! lockless execution with a warning rather than failing the request.
//!
//! Multi-key acquisition sorts keys lexicographically before acquiring, so
//! two commands competing for overlapping key sets cannot deadlock. Keys
//! follow `lock:<scope>:<tenant>:<id...>`. Holders never extend the TTL.

use std::time::Duration;

use redis::aio::ConnectionManager;
use uuid::Uuid;

/// Default lock TTL; long operations must complete within it
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// How long an acquirer will wait for a busy key before proceeding lockless
const ACQUIRE_WAIT: Duration = Duration::from_secs(5);

/// Poll interval while a key is busy
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Compare-and-delete: release only if the stored token is ours
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
else
  return 0
end
"#;

/// Best-effort named lock manager over a shared Redis connection
#[derive(Clone)]
pub struct LockManager {
    conn: Option<ConnectionManager>,
}

impl LockManager {
    /// Connect to Redis; on failure the manager runs in disabled mode
    pub async fn connect(redis_url: Option<&str>) -> Self {
        let Some(url) = redis_url else {
            tracing::info!("REDIS_URL not set, distributed locks disabled");
            return Self { conn: None };
        };

        match redis::Client::open(url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => {
                    tracing::info!("Connected to Redis lock store");
                    Self { conn: Some(conn) }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Redis unreachable, distributed locks disabled");
                    Self { conn: None }
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Invalid Redis URL, distributed locks disabled");
                Self { conn: None }
            }
        }
    }

    /// A manager that never locks (tests)
    pub fn disabled() -> Self {
        Self { conn: None }
    }

    /// Run `fut` while holding the named lock
    pub async fn with_lock<T>(
        &self,
        key: &str,
        ttl: Duration,
        fut: impl std::future::Future<Output = T>,
    ) -> T {
        self.with_locks(std::slice::from_ref(&key.to_string()), ttl, fut)
            .await
    }

    /// Run `fut` while holding every named lock
    ///
    /// Keys are sorted lexicographically before acquisition and released in
    /// reverse order. Acquisition failures (store outage, wait exhausted)
    /// log a warning and fall through to running `fut` anyway.
    pub async fn with_locks<T>(
        &self,
        keys: &[String],
        ttl: Duration,
        fut: impl std::future::Future<Output = T>,
    ) -> T {
        let Some(conn) = &self.conn else {
            return fut.await;
        };

        let mut sorted: Vec<String> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let token = Uuid::new_v4().to_string();
        let mut conn = conn.clone();
        let mut held: Vec<String> = Vec::with_capacity(sorted.len());

        for key in &sorted {
            if Self::acquire_one(&mut conn, key, &token, ttl).await {
                held.push(key.clone());
            } else {
                tracing::warn!(key = %key, "lock not acquired, proceeding without it");
            }
        }

        let result = fut.await;

        for key in held.iter().rev() {
            Self::release_one(&mut conn, key, &token).await;
        }

        result
    }

    async fn acquire_one(
        conn: &mut ConnectionManager,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + ACQUIRE_WAIT;

        loop {
            let outcome: Result<Option<String>, redis::RedisError> = redis::cmd("SET")
                .arg(key)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async(conn)
                .await;

            match outcome {
                Ok(Some(_)) => return true,
                Ok(None) => {
                    if tokio::time::Instant::now() >= deadline {
                        return false;
                    }
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "lock store error during acquire");
                    return false;
                }
            }
        }
    }

    async fn release_one(conn: &mut ConnectionManager, key: &str, token: &str) {
        let script = redis::Script::new(RELEASE_SCRIPT);
        let outcome: Result<i32, redis::RedisError> =
            script.key(key).arg(token).invoke_async(conn).await;

        if let Err(e) = outcome {
            tracing::warn!(key = %key, error = %e, "lock store error during release");
        }
    }
}

/// Lock key for a document-level command, e.g. `lock:invoice:post:<tenant>:<id>`
pub fn doc_lock_key(scope: &str, tenant_id: &str, id: impl std::fmt::Display) -> String {
    format!("lock:{scope}:{tenant_id}:{id}")
}

/// Lock key guarding one (tenant, location, item) stock balance
pub fn stock_lock_key(
    tenant_id: &str,
    location_id: impl std::fmt::Display,
    item_id: impl std::fmt::Display,
) -> String {
    format!("lock:stock:{tenant_id}:{location_id}:{item_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(
            doc_lock_key("invoice:post", "t1", "abc"),
            "lock:invoice:post:t1:abc"
        );
        assert_eq!(stock_lock_key("t1", "loc7", "item9"), "lock:stock:t1:loc7:item9");
    }

    #[tokio::test]
    async fn test_disabled_manager_runs_future() {
        let locks = LockManager::disabled();
        let keys = vec!["lock:b:t:1".to_string(), "lock:a:t:1".to_string()];
        let value = locks
            .with_locks(&keys, DEFAULT_LOCK_TTL, async { 41 + 1 })
            .await;
        assert_eq!(value, 42);
    }

    #[test]
    fn test_sort_order_is_lexicographic() {
        let mut keys = vec![
            "lock:stock:t1:loc2:item1".to_string(),
            "lock:invoice:post:t1:abc".to_string(),
            "lock:stock:t1:loc1:item9".to_string(),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "lock:invoice:post:t1:abc".to_string(),
                "lock:stock:t1:loc1:item9".to_string(),
                "lock:stock:t1:loc2:item1".to_string(),
            ]
        );
    }
}
