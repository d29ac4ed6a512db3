//! Single-flight guard for scan ticks.
//!
//! The local lock prevents overlapping ticks inside one process. The Redis
//! lock extends that across scheduler instances using `SET key token NX PX`
//! with a token-checked release, so a lease that expired and was taken over
//! is never released by its former holder.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use nerdy_common::error::AppError;

/// Redis key guarding the milestone scan.
pub const SCAN_LOCK_KEY: &str = "nerdy:scan:lock";

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub enum RunLock {
    Local(Arc<Mutex<()>>),
    Redis {
        conn: ConnectionManager,
        key: String,
        ttl: Duration,
    },
}

/// Held while a tick runs.
pub enum RunLease {
    Local(OwnedMutexGuard<()>),
    Redis {
        conn: ConnectionManager,
        key: String,
        token: String,
    },
}

impl RunLock {
    pub fn local() -> Self {
        RunLock::Local(Arc::new(Mutex::new(())))
    }

    /// Connect a distributed lock. `ttl` bounds how long a crashed holder
    /// can block other instances.
    pub async fn redis(redis_url: &str, key: &str, ttl: Duration) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(key, ttl_ms = ttl.as_millis() as u64, "Connected Redis run lock");
        Ok(RunLock::Redis {
            conn,
            key: key.to_string(),
            ttl,
        })
    }

    /// Take the lock if nobody holds it. Returns `None` when busy.
    pub async fn try_acquire(&self) -> Result<Option<RunLease>, AppError> {
        match self {
            RunLock::Local(mutex) => Ok(mutex.clone().try_lock_owned().ok().map(RunLease::Local)),
            RunLock::Redis { conn, key, ttl } => {
                let mut conn = conn.clone();
                let token = Uuid::new_v4().to_string();

                // Some("OK") if the key was set, None if another holder has it
                let result: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg(&token)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async(&mut conn)
                    .await?;

                Ok(result.map(|_| RunLease::Redis {
                    conn,
                    key: key.clone(),
                    token,
                }))
            }
        }
    }
}

impl RunLease {
    pub async fn release(self) -> Result<(), AppError> {
        match self {
            RunLease::Local(guard) => {
                drop(guard);
                Ok(())
            }
            RunLease::Redis {
                mut conn,
                key,
                token,
            } => {
                let released: i64 = redis::Script::new(RELEASE_SCRIPT)
                    .key(&key)
                    .arg(&token)
                    .invoke_async(&mut conn)
                    .await?;
                if released == 0 {
                    tracing::warn!(key = %key, "Run lock expired before release");
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_lock_is_single_flight() {
        let lock = RunLock::local();
        let lease = lock.try_acquire().await.unwrap().expect("first acquire");
        assert!(lock.try_acquire().await.unwrap().is_none());

        lease.release().await.unwrap();
        assert!(lock.try_acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clones_share_the_lock() {
        let lock = RunLock::local();
        let other = lock.clone();
        let _lease = lock.try_acquire().await.unwrap().expect("acquire");
        assert!(other.try_acquire().await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires REDIS_URL, run explicitly with --ignored
    async fn test_redis_lock_is_single_flight() {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL");
        let key = format!("nerdy:test:lock:{}", Uuid::new_v4());
        let lock = RunLock::redis(&url, &key, Duration::from_secs(30)).await.unwrap();

        let lease = lock.try_acquire().await.unwrap().expect("first acquire");
        assert!(lock.try_acquire().await.unwrap().is_none());

        lease.release().await.unwrap();
        let again = lock.try_acquire().await.unwrap().expect("acquire after release");
        again.release().await.unwrap();
    }
}
