use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::QueueError;

const REDIS_LOCK_PREFIX: &str = "patient_queue:lock";
const REDIS_POLL_INTERVAL: Duration = Duration::from_millis(25);

// Deletes the key only while it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Proof that the caller holds an organization's queue lock.
#[derive(Debug)]
pub struct LockLease {
    organization_id: Uuid,
    token: String,
    guard: Option<OwnedMutexGuard<()>>,
}

/// Serializes mutations of one organization's queue. Different
/// organizations never contend.
#[async_trait]
pub trait OrganizationLock: Send + Sync {
    /// Fails with `LockTimeout` when the lock cannot be taken in time.
    async fn acquire(&self, organization_id: Uuid) -> Result<LockLease, QueueError>;

    async fn release(&self, lease: LockLease) -> Result<(), QueueError>;
}

/// Per-organization async mutexes for a single process.
pub struct InProcessOrganizationLock {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    timeout: Duration,
}

impl InProcessOrganizationLock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub async fn tracked_organizations(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[async_trait]
impl OrganizationLock for InProcessOrganizationLock {
    async fn acquire(&self, organization_id: Uuid) -> Result<LockLease, QueueError> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(organization_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        match timeout(self.timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(LockLease {
                organization_id,
                token: Uuid::new_v4().to_string(),
                guard: Some(guard),
            }),
            Err(_) => {
                warn!("Queue lock for organization {} not acquired within {:?}", organization_id, self.timeout);
                Err(QueueError::LockTimeout {
                    organization_id,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn release(&self, mut lease: LockLease) -> Result<(), QueueError> {
        drop(lease.guard.take());

        let mut locks = self.locks.lock().await;
        let idle = locks
            .get(&lease.organization_id)
            .map(|mutex| Arc::strong_count(mutex) == 1)
            .unwrap_or(false);
        if idle {
            locks.remove(&lease.organization_id);
        }
        Ok(())
    }
}

/// Redis-backed lock for deployments running several API instances.
///
/// Uses `SET key token NX PX ttl`; the TTL bounds how long a crashed holder
/// can block its organization.
pub struct RedisOrganizationLock {
    pool: Pool,
    timeout: Duration,
    ttl: Duration,
    release_script: redis::Script,
}

impl RedisOrganizationLock {
    pub async fn connect(redis_url: &str, timeout: Duration, ttl: Duration) -> Result<Self, QueueError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| QueueError::io("redis_pool", e))?;

        let lock = Self::from_pool(pool, timeout, ttl);
        let mut conn = lock.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::io("redis_ping", e))?;

        info!("Redis queue lock initialized");
        Ok(lock)
    }

    pub fn from_pool(pool: Pool, timeout: Duration, ttl: Duration) -> Self {
        Self {
            pool,
            timeout,
            ttl,
            release_script: redis::Script::new(RELEASE_SCRIPT),
        }
    }

    pub fn lock_key(organization_id: Uuid) -> String {
        format!("{}:{}", REDIS_LOCK_PREFIX, organization_id)
    }

    async fn connection(&self) -> Result<Connection, QueueError> {
        self.pool
            .get()
            .await
            .map_err(|e| QueueError::io("redis_connection", e))
    }
}

#[async_trait]
impl OrganizationLock for RedisOrganizationLock {
    async fn acquire(&self, organization_id: Uuid) -> Result<LockLease, QueueError> {
        let key = Self::lock_key(organization_id);
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.timeout;
        let mut conn = self.connection().await?;

        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(self.ttl.as_millis() as u64)
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::io("lock_acquire", e))?;

            if acquired.is_some() {
                debug!("Acquired queue lock {}", key);
                return Ok(LockLease {
                    organization_id,
                    token,
                    guard: None,
                });
            }

            if Instant::now() + REDIS_POLL_INTERVAL > deadline {
                warn!("Queue lock {} not acquired within {:?}", key, self.timeout);
                return Err(QueueError::LockTimeout {
                    organization_id,
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            sleep(REDIS_POLL_INTERVAL).await;
        }
    }

    async fn release(&self, lease: LockLease) -> Result<(), QueueError> {
        let key = Self::lock_key(lease.organization_id);
        let mut conn = self.connection().await?;

        let deleted: i64 = self
            .release_script
            .key(&key)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| QueueError::io("lock_release", e))?;

        if deleted == 0 {
            warn!("Queue lock {} expired before release", key);
        }
        Ok(())
    }
}
