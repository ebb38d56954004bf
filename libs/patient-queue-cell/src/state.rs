use std::sync::Arc;

use tracing::{info, warn};

use shared_config::{AppConfig, QueueStoreBackend};

use crate::services::{
    InMemoryQueueStore, InProcessOrganizationLock, OrganizationLock, QueueEngine,
    QueueNotificationService, QueueReadModel, QueueStore, RedisOrganizationLock,
    SupabaseQueueStore,
};
use crate::{QueueEngineConfig, QueueError};

/// Shared state behind the queue routes.
pub struct QueueCellState {
    pub config: Arc<AppConfig>,
    pub engine: QueueEngine,
    pub read_model: QueueReadModel,
    pub notifications: QueueNotificationService,
}

impl QueueCellState {
    /// Wires the configured store backend and lock. Redis locking is used
    /// whenever `REDIS_URL` is set.
    pub async fn build(config: Arc<AppConfig>) -> Result<Self, QueueError> {
        let engine_config = QueueEngineConfig::from_app_config(&config);

        let store: Arc<dyn QueueStore> = match config.queue_store {
            QueueStoreBackend::Supabase => {
                if !config.is_configured() {
                    warn!("Supabase queue store selected but Supabase is not fully configured");
                }
                info!("Using Supabase queue store");
                Arc::new(SupabaseQueueStore::new(&config))
            }
            QueueStoreBackend::Memory => {
                info!("Using in-memory queue store");
                Arc::new(InMemoryQueueStore::new())
            }
        };

        let lock: Arc<dyn OrganizationLock> = match config.redis_url.as_deref() {
            Some(url) => Arc::new(
                RedisOrganizationLock::connect(url, engine_config.lock_timeout, engine_config.lease_ttl()).await?,
            ),
            None => {
                if config.queue_store == QueueStoreBackend::Supabase {
                    warn!("REDIS_URL not set; queue locking is limited to this process");
                }
                Arc::new(InProcessOrganizationLock::new(engine_config.lock_timeout))
            }
        };

        Ok(Self::new(config, store, lock))
    }

    pub fn new(config: Arc<AppConfig>, store: Arc<dyn QueueStore>, lock: Arc<dyn OrganizationLock>) -> Self {
        let notifications = QueueNotificationService::new();
        let engine_config = QueueEngineConfig::from_app_config(&config);
        let read_model = QueueReadModel::new(store.clone(), engine_config.operation_timeout);
        let engine = QueueEngine::new(store, lock, notifications.clone(), engine_config);

        Self {
            config,
            engine,
            read_model,
            notifications,
        }
    }
}
