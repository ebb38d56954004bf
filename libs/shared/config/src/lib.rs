use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Persistence backend used by the patient queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStoreBackend {
    Supabase,
    Memory,
}

impl FromStr for QueueStoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "supabase" | "postgres" => Ok(Self::Supabase),
            "memory" | "in_memory" | "in-memory" => Ok(Self::Memory),
            other => Err(format!("unknown queue store backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub supabase_jwt_secret: String,
    pub redis_url: Option<String>,
    pub queue_store: QueueStoreBackend,
    pub queue_minutes_per_position: i32,
    pub queue_lock_timeout_ms: u64,
    pub queue_operation_timeout_ms: u64,
    pub server_port: u16,
}

pub const DEFAULT_MINUTES_PER_POSITION: i32 = 15;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SERVER_PORT: u16 = 3000;

impl AppConfig {
    pub fn from_env() -> Self {
        let supabase_url = env::var("SUPABASE_URL").unwrap_or_else(|_| {
            warn!("SUPABASE_URL not set, using empty value");
            String::new()
        });
        let supabase_anon_key = env::var("SUPABASE_ANON_PUBLIC_KEY").unwrap_or_else(|_| {
            warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
            String::new()
        });
        let supabase_service_role_key = env::var("SUPABASE_SERVICE_ROLE_KEY").unwrap_or_else(|_| {
            warn!("SUPABASE_SERVICE_ROLE_KEY not set, falling back to anon key");
            supabase_anon_key.clone()
        });
        let supabase_jwt_secret = env::var("SUPABASE_JWT_SECRET").unwrap_or_else(|_| {
            warn!("SUPABASE_JWT_SECRET not set, using empty value");
            String::new()
        });
        let redis_url = env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty());

        let supabase_ready = !supabase_url.is_empty() && !supabase_service_role_key.is_empty();
        let queue_store = resolve_queue_store(env::var("QUEUE_STORE").ok().as_deref(), supabase_ready);

        let config = Self {
            supabase_url,
            supabase_anon_key,
            supabase_service_role_key,
            supabase_jwt_secret,
            redis_url,
            queue_store,
            queue_minutes_per_position: parse_env(
                "QUEUE_MINUTES_PER_POSITION",
                DEFAULT_MINUTES_PER_POSITION,
            ),
            queue_lock_timeout_ms: parse_env("QUEUE_LOCK_TIMEOUT_MS", DEFAULT_LOCK_TIMEOUT_MS),
            queue_operation_timeout_ms: parse_env(
                "QUEUE_OPERATION_TIMEOUT_MS",
                DEFAULT_OPERATION_TIMEOUT_MS,
            ),
            server_port: parse_env("PORT", DEFAULT_SERVER_PORT),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_distributed_locking_configured(&self) -> bool {
        self.redis_url.is_some()
    }

    pub fn queue_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_lock_timeout_ms)
    }

    pub fn queue_operation_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_operation_timeout_ms)
    }
}

/// Explicit `QUEUE_STORE` wins; otherwise, or when it is unrecognized,
/// Supabase is used whenever it is configured.
fn resolve_queue_store(raw: Option<&str>, supabase_ready: bool) -> QueueStoreBackend {
    let fallback = if supabase_ready {
        QueueStoreBackend::Supabase
    } else {
        QueueStoreBackend::Memory
    };

    match raw {
        Some(raw) => raw.parse().unwrap_or_else(|e: String| {
            warn!("{}, using {:?} queue store", e, fallback);
            fallback
        }),
        None => {
            if !supabase_ready {
                warn!("QUEUE_STORE not set and Supabase not configured, using in-memory queue store");
            }
            fallback
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
