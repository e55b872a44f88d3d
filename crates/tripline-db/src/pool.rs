//! Connection pool sizing for pipeline runs.
//!
//! A run keeps up to `PIPELINE_MAX_PARALLEL` emails in flight, each holding
//! one connection for its status write, while the claim query and the
//! aggregation pass need one more each. The pool is sized from that unless
//! `DATABASE_MAX_CONNECTIONS` says otherwise.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_MAX_CONNECTIONS` | `PIPELINE_MAX_PARALLEL` + 2 |
//! | `DATABASE_ACQUIRE_TIMEOUT_SECS` | 30 |
//! | `PIPELINE_MAX_PARALLEL` | 4 |

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use tripline_core::defaults::PIPELINE_MAX_PARALLEL;
use tripline_core::{Error, Result};

/// Connections beyond one per in-flight email: the claim and the pass.
const RESERVED_CONNECTIONS: u32 = 2;

const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Idle connections are closed after this long between slices.
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_parallelism(PIPELINE_MAX_PARALLEL)
    }
}

impl PoolConfig {
    /// Pool large enough for `max_parallel` concurrent status writes.
    pub fn for_parallelism(max_parallel: usize) -> Self {
        let parallel = u32::try_from(max_parallel.max(1)).unwrap_or(u32::MAX);
        Self {
            max_connections: parallel.saturating_add(RESERVED_CONNECTIONS),
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source; unset or unparsable values fall back.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parallel = lookup("PIPELINE_MAX_PARALLEL")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(PIPELINE_MAX_PARALLEL);
        let mut config = Self::for_parallelism(parallel);

        if let Some(n) = lookup("DATABASE_MAX_CONNECTIONS")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|n| *n > 0)
        {
            config.max_connections = n;
        }
        if let Some(secs) = lookup("DATABASE_ACQUIRE_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
        {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        config
    }
}

/// Open a pool for `database_url`.
pub async fn create_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(1)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(IDLE_TIMEOUT)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool ready"
    );
    Ok(pool)
}

/// Log pool occupancy after a command. Warns when every connection is busy,
/// which means status writes were queueing behind each other.
pub fn log_pool_usage(pool: &PgPool, op: &'static str) {
    let size = pool.size();
    let idle = pool.num_idle() as u32;
    debug!(
        subsystem = "db",
        component = "pool",
        op,
        pool_size = size,
        pool_idle = idle,
        "Pool usage"
    );
    if pool_exhausted(size, idle) {
        warn!(
            subsystem = "db",
            component = "pool",
            op,
            pool_size = size,
            "No idle connection left; raise DATABASE_MAX_CONNECTIONS or lower PIPELINE_MAX_PARALLEL"
        );
    }
}

fn pool_exhausted(size: u32, idle: u32) -> bool {
    size > 0 && idle == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_leaves_room_for_claim_and_pass() {
        let config = PoolConfig::from_lookup(lookup(&[]));
        assert_eq!(config, PoolConfig::default());
        assert_eq!(config.max_connections, PIPELINE_MAX_PARALLEL as u32 + 2);
    }

    #[test]
    fn test_pool_follows_pipeline_parallelism() {
        let config = PoolConfig::from_lookup(lookup(&[("PIPELINE_MAX_PARALLEL", "10")]));
        assert_eq!(config.max_connections, 12);
        assert_eq!(PoolConfig::for_parallelism(0).max_connections, 3);
    }

    #[test]
    fn test_explicit_settings_win() {
        let config = PoolConfig::from_lookup(lookup(&[
            ("PIPELINE_MAX_PARALLEL", "10"),
            ("DATABASE_MAX_CONNECTIONS", "5"),
            ("DATABASE_ACQUIRE_TIMEOUT_SECS", "3"),
        ]));
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.acquire_timeout, Duration::from_secs(3));

        let config = PoolConfig::from_lookup(lookup(&[
            ("DATABASE_MAX_CONNECTIONS", "0"),
            ("DATABASE_ACQUIRE_TIMEOUT_SECS", "soon"),
        ]));
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn test_exhaustion_needs_open_connections() {
        assert!(pool_exhausted(6, 0));
        assert!(!pool_exhausted(6, 1));
        assert!(!pool_exhausted(0, 0));
    }
}
