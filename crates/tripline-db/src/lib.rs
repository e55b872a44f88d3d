//! # tripline-db
//!
//! PostgreSQL persistence layer for tripline.
//!
//! This crate provides:
//! - Connection pool sizing from the pipeline's parallelism
//! - Repository implementations for emails, per-email pipeline state and trips
//! - SQL migrations (feature `migrations`)
//! - Test fixtures for dependent crates (feature `test-fixtures`)
//! - [`MemoryStore`], an in-memory implementation with identical claim semantics
//!
//! ## Example
//!
//! ```rust,ignore
//! use tripline_db::{Database, EmailRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/tripline").await?;
//!     db.migrate().await?;
//!     println!("{} emails imported", db.emails.count().await?);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod emails;
pub mod memory;
pub mod pipeline_state;
pub mod pool;
pub mod trips;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod test_fixtures;

// Re-export core types
pub use tripline_core::*;

pub use emails::PgEmailRepository;
pub use memory::MemoryStore;
pub use pipeline_state::PgPipelineStateRepository;
pub use pool::{create_pool, log_pool_usage, PoolConfig};
pub use trips::PgTripRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Imported emails.
    pub emails: Arc<PgEmailRepository>,
    /// Per-email pipeline state.
    pub state: Arc<PgPipelineStateRepository>,
    /// Aggregated trips and fragments.
    pub trips: Arc<PgTripRepository>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            emails: Arc::new(PgEmailRepository::new(pool.clone())),
            state: Arc::new(PgPipelineStateRepository::new(pool.clone())),
            trips: Arc::new(PgTripRepository::new(pool.clone())),
            pool,
        }
    }

    /// Connect with the pool sized by [`PoolConfig::from_env`].
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, &PoolConfig::from_env()).await
    }

    pub async fn connect_with_config(url: &str, config: &PoolConfig) -> Result<Self> {
        let pool = create_pool(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Repository bundle for the pipeline.
    pub fn repositories(&self) -> Repositories {
        Repositories {
            emails: self.emails.clone(),
            state: self.state.clone(),
            trips: self.trips.clone(),
        }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
