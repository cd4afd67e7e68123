//! Database layer for Sightline
//!
//! One PostgreSQL pool per process. Every connection runs with the
//! configured schema as its search path and UTC as its time zone, so time
//! buckets do not depend on server settings.

mod cicd;
mod issues;
mod scan;
mod scm;

pub use cicd::JobRepository;
pub use issues::IssueRepository;
pub use scan::ScanFindingRepository;
pub use scm::ScmRepository;

use std::future::Future;
use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use tracing::{debug, warn};

use crate::config::{Config, DatabaseConfig, QueryConfig};
use crate::error::{Error, Result};
use crate::query::sql::quote_ident;
use crate::registry::{IdentityResolver, UserIdentity};

/// PostgreSQL connection pool with per-call deadlines
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    timeout: Duration,
    slow_query_threshold: Duration,
}

impl Database {
    /// Connect using the database and query settings
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = connect(&config.database).await?;
        Ok(Self::from_pool(pool, &config.query))
    }

    /// Wrap an existing pool.
    ///
    /// The caller owns the session settings: connections are used as they
    /// come, without the search path and time zone set by [`Database::new`].
    pub fn from_pool(pool: PgPool, query: &QueryConfig) -> Self {
        Self {
            pool,
            timeout: query.timeout,
            slow_query_threshold: query.slow_query_threshold,
        }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        self.timed("health_check", sqlx::query("SELECT 1").execute(&self.pool))
            .await?;
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run a storage call under the configured deadline.
    ///
    /// Calls slower than the slow query threshold are logged; failures are
    /// returned unchanged.
    pub async fn timed<T, E, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        Error: From<E>,
    {
        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| Error::Timeout(self.timeout))?;

        let elapsed = started.elapsed();
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if elapsed >= self.slow_query_threshold {
            warn!(operation, elapsed_ms, "Slow query");
        } else {
            debug!(operation, elapsed_ms, "Query finished");
        }
        Ok(result?)
    }
}

async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let search_path = format!("SET search_path TO {}", quote_ident(&config.schema));

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .after_connect(move |conn, _meta| {
            let search_path = search_path.clone();
            Box::pin(async move {
                conn.execute(search_path.as_str()).await?;
                conn.execute("SET TIME ZONE 'UTC'").await?;
                Ok(())
            })
        })
        .connect(&config.url)
        .await?;

    Ok(pool)
}

/// Internal id for an optional login, creating the identity on first sight
pub(crate) async fn resolve_login(
    resolver: &dyn IdentityResolver,
    tenant: &str,
    integration_id: &str,
    login: Option<&str>,
) -> Result<Option<String>> {
    match login.map(str::trim).filter(|l| !l.is_empty()) {
        Some(login) => {
            let id = resolver
                .resolve(tenant, &UserIdentity::login(integration_id, login))
                .await?;
            Ok(Some(id.to_string()))
        }
        None => Ok(None),
    }
}
