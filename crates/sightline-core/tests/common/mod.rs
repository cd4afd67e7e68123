//! Shared setup for database-backed tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use sightline::config::{Config, DatabaseConfig, QueryConfig};
use sightline::db::Database;
use sightline::query::Domain;
use sightline::registry::{IdentityResolver, PgFieldRegistry, PgIdentityResolver};
use sightline::AggregationService;
use uuid::Uuid;

/// Database URL for integration tests
pub const DATABASE_URL_ENV: &str = "SIGHTLINE_TEST_DATABASE_URL";

/// Migrated database plus a tenant no other test uses
pub struct Harness {
    pub db: Database,
    pub tenant: String,
    pub identities: Arc<dyn IdentityResolver>,
}

impl Harness {
    /// Connect and migrate, or `None` when no test database is configured
    pub async fn connect() -> Option<Self> {
        let Ok(url) = std::env::var(DATABASE_URL_ENV) else {
            eprintln!("{DATABASE_URL_ENV} is not set; skipping database test");
            return None;
        };

        // same session setup as production: schema search path and UTC
        let config = Config {
            database: DatabaseConfig {
                url,
                max_connections: 4,
                min_connections: 0,
                ..DatabaseConfig::default()
            },
            ..Config::default()
        };
        let db = Database::new(&config).await.expect("connect to test database");
        db.migrate().await.expect("apply migrations");
        let pool = db.pool().clone();

        Some(Self {
            db,
            tenant: format!("test-{}", Uuid::new_v4()),
            identities: Arc::new(PgIdentityResolver::new(pool)),
        })
    }

    /// Aggregation service for a domain
    pub fn service<D: Domain>(&self) -> AggregationService<D> {
        let registry = Arc::new(PgFieldRegistry::new(self.db.pool().clone()));
        AggregationService::new(self.db.clone(), registry, QueryConfig::default())
    }
}

/// Fixed base time so buckets do not depend on when the tests run
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
}

/// `base_time` plus whole hours
pub fn hours(n: i64) -> DateTime<Utc> {
    base_time() + Duration::hours(n)
}
