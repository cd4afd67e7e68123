//! # Sightline
//!
//! Multi-tenant aggregation engine for engineering analytics.
//!
//! Sightline turns a declarative filter over ticketing, source control,
//! CI/CD and security-scan data into parameterised PostgreSQL, runs it
//! and returns grouped statistics, nested stacks or paged records.
//!
//! ## Architecture
//!
//! - **Domains**: closed field and calculation sets per table family
//! - **Query**: filter compilation, aggregation and list builders, row mapping
//! - **Registry**: per-tenant custom fields and user identity resolution
//! - **Storage**: PostgreSQL repositories for ingested records
//! - **Service**: aggregation, stacks and drilldown over a domain
//!
//! ## Quick Start
//!
//! ```bash
//! # Apply migrations
//! sightline migrate
//!
//! # Aggregate issues by status
//! sightline aggregate --domain issues --filter filter.json
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod macros;

pub mod classify;
pub mod config;
pub mod db;
pub mod domains;
pub mod error;
pub mod models;
pub mod query;
pub mod registry;
pub mod service;

pub use config::Config;
pub use error::{Error, Result};
pub use service::AggregationService;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::db::{Database, IssueRepository, JobRepository, ScanFindingRepository, ScmRepository};
    pub use crate::domains::*;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::query::{Domain, DomainFilter};
    pub use crate::registry::{FieldRegistry, IdentityResolver, PgFieldRegistry, PgIdentityResolver};
    pub use crate::service::AggregationService;
}
