//! Error types for Sightline

use std::time::Duration;

use thiserror::Error;

use crate::registry::DynamicKind;

/// Result type alias using Sightline's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Sightline operations
#[derive(Error, Debug)]
pub enum Error {
    /// The request cannot be turned into a query: unknown dimension,
    /// missing companion key, unsupported filter on a field, bad sort.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A dynamic field key is not registered for the tenant
    #[error("Unknown {kind} '{key}' for tenant {tenant}")]
    UnknownField {
        /// Tenant the lookup ran for
        tenant: String,
        /// Custom field or attribute
        kind: DynamicKind,
        /// Key as given in the filter
        key: String,
    },

    /// Storage error, passed through as-is
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A storage call ran past its deadline
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    /// Settings could not be loaded
    #[error("Settings error: {0}")]
    Config(#[from] config::ConfigError),

    /// Validation error on write paths
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an unknown field error
    pub fn unknown_field(tenant: impl Into<String>, kind: DynamicKind, key: impl Into<String>) -> Self {
        Self::UnknownField {
            tenant: tenant.into(),
            kind,
            key: key.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// True for errors raised before any storage access
    pub fn is_request_error(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::UnknownField { .. })
    }
}
