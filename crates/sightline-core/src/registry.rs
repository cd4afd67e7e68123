//! Tenant field catalog and user identity resolution
//!
//! Dynamic dimensions (`custom_field`, `attribute`) name keys inside JSONB
//! columns. A key is usable only if the tenant registered it; the catalog
//! is loaded once per request, before any SQL is built.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::macros::keyed_enum;

static FIELD_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]{0,127}$").expect("field key pattern is valid")
});

keyed_enum! {
    /// Which JSONB column a dynamic key lives in
    pub enum DynamicKind {
        /// Integration-defined custom field
        CustomField => "custom_field",
        /// Tenant-defined attribute
        Attribute => "attribute",
    }
}

keyed_enum! {
    /// Value type of a registered dynamic field
    pub enum FieldType {
        /// Single string value
        String => "string",
        /// Array of strings
        Array => "array",
        /// Numeric value stored as JSON number or numeric string
        Number => "number",
    }
}

/// A registered dynamic field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Column the key lives in
    pub kind: DynamicKind,
    /// Key inside the JSONB column
    pub key: String,
    /// Display name
    pub name: String,
    /// Value type
    pub field_type: FieldType,
}

/// Snapshot of a tenant's registered dynamic fields
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    tenant: String,
    fields: HashMap<(DynamicKind, String), FieldDefinition>,
}

impl FieldCatalog {
    /// Build a catalog from definitions
    pub fn new(tenant: impl Into<String>, fields: impl IntoIterator<Item = FieldDefinition>) -> Self {
        Self {
            tenant: tenant.into(),
            fields: fields
                .into_iter()
                .map(|f| ((f.kind, f.key.clone()), f))
                .collect(),
        }
    }

    /// Tenant the catalog belongs to
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Look up a key, failing closed when it is not registered
    pub fn resolve(&self, kind: DynamicKind, key: &str) -> Result<&FieldDefinition> {
        if !is_valid_key(key) {
            return Err(Error::unknown_field(&self.tenant, kind, key));
        }
        self.fields
            .get(&(kind, key.to_string()))
            .ok_or_else(|| Error::unknown_field(&self.tenant, kind, key))
    }

    /// Number of registered fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the tenant registered nothing
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Keys are bound as parameters, but an allow-listed shape keeps them out
/// of aliases and logs in any other form.
pub fn is_valid_key(key: &str) -> bool {
    FIELD_KEY.is_match(key)
}

/// Per-tenant registry of dynamic fields
#[async_trait]
pub trait FieldRegistry: Send + Sync {
    /// Load every registered field for a tenant
    async fn catalog(&self, tenant: &str) -> Result<FieldCatalog>;

    /// Register or update a field definition
    async fn register(&self, tenant: &str, field: FieldDefinition) -> Result<()>;
}

/// Registry backed by `custom_field_registry`
#[derive(Clone)]
pub struct PgFieldRegistry {
    pool: PgPool,
}

impl PgFieldRegistry {
    /// Create a registry on a pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FieldRegistry for PgFieldRegistry {
    async fn catalog(&self, tenant: &str) -> Result<FieldCatalog> {
        let rows = sqlx::query(
            r#"
            SELECT kind, field_key, name, field_type
            FROM custom_field_registry
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant)
        .fetch_all(&self.pool)
        .await?;

        let mut fields = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("kind")?;
            let field_type: String = row.try_get("field_type")?;
            fields.push(FieldDefinition {
                kind: kind.parse()?,
                key: row.try_get("field_key")?,
                name: row.try_get("name")?,
                field_type: field_type.parse()?,
            });
        }

        Ok(FieldCatalog::new(tenant, fields))
    }

    async fn register(&self, tenant: &str, field: FieldDefinition) -> Result<()> {
        if !is_valid_key(&field.key) {
            return Err(Error::validation(format!("invalid field key '{}'", field.key)));
        }

        sqlx::query(
            r#"
            INSERT INTO custom_field_registry (tenant_id, kind, field_key, name, field_type)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, kind, field_key) DO UPDATE SET
                name = EXCLUDED.name,
                field_type = EXCLUDED.field_type
            "#,
        )
        .bind(tenant)
        .bind(field.kind.as_str())
        .bind(&field.key)
        .bind(&field.name)
        .bind(field.field_type.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Registry held in memory, used by tests and tools without a database
#[derive(Clone, Default)]
pub struct InMemoryFieldRegistry {
    fields: Arc<RwLock<HashMap<String, Vec<FieldDefinition>>>>,
}

impl InMemoryFieldRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FieldRegistry for InMemoryFieldRegistry {
    async fn catalog(&self, tenant: &str) -> Result<FieldCatalog> {
        let fields = self.fields.read().get(tenant).cloned().unwrap_or_default();
        Ok(FieldCatalog::new(tenant, fields))
    }

    async fn register(&self, tenant: &str, field: FieldDefinition) -> Result<()> {
        if !is_valid_key(&field.key) {
            return Err(Error::validation(format!("invalid field key '{}'", field.key)));
        }
        let mut guard = self.fields.write();
        let entry = guard.entry(tenant.to_string()).or_default();
        entry.retain(|f| !(f.kind == field.kind && f.key == field.key));
        entry.push(field);
        Ok(())
    }
}

/// Raw identity as seen by an integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Integration the identity comes from
    pub integration_id: String,
    /// Login or account id in the integration
    pub cloud_id: String,
    /// Display name or email
    pub display_name: String,
}

impl UserIdentity {
    /// Identity whose login doubles as display name
    pub fn login(integration_id: impl Into<String>, login: impl Into<String>) -> Self {
        let login = login.into();
        Self {
            integration_id: integration_id.into(),
            display_name: login.clone(),
            cloud_id: login,
        }
    }
}

/// Maps raw integration identities to stable internal user ids
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Return the internal id for an identity, creating it on first sight
    async fn resolve(&self, tenant: &str, identity: &UserIdentity) -> Result<Uuid>;
}

/// Resolver backed by `integration_users`
#[derive(Clone)]
pub struct PgIdentityResolver {
    pool: PgPool,
}

impl PgIdentityResolver {
    /// Create a resolver on a pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityResolver for PgIdentityResolver {
    async fn resolve(&self, tenant: &str, identity: &UserIdentity) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO integration_users (tenant_id, integration_id, cloud_id, display_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, integration_id, cloud_id) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(tenant)
        .bind(&identity.integration_id)
        .bind(&identity.cloud_id)
        .bind(&identity.display_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }
}

/// Resolver held in memory
#[derive(Clone, Default)]
pub struct InMemoryIdentityResolver {
    ids: Arc<RwLock<HashMap<(String, String, String), Uuid>>>,
}

impl InMemoryIdentityResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityResolver for InMemoryIdentityResolver {
    async fn resolve(&self, tenant: &str, identity: &UserIdentity) -> Result<Uuid> {
        let key = (
            tenant.to_string(),
            identity.integration_id.clone(),
            identity.cloud_id.clone(),
        );
        Ok(*self.ids.write().entry(key).or_insert_with(Uuid::new_v4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(kind: DynamicKind, key: &str) -> FieldDefinition {
        FieldDefinition {
            kind,
            key: key.to_string(),
            name: key.to_string(),
            field_type: FieldType::String,
        }
    }

    #[test]
    fn test_catalog_resolves_registered_key() {
        let catalog = FieldCatalog::new("acme", [definition(DynamicKind::CustomField, "customfield_10020")]);
        let field = catalog.resolve(DynamicKind::CustomField, "customfield_10020").unwrap();
        assert_eq!(field.field_type, FieldType::String);
    }

    #[test]
    fn test_catalog_kind_is_part_of_key() {
        let catalog = FieldCatalog::new("acme", [definition(DynamicKind::Attribute, "team")]);
        let err = catalog.resolve(DynamicKind::CustomField, "team").unwrap_err();
        assert!(matches!(err, Error::UnknownField { kind: DynamicKind::CustomField, .. }));
    }

    #[test]
    fn test_catalog_rejects_injection_shaped_key() {
        let catalog = FieldCatalog::new("acme", [definition(DynamicKind::CustomField, "a")]);
        for key in ["a'; DROP TABLE issues; --", "", "a b", "\"a\""] {
            assert!(catalog.resolve(DynamicKind::CustomField, key).is_err(), "{key}");
        }
    }

    #[tokio::test]
    async fn test_in_memory_registry_is_per_tenant() {
        let registry = InMemoryFieldRegistry::new();
        registry
            .register("acme", definition(DynamicKind::CustomField, "sprint"))
            .await
            .unwrap();

        assert_eq!(registry.catalog("acme").await.unwrap().len(), 1);
        assert!(registry.catalog("globex").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_resolver_is_stable() {
        let resolver = InMemoryIdentityResolver::new();
        let identity = UserIdentity::login("1", "octocat");
        let first = resolver.resolve("acme", &identity).await.unwrap();
        let second = resolver.resolve("acme", &identity).await.unwrap();
        let other_tenant = resolver.resolve("globex", &identity).await.unwrap();
        assert_eq!(first, second);
        assert_ne!(first, other_tenant);
    }
}
