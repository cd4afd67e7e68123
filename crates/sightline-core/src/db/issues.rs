//! Issue storage

use std::sync::Arc;

use sqlx::types::Json;
use tracing::debug;
use uuid::Uuid;

use crate::db::{resolve_login, Database};
use crate::domains::Issues;
use crate::error::{Error, Result};
use crate::models::{Issue, StatusHistoryEntry};
use crate::query::Domain;
use crate::registry::IdentityResolver;

/// Repository for issues and their status history
#[derive(Clone)]
pub struct IssueRepository {
    db: Database,
    identities: Arc<dyn IdentityResolver>,
}

impl IssueRepository {
    /// Create a new issue repository
    pub fn new(db: Database, identities: Arc<dyn IdentityResolver>) -> Self {
        Self { db, identities }
    }

    /// Insert or update an issue snapshot by integration, key and ingestion time
    pub async fn upsert(&self, tenant: &str, issue: &Issue) -> Result<Uuid> {
        if issue.issue_key.trim().is_empty() {
            return Err(Error::validation("issue_key is required"));
        }

        let identities = self.identities.as_ref();
        let assignee_id =
            resolve_login(identities, tenant, &issue.integration_id, issue.assignee.as_deref()).await?;
        let reporter_id =
            resolve_login(identities, tenant, &issue.integration_id, issue.reporter.as_deref()).await?;

        let query = sqlx::query_scalar(
            r#"
            INSERT INTO issues (
                tenant_id, integration_id, issue_key, ingested_at, project, summary,
                issue_type, status, status_category, priority, priority_order,
                assignee_id, assignee, reporter_id, reporter, labels, components,
                fix_versions, epic, resolution, story_points, hops, bounces,
                first_comment_at, issue_created_at, issue_updated_at, issue_resolved_at,
                custom_fields, attributes
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29
            )
            ON CONFLICT (tenant_id, integration_id, issue_key, ingested_at) DO UPDATE SET
                project = EXCLUDED.project,
                summary = EXCLUDED.summary,
                issue_type = EXCLUDED.issue_type,
                status = EXCLUDED.status,
                status_category = EXCLUDED.status_category,
                priority = EXCLUDED.priority,
                priority_order = EXCLUDED.priority_order,
                assignee_id = EXCLUDED.assignee_id,
                assignee = EXCLUDED.assignee,
                reporter_id = EXCLUDED.reporter_id,
                reporter = EXCLUDED.reporter,
                labels = EXCLUDED.labels,
                components = EXCLUDED.components,
                fix_versions = EXCLUDED.fix_versions,
                epic = EXCLUDED.epic,
                resolution = EXCLUDED.resolution,
                story_points = EXCLUDED.story_points,
                hops = EXCLUDED.hops,
                bounces = EXCLUDED.bounces,
                first_comment_at = EXCLUDED.first_comment_at,
                issue_updated_at = EXCLUDED.issue_updated_at,
                issue_resolved_at = EXCLUDED.issue_resolved_at,
                custom_fields = EXCLUDED.custom_fields,
                attributes = EXCLUDED.attributes
            RETURNING id
            "#,
        )
        .bind(tenant)
        .bind(&issue.integration_id)
        .bind(&issue.issue_key)
        .bind(issue.ingested_at)
        .bind(&issue.project)
        .bind(&issue.summary)
        .bind(&issue.issue_type)
        .bind(&issue.status)
        .bind(&issue.status_category)
        .bind(&issue.priority)
        .bind(issue.priority_order)
        .bind(&assignee_id)
        .bind(&issue.assignee)
        .bind(&reporter_id)
        .bind(&issue.reporter)
        .bind(&issue.labels)
        .bind(&issue.components)
        .bind(&issue.fix_versions)
        .bind(&issue.epic)
        .bind(&issue.resolution)
        .bind(issue.story_points)
        .bind(issue.hops)
        .bind(issue.bounces)
        .bind(issue.first_comment_at)
        .bind(issue.issue_created_at)
        .bind(issue.issue_updated_at)
        .bind(issue.issue_resolved_at)
        .bind(Json(json_object(&issue.custom_fields)))
        .bind(Json(json_object(&issue.attributes)))
        .fetch_one(self.db.pool());

        let id: Uuid = self.db.timed("upsert_issue", query).await?;
        debug!(tenant, issue = %issue.issue_key, %id, "Issue stored");
        Ok(id)
    }

    /// Replace the status history of an issue
    pub async fn replace_status_history(
        &self,
        tenant: &str,
        issue_id: Uuid,
        entries: &[StatusHistoryEntry],
    ) -> Result<()> {
        self.db
            .timed("replace_status_history", self.store_history(tenant, issue_id, entries))
            .await?;
        debug!(tenant, %issue_id, entries = entries.len(), "Status history stored");
        Ok(())
    }

    async fn store_history(&self, tenant: &str, issue_id: Uuid, entries: &[StatusHistoryEntry]) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("DELETE FROM issue_status_history WHERE tenant_id = $1 AND issue_id = $2")
            .bind(tenant)
            .bind(issue_id)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO issue_status_history (tenant_id, issue_id, status, start_time, end_time)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(tenant)
            .bind(issue_id)
            .bind(&entry.status)
            .bind(entry.start_time)
            .bind(entry.end_time)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Get an issue by id
    pub async fn get(&self, tenant: &str, id: Uuid) -> Result<Option<Issue>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE t.tenant_id = $1 AND t.id = $2",
            Issues::LIST_COLUMNS,
            Issues::SOURCE
        );
        let query = sqlx::query(&sql).bind(tenant).bind(id).fetch_optional(self.db.pool());

        let row = self.db.timed("get_issue", query).await?;
        row.as_ref().map(Issues::map_row).transpose()
    }
}

/// JSON objects are stored as-is, anything else as `{}`
fn json_object(value: &serde_json::Value) -> serde_json::Value {
    if value.is_object() {
        value.clone()
    } else {
        serde_json::Value::Object(serde_json::Map::new())
    }
}
