//! Scan finding storage

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::db::{resolve_login, Database};
use crate::error::{Error, Result};
use crate::models::ScanFinding;
use crate::registry::IdentityResolver;

/// Repository for SAST scan findings
#[derive(Clone)]
pub struct ScanFindingRepository {
    db: Database,
    identities: Arc<dyn IdentityResolver>,
}

impl ScanFindingRepository {
    /// Create a new scan finding repository
    pub fn new(db: Database, identities: Arc<dyn IdentityResolver>) -> Self {
        Self { db, identities }
    }

    /// Insert or update a finding by scan and finding key
    pub async fn upsert(&self, tenant: &str, finding: &ScanFinding) -> Result<Uuid> {
        if finding.finding_key.trim().is_empty() {
            return Err(Error::validation("finding_key is required"));
        }

        let assignee_id = resolve_login(
            self.identities.as_ref(),
            tenant,
            &finding.integration_id,
            finding.assignee.as_deref(),
        )
        .await?;

        let query = sqlx::query_scalar(
            r#"
            INSERT INTO scan_findings (
                tenant_id, integration_id, scan_id, finding_key, project, severity, status,
                language, rule, file, assignee_id, assignee, false_positive, detected_at, resolved_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (tenant_id, integration_id, scan_id, finding_key) DO UPDATE SET
                project = EXCLUDED.project,
                severity = EXCLUDED.severity,
                status = EXCLUDED.status,
                language = EXCLUDED.language,
                rule = EXCLUDED.rule,
                file = EXCLUDED.file,
                assignee_id = EXCLUDED.assignee_id,
                assignee = EXCLUDED.assignee,
                false_positive = EXCLUDED.false_positive,
                resolved_at = EXCLUDED.resolved_at
            RETURNING id
            "#,
        )
        .bind(tenant)
        .bind(&finding.integration_id)
        .bind(&finding.scan_id)
        .bind(&finding.finding_key)
        .bind(&finding.project)
        .bind(&finding.severity)
        .bind(&finding.status)
        .bind(&finding.language)
        .bind(&finding.rule)
        .bind(&finding.file)
        .bind(&assignee_id)
        .bind(&finding.assignee)
        .bind(finding.false_positive)
        .bind(finding.detected_at)
        .bind(finding.resolved_at)
        .fetch_one(self.db.pool());

        let id: Uuid = self.db.timed("upsert_scan_finding", query).await?;
        debug!(tenant, scan = %finding.scan_id, finding = %finding.finding_key, %id, "Scan finding stored");
        Ok(id)
    }
}
