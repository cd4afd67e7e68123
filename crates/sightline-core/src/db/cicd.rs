//! CI/CD job and run storage

use std::sync::Arc;

use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::db::{resolve_login, Database};
use crate::domains::JobRuns;
use crate::error::{Error, Result};
use crate::models::{Job, JobRun};
use crate::query::Domain;
use crate::registry::IdentityResolver;

/// Repository for jobs, runs and run triggers
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
    identities: Arc<dyn IdentityResolver>,
}

impl JobRepository {
    /// Create a new job repository
    pub fn new(db: Database, identities: Arc<dyn IdentityResolver>) -> Self {
        Self { db, identities }
    }

    /// Insert or update a job by integration and full name
    pub async fn upsert_job(&self, tenant: &str, job: &Job) -> Result<Uuid> {
        if job.job_full_name.trim().is_empty() {
            return Err(Error::validation("job_full_name is required"));
        }

        let query = sqlx::query_scalar(
            r#"
            INSERT INTO cicd_jobs (
                tenant_id, integration_id, job_name, job_full_name, project, instance, scm_url
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tenant_id, integration_id, job_full_name) DO UPDATE SET
                job_name = EXCLUDED.job_name,
                project = EXCLUDED.project,
                instance = EXCLUDED.instance,
                scm_url = EXCLUDED.scm_url,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(tenant)
        .bind(&job.integration_id)
        .bind(&job.job_name)
        .bind(&job.job_full_name)
        .bind(&job.project)
        .bind(&job.instance)
        .bind(&job.scm_url)
        .fetch_one(self.db.pool());

        let id: Uuid = self.db.timed("upsert_job", query).await?;
        debug!(tenant, job = %job.job_full_name, %id, "Job stored");
        Ok(id)
    }

    /// Insert or update a run by job and run number, replacing its triggers
    pub async fn upsert_run(&self, tenant: &str, integration_id: &str, run: &JobRun) -> Result<Uuid> {
        let cicd_user_id =
            resolve_login(self.identities.as_ref(), tenant, integration_id, run.cicd_user.as_deref()).await?;

        let id = self
            .db
            .timed("upsert_run", self.store_run(tenant, run, cicd_user_id))
            .await?;

        debug!(tenant, run_number = run.run_number, %id, triggers = run.triggers.len(), "Job run stored");
        Ok(id)
    }

    async fn store_run(&self, tenant: &str, run: &JobRun, cicd_user_id: Option<String>) -> Result<Uuid> {
        let mut tx = self.db.pool().begin().await?;

        let owned: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM cicd_jobs WHERE tenant_id = $1 AND id = $2)")
                .bind(tenant)
                .bind(run.job_id)
                .fetch_one(&mut *tx)
                .await?;
        if !owned {
            return Err(Error::validation(format!(
                "job {} does not exist for tenant '{tenant}'",
                run.job_id
            )));
        }

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO cicd_job_runs (
                tenant_id, job_id, run_number, status, start_time, end_time,
                duration_seconds, cicd_user_id, cicd_user
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (tenant_id, job_id, run_number) DO UPDATE SET
                status = EXCLUDED.status,
                start_time = EXCLUDED.start_time,
                end_time = EXCLUDED.end_time,
                duration_seconds = EXCLUDED.duration_seconds,
                cicd_user_id = EXCLUDED.cicd_user_id,
                cicd_user = EXCLUDED.cicd_user
            RETURNING id
            "#,
        )
        .bind(tenant)
        .bind(run.job_id)
        .bind(run.run_number)
        .bind(&run.status)
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(run.duration_seconds)
        .bind(&cicd_user_id)
        .bind(&run.cicd_user)
        .fetch_one(&mut *tx)
        .await?;

        replace_triggers(&mut tx, id, run).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Get a run with its triggers
    pub async fn get_run(&self, tenant: &str, id: Uuid) -> Result<Option<JobRun>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE t.tenant_id = $1 AND t.id = $2",
            JobRuns::LIST_COLUMNS,
            JobRuns::SOURCE
        );
        let query = sqlx::query(&sql).bind(tenant).bind(id).fetch_optional(self.db.pool());

        let row = self.db.timed("get_run", query).await?;
        row.as_ref().map(JobRuns::map_row).transpose()
    }
}

async fn replace_triggers(tx: &mut Transaction<'_, Postgres>, run_id: Uuid, run: &JobRun) -> Result<()> {
    sqlx::query("DELETE FROM cicd_job_run_triggers WHERE run_id = $1")
        .bind(run_id)
        .execute(&mut **tx)
        .await?;

    for trigger in &run.triggers {
        sqlx::query(
            r#"
            INSERT INTO cicd_job_run_triggers (
                run_id, trigger_id, trigger_type, build_number, direct_parents
            ) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (run_id, trigger_id, trigger_type) DO UPDATE SET
                build_number = EXCLUDED.build_number,
                direct_parents = EXCLUDED.direct_parents
            "#,
        )
        .bind(run_id)
        .bind(&trigger.id)
        .bind(&trigger.trigger_type)
        .bind(&trigger.build_number)
        .bind(Json(&trigger.direct_parents))
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
