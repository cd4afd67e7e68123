//! CI/CD job runs

use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;

use crate::domains::duration;
use crate::error::Result;
use crate::macros::keyed_enum;
use crate::models::{JobRun, JobTrigger};
use crate::query::{Domain, FieldContext, FieldSet, FieldSpec, Metric, Sql};

keyed_enum! {
    /// Job run fields
    pub enum CicdField {
        IntegrationId => "integration_id",
        JobName => "job_name",
        JobFullName => "job_full_name",
        Project => "project",
        Instance => "instance",
        Status => "status",
        CicdUser => "cicd_user",
        JobEnd => "job_end",
        StartTime => "start_time",
        Duration => "duration",
    }
}

impl FieldSet for CicdField {
    const TREND: Self = Self::StartTime;
}

keyed_enum! {
    /// Job run calculations
    pub enum CicdCalculation {
        Count => "count",
        /// Run duration in seconds
        Duration => "duration",
    }
}

/// The CI/CD job run domain
pub struct JobRuns;

impl Domain for JobRuns {
    type Field = CicdField;
    type Calculation = CicdCalculation;
    type Record = JobRun;

    const NAME: &'static str = "cicd_job_runs";
    const SOURCE: &'static str = "cicd_job_runs t JOIN cicd_jobs j ON j.id = t.job_id AND j.tenant_id = t.tenant_id";
    const LIST_COLUMNS: &'static str = "t.id, t.job_id, j.job_name, t.run_number, t.status, t.start_time, \
        t.end_time, t.duration_seconds, t.cicd_user_id, t.cicd_user, \
        COALESCE((SELECT jsonb_agg(jsonb_build_object('id', tr.trigger_id, 'type', tr.trigger_type, \
        'build_number', tr.build_number, 'direct_parents', tr.direct_parents) \
        ORDER BY tr.trigger_type, tr.trigger_id) \
        FROM cicd_job_run_triggers tr WHERE tr.run_id = t.id), '[]'::jsonb) AS triggers";
    const DEFAULT_CALCULATION: CicdCalculation = CicdCalculation::Count;
    const DEFAULT_LIST_SORT: CicdField = CicdField::StartTime;

    fn field(field: CicdField, _ctx: &FieldContext) -> FieldSpec {
        match field {
            CicdField::IntegrationId => FieldSpec::text("j.integration_id"),
            CicdField::JobName => FieldSpec::text("j.job_name"),
            CicdField::JobFullName => FieldSpec::text("j.job_full_name"),
            CicdField::Project => FieldSpec::text("j.project"),
            CicdField::Instance => FieldSpec::text("j.instance"),
            CicdField::Status => FieldSpec::text("t.status"),
            CicdField::CicdUser => FieldSpec::user("t.cicd_user_id", "t.cicd_user"),
            CicdField::JobEnd => FieldSpec::timestamp("t.end_time"),
            CicdField::StartTime => FieldSpec::timestamp("t.start_time"),
            CicdField::Duration => FieldSpec::number("t.duration_seconds"),
        }
    }

    fn metric(calculation: CicdCalculation) -> Metric {
        match calculation {
            CicdCalculation::Count => Metric::Count,
            CicdCalculation::Duration => duration(Sql::raw("t.duration_seconds")),
        }
    }

    fn map_row(row: &PgRow) -> Result<JobRun> {
        let triggers: Json<Vec<JobTrigger>> = row.try_get("triggers")?;
        Ok(JobRun {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            job_name: row.try_get("job_name")?,
            run_number: row.try_get("run_number")?,
            status: row.try_get("status")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            duration_seconds: row.try_get("duration_seconds")?,
            cicd_user_id: row.try_get("cicd_user_id")?,
            cicd_user: row.try_get("cicd_user")?,
            triggers: triggers.0,
        })
    }
}
