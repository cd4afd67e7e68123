//! SAST scan findings

use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::domains::{duration, seconds_until_now};
use crate::error::Result;
use crate::macros::keyed_enum;
use crate::models::ScanFinding;
use crate::query::{Domain, FieldContext, FieldSet, FieldSpec, Metric};

keyed_enum! {
    /// Scan finding fields
    pub enum ScanField {
        IntegrationId => "integration_id",
        Project => "project",
        ScanId => "scan_id",
        Severity => "severity",
        Status => "status",
        Language => "language",
        Rule => "rule",
        File => "file",
        Assignee => "assignee",
        DetectedAt => "detected_at",
        /// `true` or `false`
        FalsePositive => "false_positive",
    }
}

impl FieldSet for ScanField {
    const TREND: Self = Self::DetectedAt;
}

keyed_enum! {
    /// Scan finding calculations
    pub enum ScanCalculation {
        Count => "count",
        /// Seconds since detection, until resolution when resolved
        Age => "age",
    }
}

/// The scan finding domain
pub struct ScanFindings;

impl Domain for ScanFindings {
    type Field = ScanField;
    type Calculation = ScanCalculation;
    type Record = ScanFinding;

    const NAME: &'static str = "scan_findings";
    const SOURCE: &'static str = "scan_findings t";
    const LIST_COLUMNS: &'static str = "t.id, t.integration_id, t.scan_id, t.finding_key, t.project, \
        t.severity, t.status, t.language, t.rule, t.file, t.assignee_id, t.assignee, t.false_positive, \
        t.detected_at, t.resolved_at";
    const DEFAULT_CALCULATION: ScanCalculation = ScanCalculation::Count;
    const DEFAULT_LIST_SORT: ScanField = ScanField::DetectedAt;

    fn field(field: ScanField, _ctx: &FieldContext) -> FieldSpec {
        match field {
            ScanField::IntegrationId => FieldSpec::text("t.integration_id"),
            ScanField::Project => FieldSpec::text("t.project"),
            ScanField::ScanId => FieldSpec::text("t.scan_id"),
            ScanField::Severity => FieldSpec::text("t.severity"),
            ScanField::Status => FieldSpec::text("t.status"),
            ScanField::Language => FieldSpec::text("t.language"),
            ScanField::Rule => FieldSpec::text("t.rule"),
            ScanField::File => FieldSpec::text("t.file"),
            ScanField::Assignee => FieldSpec::user("t.assignee_id", "t.assignee"),
            ScanField::DetectedAt => FieldSpec::timestamp("t.detected_at"),
            ScanField::FalsePositive => FieldSpec::text("t.false_positive::text"),
        }
    }

    fn metric(calculation: ScanCalculation) -> Metric {
        match calculation {
            ScanCalculation::Count => Metric::Count,
            ScanCalculation::Age => duration(seconds_until_now("t.detected_at", "t.resolved_at")),
        }
    }

    fn map_row(row: &PgRow) -> Result<ScanFinding> {
        Ok(ScanFinding {
            id: row.try_get("id")?,
            integration_id: row.try_get("integration_id")?,
            scan_id: row.try_get("scan_id")?,
            finding_key: row.try_get("finding_key")?,
            project: row.try_get("project")?,
            severity: row.try_get("severity")?,
            status: row.try_get("status")?,
            language: row.try_get("language")?,
            rule: row.try_get("rule")?,
            file: row.try_get("file")?,
            assignee_id: row.try_get("assignee_id")?,
            assignee: row.try_get("assignee")?,
            false_positive: row.try_get("false_positive")?,
            detected_at: row.try_get("detected_at")?,
            resolved_at: row.try_get("resolved_at")?,
        })
    }
}
