//! Issues: Jira issues and work items

use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::domains::{duration, seconds_between, seconds_until_now};
use crate::error::Result;
use crate::macros::keyed_enum;
use crate::models::Issue;
use crate::query::{
    Domain, Fallback, FieldContext, FieldSet, FieldSpec, HistorySource, Metric, Snapshot, Sql, Stat,
};
use crate::registry::DynamicKind;

keyed_enum! {
    /// Issue fields
    pub enum IssueField {
        IntegrationId => "integration_id",
        /// Ingestion snapshot, epoch seconds
        IngestedAt => "ingested_at",
        Project => "project",
        IssueType => "issue_type",
        Status => "status",
        StatusCategory => "status_category",
        Priority => "priority",
        Assignee => "assignee",
        Reporter => "reporter",
        Label => "label",
        Component => "component",
        FixVersion => "fix_version",
        Epic => "epic",
        Resolution => "resolution",
        StoryPoints => "story_points",
        Hops => "hops",
        Bounces => "bounces",
        IssueCreated => "issue_created",
        IssueUpdated => "issue_updated",
        IssueResolved => "issue_resolved",
        /// Status in the issue's history, for stage reports
        Stage => "stage",
    }
}

impl FieldSet for IssueField {
    const TREND: Self = Self::IssueCreated;
    const STAGE: Option<Self> = Some(Self::Stage);
}

keyed_enum! {
    /// Issue calculations
    pub enum IssueCalculation {
        TicketCount => "ticket_count",
        /// Seconds since creation, until resolution when resolved
        Age => "age",
        Hops => "hops",
        Bounces => "bounces",
        /// Seconds from creation to the first comment
        ResponseTime => "response_time",
        /// Seconds from creation to resolution
        ResolutionTime => "resolution_time",
        StoryPoints => "story_points",
        /// Priority rank, lowest first
        Priority => "priority",
        /// Distinct assignees per bucket
        Assignees => "assignees",
        StateTransitionTime => "state_transition_time",
        StageTimesReport => "stage_times_report",
        StageBounceReport => "stage_bounce_report",
    }
}

/// Each issue's most recent ingestion
const LATEST_SNAPSHOT: &str = "t.ingested_at = (SELECT MAX(v.ingested_at) FROM issues v \
    WHERE v.tenant_id = t.tenant_id AND v.integration_id = t.integration_id AND v.issue_key = t.issue_key)";

/// The issues domain
pub struct Issues;

impl Domain for Issues {
    type Field = IssueField;
    type Calculation = IssueCalculation;
    type Record = Issue;

    const NAME: &'static str = "issues";
    const SOURCE: &'static str = "issues t";
    const LIST_COLUMNS: &'static str = "t.id, t.integration_id, t.issue_key, t.ingested_at, t.project, \
        t.summary, t.issue_type, t.status, t.status_category, t.priority, t.priority_order, \
        t.assignee_id, t.assignee, t.reporter_id, t.reporter, t.labels, t.components, \
        t.fix_versions, t.epic, t.resolution, t.story_points, t.hops, t.bounces, \
        t.first_comment_at, t.issue_created_at, t.issue_updated_at, t.issue_resolved_at, \
        t.custom_fields, t.attributes";
    const DEFAULT_CALCULATION: IssueCalculation = IssueCalculation::TicketCount;
    const DEFAULT_LIST_SORT: IssueField = IssueField::IssueCreated;

    fn field(field: IssueField, _ctx: &FieldContext) -> FieldSpec {
        match field {
            IssueField::IntegrationId => FieldSpec::text("t.integration_id"),
            IssueField::IngestedAt => FieldSpec::number("t.ingested_at"),
            IssueField::Project => FieldSpec::text("t.project"),
            IssueField::IssueType => FieldSpec::text("t.issue_type"),
            IssueField::Status => FieldSpec::text("t.status"),
            IssueField::StatusCategory => FieldSpec::text("t.status_category"),
            IssueField::Priority => FieldSpec::text("t.priority").with_fallback(Fallback::Unprioritized),
            IssueField::Assignee => FieldSpec::user("t.assignee_id", "t.assignee"),
            IssueField::Reporter => FieldSpec::user("t.reporter_id", "t.reporter"),
            IssueField::Label => FieldSpec::labels("t.labels"),
            IssueField::Component => FieldSpec::labels("t.components"),
            IssueField::FixVersion => FieldSpec::labels("t.fix_versions"),
            IssueField::Epic => FieldSpec::text("t.epic"),
            IssueField::Resolution => FieldSpec::text("t.resolution"),
            IssueField::StoryPoints => FieldSpec::number("t.story_points"),
            IssueField::Hops => FieldSpec::number("t.hops"),
            IssueField::Bounces => FieldSpec::number("t.bounces"),
            IssueField::IssueCreated => FieldSpec::timestamp("t.issue_created_at"),
            IssueField::IssueUpdated => FieldSpec::timestamp("t.issue_updated_at"),
            IssueField::IssueResolved => FieldSpec::timestamp("t.issue_resolved_at"),
            IssueField::Stage => FieldSpec::history("status"),
        }
    }

    fn metric(calculation: IssueCalculation) -> Metric {
        match calculation {
            IssueCalculation::TicketCount => Metric::Count,
            IssueCalculation::Age => duration(seconds_until_now("t.issue_created_at", "t.issue_resolved_at")),
            IssueCalculation::Hops => duration(Sql::raw("t.hops")),
            IssueCalculation::Bounces => duration(Sql::raw("t.bounces")),
            IssueCalculation::ResponseTime => {
                duration(seconds_until_now("t.issue_created_at", "t.first_comment_at"))
            }
            IssueCalculation::ResolutionTime => {
                duration(seconds_between("t.issue_created_at", "t.issue_resolved_at"))
            }
            IssueCalculation::StoryPoints => Metric::Stats {
                value: Sql::raw("t.story_points"),
                sort: Stat::TotalStoryPoints,
            },
            IssueCalculation::Priority => Metric::Stats {
                value: Sql::raw("t.priority_order"),
                sort: Stat::Min,
            },
            IssueCalculation::Assignees => Metric::Collect(Sql::raw("t.assignee")),
            IssueCalculation::StateTransitionTime => Metric::StateTransition,
            IssueCalculation::StageTimesReport => Metric::StageTimes,
            IssueCalculation::StageBounceReport => Metric::StageBounces,
        }
    }

    fn dynamic_column(kind: DynamicKind) -> Option<&'static str> {
        Some(match kind {
            DynamicKind::CustomField => "t.custom_fields",
            DynamicKind::Attribute => "t.attributes",
        })
    }

    fn history() -> Option<HistorySource> {
        Some(HistorySource {
            table: "issue_status_history",
            record_column: "issue_id",
            stage_column: "status",
            start_column: "start_time",
            end_column: "end_time",
        })
    }

    fn snapshot() -> Option<Snapshot<IssueField>> {
        Some(Snapshot {
            field: IssueField::IngestedAt,
            latest: LATEST_SNAPSHOT,
        })
    }

    fn story_points() -> Option<&'static str> {
        Some("t.story_points")
    }

    fn map_row(row: &PgRow) -> Result<Issue> {
        Ok(Issue {
            id: row.try_get("id")?,
            integration_id: row.try_get("integration_id")?,
            issue_key: row.try_get("issue_key")?,
            ingested_at: row.try_get("ingested_at")?,
            project: row.try_get("project")?,
            summary: row.try_get("summary")?,
            issue_type: row.try_get("issue_type")?,
            status: row.try_get("status")?,
            status_category: row.try_get("status_category")?,
            priority: row.try_get("priority")?,
            priority_order: row.try_get("priority_order")?,
            assignee_id: row.try_get("assignee_id")?,
            assignee: row.try_get("assignee")?,
            reporter_id: row.try_get("reporter_id")?,
            reporter: row.try_get("reporter")?,
            labels: row.try_get("labels")?,
            components: row.try_get("components")?,
            fix_versions: row.try_get("fix_versions")?,
            epic: row.try_get("epic")?,
            resolution: row.try_get("resolution")?,
            story_points: row.try_get("story_points")?,
            hops: row.try_get("hops")?,
            bounces: row.try_get("bounces")?,
            first_comment_at: row.try_get("first_comment_at")?,
            issue_created_at: row.try_get("issue_created_at")?,
            issue_updated_at: row.try_get("issue_updated_at")?,
            issue_resolved_at: row.try_get("issue_resolved_at")?,
            custom_fields: row.try_get("custom_fields")?,
            attributes: row.try_get("attributes")?,
        })
    }
}
