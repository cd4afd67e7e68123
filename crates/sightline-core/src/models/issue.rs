//! Issue tracker models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A Jira issue or work item snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Internal id; ignored on write
    #[serde(default)]
    pub id: Uuid,

    /// Integration the issue was ingested from
    pub integration_id: String,

    /// Issue key, e.g. `PLAT-123`
    pub issue_key: String,

    /// Ingestion snapshot, epoch seconds
    pub ingested_at: i64,

    /// Project key
    pub project: String,

    /// Summary line
    #[serde(default)]
    pub summary: Option<String>,

    /// Issue type, e.g. `BUG`
    #[serde(default)]
    pub issue_type: Option<String>,

    /// Current status
    #[serde(default)]
    pub status: Option<String>,

    /// Status category, e.g. `Done`
    #[serde(default)]
    pub status_category: Option<String>,

    /// Priority name
    #[serde(default)]
    pub priority: Option<String>,

    /// Rank of the priority, lower is more urgent
    #[serde(default)]
    pub priority_order: Option<i32>,

    /// Internal id of the assignee; resolved on write
    #[serde(default)]
    pub assignee_id: Option<String>,

    /// Assignee login or display name
    #[serde(default)]
    pub assignee: Option<String>,

    /// Internal id of the reporter; resolved on write
    #[serde(default)]
    pub reporter_id: Option<String>,

    /// Reporter login or display name
    #[serde(default)]
    pub reporter: Option<String>,

    /// Labels
    #[serde(default)]
    pub labels: Vec<String>,

    /// Components
    #[serde(default)]
    pub components: Vec<String>,

    /// Fix versions
    #[serde(default)]
    pub fix_versions: Vec<String>,

    /// Epic key
    #[serde(default)]
    pub epic: Option<String>,

    /// Resolution
    #[serde(default)]
    pub resolution: Option<String>,

    /// Story points
    #[serde(default)]
    pub story_points: Option<f64>,

    /// Number of assignee changes
    #[serde(default)]
    pub hops: i32,

    /// Number of times the issue moved back to an earlier status
    #[serde(default)]
    pub bounces: i32,

    /// First comment from someone other than the reporter
    #[serde(default)]
    pub first_comment_at: Option<DateTime<Utc>>,

    /// Created in the issue tracker
    pub issue_created_at: DateTime<Utc>,

    /// Last updated in the issue tracker
    #[serde(default)]
    pub issue_updated_at: Option<DateTime<Utc>>,

    /// Resolved in the issue tracker
    #[serde(default)]
    pub issue_resolved_at: Option<DateTime<Utc>>,

    /// Custom field values by key
    #[serde(default)]
    pub custom_fields: serde_json::Value,

    /// Attribute values by key
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// One stay of an issue in a status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    /// Status entered
    pub status: String,

    /// When the issue entered the status
    pub start_time: DateTime<Utc>,

    /// When the issue left the status, `None` while current
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}
