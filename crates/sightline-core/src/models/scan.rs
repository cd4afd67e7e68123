//! Static analysis scan findings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One finding reported by a SAST scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFinding {
    /// Internal id; ignored on write
    #[serde(default)]
    pub id: Uuid,

    /// Integration the scan was ingested from
    pub integration_id: String,

    /// Scan the finding belongs to
    pub scan_id: String,

    /// Finding key, unique per scan
    pub finding_key: String,

    /// Project scanned
    pub project: String,

    /// Severity, e.g. `HIGH`
    pub severity: String,

    /// Triage status, e.g. `TO_VERIFY`
    pub status: String,

    /// Source language
    #[serde(default)]
    pub language: Option<String>,

    /// Rule or query name
    #[serde(default)]
    pub rule: Option<String>,

    /// File the finding points at
    #[serde(default)]
    pub file: Option<String>,

    /// Internal id of the assignee; resolved on write
    #[serde(default)]
    pub assignee_id: Option<String>,

    /// Assignee login
    #[serde(default)]
    pub assignee: Option<String>,

    /// Marked as a false positive
    #[serde(default)]
    pub false_positive: bool,

    /// First detected
    pub detected_at: DateTime<Utc>,

    /// Resolved
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}
