//! CI/CD job and run models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A CI/CD job definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Internal id; ignored on write
    #[serde(default)]
    pub id: Uuid,

    /// Integration the job was ingested from
    pub integration_id: String,

    /// Short job name
    pub job_name: String,

    /// Fully qualified job name, unique per integration
    pub job_full_name: String,

    /// Project or folder the job belongs to
    #[serde(default)]
    pub project: Option<String>,

    /// CI/CD instance name
    #[serde(default)]
    pub instance: Option<String>,

    /// Repository URL the job builds
    #[serde(default)]
    pub scm_url: Option<String>,
}

/// What caused a run, possibly through a chain of upstream runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTrigger {
    /// Upstream job name, user or SCM id
    pub id: String,

    /// Trigger type, e.g. `UpstreamCause` or `SCMTriggerCause`
    #[serde(rename = "type")]
    pub trigger_type: String,

    /// Upstream build number
    #[serde(default)]
    pub build_number: Option<String>,

    /// Triggers of the upstream run
    #[serde(default)]
    pub direct_parents: Vec<JobTrigger>,
}

impl JobTrigger {
    /// Trigger without parents
    pub fn new(id: impl Into<String>, trigger_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            trigger_type: trigger_type.into(),
            build_number: None,
            direct_parents: Vec::new(),
        }
    }

    /// Add an upstream trigger
    #[must_use]
    pub fn with_parent(mut self, parent: JobTrigger) -> Self {
        self.direct_parents.push(parent);
        self
    }

    /// True when this trigger or any ancestor has the given id
    pub fn reaches(&self, id: &str) -> bool {
        self.id == id || self.direct_parents.iter().any(|p| p.reaches(id))
    }
}

/// One execution of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    /// Internal id; ignored on write
    #[serde(default)]
    pub id: Uuid,

    /// Job this run belongs to
    pub job_id: Uuid,

    /// Job name, filled on read
    #[serde(default)]
    pub job_name: Option<String>,

    /// Build number, unique per job
    pub run_number: i64,

    /// Final status, e.g. `SUCCESS` or `FAILURE`
    pub status: String,

    /// When the run started
    pub start_time: DateTime<Utc>,

    /// When the run ended
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,

    /// Duration in seconds
    #[serde(default)]
    pub duration_seconds: Option<i64>,

    /// Internal id of the user who started the run; resolved on write
    #[serde(default)]
    pub cicd_user_id: Option<String>,

    /// Login of the user who started the run
    #[serde(default)]
    pub cicd_user: Option<String>,

    /// What caused the run
    #[serde(default)]
    pub triggers: Vec<JobTrigger>,
}
