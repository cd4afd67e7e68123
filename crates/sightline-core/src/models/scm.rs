//! Source control models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::{self, CodeChange, CodeChangeThresholds, CollaborationState, ChangeUnit, ReviewType};

/// A pull request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Internal id; ignored on write
    #[serde(default)]
    pub id: Uuid,

    /// Integration the pull request was ingested from
    pub integration_id: String,

    /// Repository, e.g. `acme/api`
    pub repo_id: String,

    /// Number within the repository
    pub number: i64,

    /// Project the repository belongs to
    #[serde(default)]
    pub project: Option<String>,

    /// Title
    #[serde(default)]
    pub title: Option<String>,

    /// State, e.g. `open`, `merged`, `closed`
    pub state: String,

    /// Internal id of the author; resolved on write
    #[serde(default)]
    pub creator_id: Option<String>,

    /// Author login
    pub creator: String,

    /// Internal ids of the assignees; resolved on write
    #[serde(default)]
    pub assignee_ids: Vec<String>,

    /// Assignee logins
    #[serde(default)]
    pub assignees: Vec<String>,

    /// Internal ids of the reviewers, derived from reviews
    #[serde(default)]
    pub reviewer_ids: Vec<String>,

    /// Reviewer logins, derived from reviews
    #[serde(default)]
    pub reviewers: Vec<String>,

    /// Internal ids of the approvers, derived from reviews
    #[serde(default)]
    pub approver_ids: Vec<String>,

    /// Approver logins, derived from reviews
    #[serde(default)]
    pub approvers: Vec<String>,

    /// Internal ids of everyone other than the author who commented,
    /// derived from reviews
    #[serde(default)]
    pub commenter_ids: Vec<String>,

    /// Labels
    #[serde(default)]
    pub labels: Vec<String>,

    /// Source branch
    #[serde(default)]
    pub source_branch: Option<String>,

    /// Target branch
    #[serde(default)]
    pub target_branch: Option<String>,

    /// Lines added
    #[serde(default)]
    pub additions: i32,

    /// Lines deleted
    #[serde(default)]
    pub deletions: i32,

    /// Files touched
    #[serde(default)]
    pub files_changed: i32,

    /// Review and discussion comments
    #[serde(default)]
    pub comment_count: i32,

    /// Opened
    pub pr_created_at: DateTime<Utc>,

    /// Last updated
    #[serde(default)]
    pub pr_updated_at: Option<DateTime<Utc>>,

    /// Merged
    #[serde(default)]
    pub pr_merged_at: Option<DateTime<Utc>>,

    /// Closed
    #[serde(default)]
    pub pr_closed_at: Option<DateTime<Utc>>,

    /// First review, derived from reviews
    #[serde(default)]
    pub first_review_at: Option<DateTime<Utc>>,

    /// First author reply after the first review
    #[serde(default)]
    pub first_author_response_at: Option<DateTime<Utc>>,
}

impl PullRequest {
    /// Size of the change in `unit`
    pub fn change_size(&self, unit: ChangeUnit) -> f64 {
        match unit {
            ChangeUnit::Lines => f64::from(self.additions + self.deletions),
            ChangeUnit::Files => f64::from(self.files_changed),
        }
    }

    /// Code change bucket
    pub fn code_change(&self, unit: ChangeUnit, thresholds: CodeChangeThresholds) -> CodeChange {
        classify::code_change(Some(self.change_size(unit)), thresholds)
    }

    /// Collaboration state over internal ids
    pub fn collaboration_state(&self) -> CollaborationState {
        classify::collaboration_state(
            self.creator_id.as_deref().unwrap_or(&self.creator),
            &self.assignee_ids,
            &self.approver_ids,
            &self.commenter_ids,
        )
    }

    /// Review type over internal ids
    pub fn review_type(&self) -> ReviewType {
        classify::review_type(self.creator_id.as_deref().unwrap_or(&self.creator), &self.reviewer_ids)
    }
}

/// A review or review comment on a pull request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrReview {
    /// Review id in the integration
    pub review_id: String,

    /// Reviewer login
    pub reviewer: String,

    /// Internal id of the reviewer; resolved on write
    #[serde(default)]
    pub reviewer_id: Option<String>,

    /// Review state, e.g. `APPROVED`, `COMMENTED`, `CHANGES_REQUESTED`
    pub state: String,

    /// When the review was submitted
    pub reviewed_at: DateTime<Utc>,
}

/// A commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Internal id; ignored on write
    #[serde(default)]
    pub id: Uuid,

    /// Integration the commit was ingested from
    pub integration_id: String,

    /// Repository
    pub repo_id: String,

    /// Commit SHA
    pub commit_sha: String,

    /// Project the repository belongs to
    #[serde(default)]
    pub project: Option<String>,

    /// Message
    #[serde(default)]
    pub message: Option<String>,

    /// Internal id of the author; resolved on write
    #[serde(default)]
    pub author_id: Option<String>,

    /// Author login
    pub author: String,

    /// Internal id of the committer; resolved on write
    #[serde(default)]
    pub committer_id: Option<String>,

    /// Committer login
    #[serde(default)]
    pub committer: Option<String>,

    /// Lines added
    #[serde(default)]
    pub additions: i32,

    /// Lines deleted
    #[serde(default)]
    pub deletions: i32,

    /// Files touched
    #[serde(default)]
    pub files_changed: i32,

    /// Committed
    pub committed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pr() -> PullRequest {
        serde_json::from_value(serde_json::json!({
            "integration_id": "1",
            "repo_id": "acme/api",
            "number": 7,
            "state": "merged",
            "creator": "alice",
            "creator_id": "u-alice",
            "approver_ids": ["u-alice"],
            "reviewer_ids": ["u-alice", "u-bob"],
            "additions": 40,
            "deletions": 30,
            "files_changed": 3,
            "pr_created_at": "2021-06-17T00:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn test_derived_labels() {
        let pr = pr();
        assert_eq!(pr.collaboration_state(), CollaborationState::SelfApproved);
        assert_eq!(pr.review_type(), ReviewType::SelfReviewed);
        assert_eq!(pr.code_change(ChangeUnit::Lines, CodeChangeThresholds::default()), CodeChange::Medium);
        assert_eq!(pr.code_change(ChangeUnit::Files, CodeChangeThresholds::default()), CodeChange::Small);
    }
}
