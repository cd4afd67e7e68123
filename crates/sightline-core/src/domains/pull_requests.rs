//! SCM pull requests

use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::classify::{
    code_change_sql, collaboration_state_sql, comment_density_sql, review_type_sql, ChangeUnit,
};
use crate::domains::{duration, seconds_between};
use crate::error::Result;
use crate::macros::keyed_enum;
use crate::models::PullRequest;
use crate::query::{Domain, FieldContext, FieldSet, FieldSpec, Metric};

const LINES_CHANGED: &str = "(t.additions + t.deletions)";

keyed_enum! {
    /// Pull request fields
    pub enum PullRequestField {
        IntegrationId => "integration_id",
        RepoId => "repo_id",
        Project => "project",
        State => "state",
        Creator => "creator",
        Assignee => "assignee",
        Reviewer => "reviewer",
        Approver => "approver",
        Label => "label",
        SourceBranch => "source_branch",
        TargetBranch => "target_branch",
        CollabState => "collab_state",
        CodeChange => "code_change",
        CommentDensity => "comment_density",
        ReviewType => "review_type",
        PrCreated => "pr_created",
        PrMerged => "pr_merged",
        PrClosed => "pr_closed",
        LinesChanged => "lines_changed",
        FilesChanged => "files_changed",
    }
}

impl FieldSet for PullRequestField {
    const TREND: Self = Self::PrCreated;
}

keyed_enum! {
    /// Pull request calculations
    pub enum PullRequestCalculation {
        Count => "count",
        /// Seconds from opening to merge
        MergeTime => "merge_time",
        /// Seconds from opening to the first review
        FirstReviewTime => "first_review_time",
        /// Seconds from the first review to the author's reply
        AuthorResponseTime => "author_response_time",
    }
}

/// The pull request domain
pub struct PullRequests;

impl Domain for PullRequests {
    type Field = PullRequestField;
    type Calculation = PullRequestCalculation;
    type Record = PullRequest;

    const NAME: &'static str = "pull_requests";
    const SOURCE: &'static str = "scm_pull_requests t";
    const LIST_COLUMNS: &'static str = "t.id, t.integration_id, t.repo_id, t.number, t.project, t.title, \
        t.state, t.creator_id, t.creator, t.assignee_ids, t.assignees, t.reviewer_ids, t.reviewers, \
        t.approver_ids, t.approvers, t.commenter_ids, t.labels, t.source_branch, t.target_branch, \
        t.additions, t.deletions, t.files_changed, t.comment_count, t.pr_created_at, t.pr_updated_at, \
        t.pr_merged_at, t.pr_closed_at, t.first_review_at, t.first_author_response_at";
    const DEFAULT_CALCULATION: PullRequestCalculation = PullRequestCalculation::Count;
    const DEFAULT_LIST_SORT: PullRequestField = PullRequestField::PrCreated;

    fn field(field: PullRequestField, ctx: &FieldContext) -> FieldSpec {
        match field {
            PullRequestField::IntegrationId => FieldSpec::text("t.integration_id"),
            PullRequestField::RepoId => FieldSpec::text("t.repo_id"),
            PullRequestField::Project => FieldSpec::text("t.project"),
            PullRequestField::State => FieldSpec::text("t.state"),
            PullRequestField::Creator => FieldSpec::user("t.creator_id", "t.creator"),
            PullRequestField::Assignee => FieldSpec::users("t.assignee_ids", "t.assignees"),
            PullRequestField::Reviewer => FieldSpec::users("t.reviewer_ids", "t.reviewers"),
            PullRequestField::Approver => FieldSpec::users("t.approver_ids", "t.approvers"),
            PullRequestField::Label => FieldSpec::labels("t.labels"),
            PullRequestField::SourceBranch => FieldSpec::text("t.source_branch"),
            PullRequestField::TargetBranch => FieldSpec::text("t.target_branch"),
            PullRequestField::CollabState => FieldSpec::derived(collaboration_state_sql(
                "t.creator_id",
                "t.assignee_ids",
                "t.approver_ids",
                "t.commenter_ids",
            )),
            PullRequestField::CodeChange => {
                let size = match ctx.code_change_unit {
                    ChangeUnit::Lines => LINES_CHANGED,
                    ChangeUnit::Files => "t.files_changed",
                };
                FieldSpec::derived(code_change_sql(size, ctx.code_change))
            }
            PullRequestField::CommentDensity => {
                FieldSpec::derived(comment_density_sql("t.comment_count", ctx.comment_density))
            }
            PullRequestField::ReviewType => FieldSpec::derived(review_type_sql("t.creator_id", "t.reviewer_ids")),
            PullRequestField::PrCreated => FieldSpec::timestamp("t.pr_created_at"),
            PullRequestField::PrMerged => FieldSpec::timestamp("t.pr_merged_at"),
            PullRequestField::PrClosed => FieldSpec::timestamp("t.pr_closed_at"),
            PullRequestField::LinesChanged => FieldSpec::number(LINES_CHANGED),
            PullRequestField::FilesChanged => FieldSpec::number("t.files_changed"),
        }
    }

    fn metric(calculation: PullRequestCalculation) -> Metric {
        match calculation {
            PullRequestCalculation::Count => Metric::Count,
            PullRequestCalculation::MergeTime => duration(seconds_between("t.pr_created_at", "t.pr_merged_at")),
            PullRequestCalculation::FirstReviewTime => {
                duration(seconds_between("t.pr_created_at", "t.first_review_at"))
            }
            PullRequestCalculation::AuthorResponseTime => {
                duration(seconds_between("t.first_review_at", "t.first_author_response_at"))
            }
        }
    }

    fn map_row(row: &PgRow) -> Result<PullRequest> {
        Ok(PullRequest {
            id: row.try_get("id")?,
            integration_id: row.try_get("integration_id")?,
            repo_id: row.try_get("repo_id")?,
            number: row.try_get("number")?,
            project: row.try_get("project")?,
            title: row.try_get("title")?,
            state: row.try_get("state")?,
            creator_id: row.try_get("creator_id")?,
            creator: row.try_get("creator")?,
            assignee_ids: row.try_get("assignee_ids")?,
            assignees: row.try_get("assignees")?,
            reviewer_ids: row.try_get("reviewer_ids")?,
            reviewers: row.try_get("reviewers")?,
            approver_ids: row.try_get("approver_ids")?,
            approvers: row.try_get("approvers")?,
            commenter_ids: row.try_get("commenter_ids")?,
            labels: row.try_get("labels")?,
            source_branch: row.try_get("source_branch")?,
            target_branch: row.try_get("target_branch")?,
            additions: row.try_get("additions")?,
            deletions: row.try_get("deletions")?,
            files_changed: row.try_get("files_changed")?,
            comment_count: row.try_get("comment_count")?,
            pr_created_at: row.try_get("pr_created_at")?,
            pr_updated_at: row.try_get("pr_updated_at")?,
            pr_merged_at: row.try_get("pr_merged_at")?,
            pr_closed_at: row.try_get("pr_closed_at")?,
            first_review_at: row.try_get("first_review_at")?,
            first_author_response_at: row.try_get("first_author_response_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{BucketConfig, CodeChangeThresholds};
    use crate::models::Classification;
    use crate::query::{Param, Shape, Statement};

    #[test]
    fn test_code_change_follows_unit_and_thresholds() {
        let classification = Classification {
            code_change_unit: ChangeUnit::Files,
            code_change_size_config: BucketConfig::default().with("small", 2.0).with("medium", 10.0),
            ..Classification::default()
        };
        let ctx = FieldContext::from_classification(&classification).unwrap();
        assert_eq!(
            ctx.code_change,
            CodeChangeThresholds {
                small: 2.0,
                medium: 10.0
            }
        );

        let spec = PullRequests::field(PullRequestField::CodeChange, &ctx);
        let stmt = Statement::from(&spec.expr);
        assert!(stmt.sql.contains("(t.files_changed) <= $1"));
        assert_eq!(stmt.params, vec![Param::Float(2.0), Param::Float(10.0)]);
    }

    #[test]
    fn test_people_fields_are_user_arrays() {
        let ctx = FieldContext::default();
        for field in [PullRequestField::Assignee, PullRequestField::Reviewer, PullRequestField::Approver] {
            assert_eq!(PullRequests::field(field, &ctx).shape, Shape::UserArray);
        }
        assert_eq!(PullRequests::field(PullRequestField::Creator, &ctx).shape, Shape::User);
    }
}
