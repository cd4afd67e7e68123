//! Pull request, review and commit storage

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::db::{resolve_login, Database};
use crate::domains::PullRequests;
use crate::error::{Error, Result};
use crate::models::{Commit, PrReview, PullRequest};
use crate::query::Domain;
use crate::registry::IdentityResolver;

/// Repository for SCM pull requests, reviews and commits
#[derive(Clone)]
pub struct ScmRepository {
    db: Database,
    identities: Arc<dyn IdentityResolver>,
}

impl ScmRepository {
    /// Create a new SCM repository
    pub fn new(db: Database, identities: Arc<dyn IdentityResolver>) -> Self {
        Self { db, identities }
    }

    /// Insert or update a pull request by repository and number.
    ///
    /// Reviewer, approver and commenter columns are owned by
    /// [`ScmRepository::upsert_review`] and left untouched here.
    pub async fn upsert_pull_request(&self, tenant: &str, pr: &PullRequest) -> Result<Uuid> {
        if pr.repo_id.trim().is_empty() {
            return Err(Error::validation("repo_id is required"));
        }

        let identities = self.identities.as_ref();
        let creator_id = resolve_login(identities, tenant, &pr.integration_id, Some(pr.creator.as_str())).await?;
        let mut assignee_ids = Vec::with_capacity(pr.assignees.len());
        let mut assignees = Vec::with_capacity(pr.assignees.len());
        for login in &pr.assignees {
            if let Some(id) = resolve_login(identities, tenant, &pr.integration_id, Some(login.as_str())).await? {
                assignee_ids.push(id);
                assignees.push(login.trim().to_string());
            }
        }

        let query = sqlx::query_scalar(
            r#"
            INSERT INTO scm_pull_requests (
                tenant_id, integration_id, repo_id, number, project, title, state,
                creator_id, creator, assignee_ids, assignees, labels, source_branch,
                target_branch, additions, deletions, files_changed, comment_count,
                pr_created_at, pr_updated_at, pr_merged_at, pr_closed_at, first_author_response_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23
            )
            ON CONFLICT (tenant_id, integration_id, repo_id, number) DO UPDATE SET
                project = EXCLUDED.project,
                title = EXCLUDED.title,
                state = EXCLUDED.state,
                creator_id = EXCLUDED.creator_id,
                creator = EXCLUDED.creator,
                assignee_ids = EXCLUDED.assignee_ids,
                assignees = EXCLUDED.assignees,
                labels = EXCLUDED.labels,
                source_branch = EXCLUDED.source_branch,
                target_branch = EXCLUDED.target_branch,
                additions = EXCLUDED.additions,
                deletions = EXCLUDED.deletions,
                files_changed = EXCLUDED.files_changed,
                comment_count = EXCLUDED.comment_count,
                pr_updated_at = EXCLUDED.pr_updated_at,
                pr_merged_at = EXCLUDED.pr_merged_at,
                pr_closed_at = EXCLUDED.pr_closed_at,
                first_author_response_at = EXCLUDED.first_author_response_at
            RETURNING id
            "#,
        )
        .bind(tenant)
        .bind(&pr.integration_id)
        .bind(&pr.repo_id)
        .bind(pr.number)
        .bind(&pr.project)
        .bind(&pr.title)
        .bind(&pr.state)
        .bind(&creator_id)
        .bind(&pr.creator)
        .bind(&assignee_ids)
        .bind(&assignees)
        .bind(&pr.labels)
        .bind(&pr.source_branch)
        .bind(&pr.target_branch)
        .bind(pr.additions)
        .bind(pr.deletions)
        .bind(pr.files_changed)
        .bind(pr.comment_count)
        .bind(pr.pr_created_at)
        .bind(pr.pr_updated_at)
        .bind(pr.pr_merged_at)
        .bind(pr.pr_closed_at)
        .bind(pr.first_author_response_at)
        .fetch_one(self.db.pool());

        let id: Uuid = self.db.timed("upsert_pull_request", query).await?;
        debug!(tenant, repo = %pr.repo_id, number = pr.number, %id, "Pull request stored");
        Ok(id)
    }

    /// Insert or update a review, then rebuild the pull request's reviewer,
    /// approver and commenter columns from all of its reviews
    pub async fn upsert_review(
        &self,
        tenant: &str,
        integration_id: &str,
        pr_id: Uuid,
        review: &PrReview,
    ) -> Result<Uuid> {
        let reviewer_id = resolve_login(self.identities.as_ref(), tenant, integration_id, Some(review.reviewer.as_str()))
            .await?
            .ok_or_else(|| Error::validation("reviewer is required"))?;

        let id = self
            .db
            .timed("upsert_review", self.store_review(tenant, pr_id, review, &reviewer_id))
            .await?;
        debug!(tenant, %pr_id, review = %review.review_id, %id, "Review stored");
        Ok(id)
    }

    async fn store_review(&self, tenant: &str, pr_id: Uuid, review: &PrReview, reviewer_id: &str) -> Result<Uuid> {
        let mut tx = self.db.pool().begin().await?;

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO scm_pr_reviews (tenant_id, pr_id, review_id, reviewer, reviewer_id, state, reviewed_at)
            SELECT p.tenant_id, p.id, $3, $4, $5, $6, $7
            FROM scm_pull_requests p
            WHERE p.tenant_id = $1 AND p.id = $2
            ON CONFLICT (pr_id, review_id) DO UPDATE SET
                reviewer = EXCLUDED.reviewer,
                reviewer_id = EXCLUDED.reviewer_id,
                state = EXCLUDED.state,
                reviewed_at = EXCLUDED.reviewed_at
            RETURNING id
            "#,
        )
        .bind(tenant)
        .bind(pr_id)
        .bind(&review.review_id)
        .bind(review.reviewer.trim())
        .bind(reviewer_id)
        .bind(&review.state)
        .bind(review.reviewed_at)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::validation(format!("pull request {pr_id} does not exist")))?;

        sqlx::query(
            r#"
            UPDATE scm_pull_requests p SET
                reviewer_ids = COALESCE(r.reviewer_ids, '{}'),
                reviewers = COALESCE(r.reviewers, '{}'),
                approver_ids = COALESCE(r.approver_ids, '{}'),
                approvers = COALESCE(r.approvers, '{}'),
                commenter_ids = ARRAY(
                    SELECT c FROM unnest(COALESCE(r.commenter_ids, '{}')) AS c
                    WHERE c IS DISTINCT FROM p.creator_id
                ),
                first_review_at = r.first_review_at
            FROM (
                SELECT
                    array_agg(u.reviewer_id ORDER BY u.reviewer_id) AS reviewer_ids,
                    array_agg(u.reviewer ORDER BY u.reviewer_id) AS reviewers,
                    array_agg(u.reviewer_id ORDER BY u.reviewer_id) FILTER (WHERE u.approved) AS approver_ids,
                    array_agg(u.reviewer ORDER BY u.reviewer_id) FILTER (WHERE u.approved) AS approvers,
                    array_agg(u.reviewer_id ORDER BY u.reviewer_id) FILTER (WHERE u.commented) AS commenter_ids,
                    MIN(u.first_at) AS first_review_at
                FROM (
                    SELECT
                        reviewer_id,
                        MAX(reviewer) AS reviewer,
                        bool_or(upper(state) = 'APPROVED') AS approved,
                        bool_or(upper(state) <> 'APPROVED') AS commented,
                        MIN(reviewed_at) AS first_at
                    FROM scm_pr_reviews
                    WHERE pr_id = $2
                    GROUP BY reviewer_id
                ) u
            ) r
            WHERE p.tenant_id = $1 AND p.id = $2
            "#,
        )
        .bind(tenant)
        .bind(pr_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Get a pull request by id
    pub async fn get_pull_request(&self, tenant: &str, id: Uuid) -> Result<Option<PullRequest>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE t.tenant_id = $1 AND t.id = $2",
            PullRequests::LIST_COLUMNS,
            PullRequests::SOURCE
        );
        let query = sqlx::query(&sql).bind(tenant).bind(id).fetch_optional(self.db.pool());

        let row = self.db.timed("get_pull_request", query).await?;
        row.as_ref().map(PullRequests::map_row).transpose()
    }

    /// Insert or update a commit by repository and SHA
    pub async fn upsert_commit(&self, tenant: &str, commit: &Commit) -> Result<Uuid> {
        if commit.commit_sha.trim().is_empty() {
            return Err(Error::validation("commit_sha is required"));
        }

        let identities = self.identities.as_ref();
        let author_id = resolve_login(identities, tenant, &commit.integration_id, Some(commit.author.as_str())).await?;
        let committer_id =
            resolve_login(identities, tenant, &commit.integration_id, commit.committer.as_deref()).await?;

        let query = sqlx::query_scalar(
            r#"
            INSERT INTO scm_commits (
                tenant_id, integration_id, repo_id, commit_sha, project, message,
                author_id, author, committer_id, committer, additions, deletions,
                files_changed, committed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (tenant_id, integration_id, repo_id, commit_sha) DO UPDATE SET
                project = EXCLUDED.project,
                message = EXCLUDED.message,
                author_id = EXCLUDED.author_id,
                author = EXCLUDED.author,
                committer_id = EXCLUDED.committer_id,
                committer = EXCLUDED.committer,
                additions = EXCLUDED.additions,
                deletions = EXCLUDED.deletions,
                files_changed = EXCLUDED.files_changed,
                committed_at = EXCLUDED.committed_at
            RETURNING id
            "#,
        )
        .bind(tenant)
        .bind(&commit.integration_id)
        .bind(&commit.repo_id)
        .bind(&commit.commit_sha)
        .bind(&commit.project)
        .bind(&commit.message)
        .bind(&author_id)
        .bind(&commit.author)
        .bind(&committer_id)
        .bind(&commit.committer)
        .bind(commit.additions)
        .bind(commit.deletions)
        .bind(commit.files_changed)
        .bind(commit.committed_at)
        .fetch_one(self.db.pool());

        let id: Uuid = self.db.timed("upsert_commit", query).await?;
        debug!(tenant, sha = %commit.commit_sha, %id, "Commit stored");
        Ok(id)
    }
}
