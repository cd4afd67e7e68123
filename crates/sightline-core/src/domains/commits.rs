//! SCM commits

use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::classify::{code_change_sql, ChangeUnit};
use crate::error::Result;
use crate::macros::keyed_enum;
use crate::models::Commit;
use crate::query::{Domain, FieldContext, FieldSet, FieldSpec, Metric, Sql, Stat};

const LINES_CHANGED: &str = "(t.additions + t.deletions)";

keyed_enum! {
    /// Commit fields
    pub enum CommitField {
        IntegrationId => "integration_id",
        RepoId => "repo_id",
        Project => "project",
        Author => "author",
        Committer => "committer",
        CodeChange => "code_change",
        CommittedAt => "committed_at",
        LinesChanged => "lines_changed",
        FilesChanged => "files_changed",
    }
}

impl FieldSet for CommitField {
    const TREND: Self = Self::CommittedAt;
}

keyed_enum! {
    /// Commit calculations
    pub enum CommitCalculation {
        Count => "count",
        /// Additions plus deletions
        LinesChanged => "lines_changed",
    }
}

/// The commit domain
pub struct Commits;

impl Domain for Commits {
    type Field = CommitField;
    type Calculation = CommitCalculation;
    type Record = Commit;

    const NAME: &'static str = "commits";
    const SOURCE: &'static str = "scm_commits t";
    const LIST_COLUMNS: &'static str = "t.id, t.integration_id, t.repo_id, t.commit_sha, t.project, t.message, \
        t.author_id, t.author, t.committer_id, t.committer, t.additions, t.deletions, t.files_changed, \
        t.committed_at";
    const DEFAULT_CALCULATION: CommitCalculation = CommitCalculation::Count;
    const DEFAULT_LIST_SORT: CommitField = CommitField::CommittedAt;

    fn field(field: CommitField, ctx: &FieldContext) -> FieldSpec {
        match field {
            CommitField::IntegrationId => FieldSpec::text("t.integration_id"),
            CommitField::RepoId => FieldSpec::text("t.repo_id"),
            CommitField::Project => FieldSpec::text("t.project"),
            CommitField::Author => FieldSpec::user("t.author_id", "t.author"),
            CommitField::Committer => FieldSpec::user("t.committer_id", "t.committer"),
            CommitField::CodeChange => {
                let size = match ctx.code_change_unit {
                    ChangeUnit::Lines => LINES_CHANGED,
                    ChangeUnit::Files => "t.files_changed",
                };
                FieldSpec::derived(code_change_sql(size, ctx.code_change))
            }
            CommitField::CommittedAt => FieldSpec::timestamp("t.committed_at"),
            CommitField::LinesChanged => FieldSpec::number(LINES_CHANGED),
            CommitField::FilesChanged => FieldSpec::number("t.files_changed"),
        }
    }

    fn metric(calculation: CommitCalculation) -> Metric {
        match calculation {
            CommitCalculation::Count => Metric::Count,
            CommitCalculation::LinesChanged => Metric::Stats {
                value: Sql::raw(LINES_CHANGED),
                sort: Stat::Sum,
            },
        }
    }

    fn map_row(row: &PgRow) -> Result<Commit> {
        Ok(Commit {
            id: row.try_get("id")?,
            integration_id: row.try_get("integration_id")?,
            repo_id: row.try_get("repo_id")?,
            commit_sha: row.try_get("commit_sha")?,
            project: row.try_get("project")?,
            message: row.try_get("message")?,
            author_id: row.try_get("author_id")?,
            author: row.try_get("author")?,
            committer_id: row.try_get("committer_id")?,
            committer: row.try_get("committer")?,
            additions: row.try_get("additions")?,
            deletions: row.try_get("deletions")?,
            files_changed: row.try_get("files_changed")?,
            committed_at: row.try_get("committed_at")?,
        })
    }
}
