//! Derived categorical labels
//!
//! Each classifier exists twice: as a pure function over a record, and as
//! a SQL `CASE` expression used when the label is a grouping or filtering
//! dimension. Both follow the same decision table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::macros::keyed_enum;
use crate::query::sql::Sql;

/// Default upper bound of the `small` code change bucket
pub const DEFAULT_SMALL_CHANGE: f64 = 50.0;
/// Default upper bound of the `medium` code change bucket
pub const DEFAULT_MEDIUM_CHANGE: f64 = 150.0;
/// Default upper bound of the `shallow` comment density bucket
pub const DEFAULT_SHALLOW_DENSITY: f64 = 50.0;
/// Default upper bound of the `good` comment density bucket
pub const DEFAULT_GOOD_DENSITY: f64 = 150.0;

keyed_enum! {
    /// Size of a code change
    pub enum CodeChange {
        Small => "small",
        Medium => "medium",
        Large => "large",
    }
}

keyed_enum! {
    /// Unit a code change is measured in
    pub enum ChangeUnit {
        /// Additions plus deletions
        Lines => "lines",
        /// Files touched
        Files => "files",
    }
}

keyed_enum! {
    /// How much discussion a pull request had
    pub enum CommentDensity {
        Shallow => "shallow",
        Good => "good",
        Heavy => "heavy",
    }
}

keyed_enum! {
    /// Who approved a pull request relative to its author and assignees
    pub enum CollaborationState {
        /// Nobody approved
        Unapproved => "unapproved",
        /// The author approved and nobody else commented
        SelfApproved => "self-approved",
        /// The author approved after comments from others
        SelfApprovedWithReview => "self-approved-with-review",
        /// An assignee other than the author approved
        AssignedPeerApproved => "assigned-peer-approved",
        /// Someone who was not assigned approved
        UnassignedPeerApproved => "unassigned-peer-approved",
    }
}

keyed_enum! {
    /// Review coverage of a pull request
    pub enum ReviewType {
        NotReviewed => "NOT_REVIEWED",
        SelfReviewed => "SELF_REVIEWED",
        PeerReviewed => "PEER_REVIEWED",
    }
}

impl Default for ChangeUnit {
    fn default() -> Self {
        Self::Lines
    }
}

/// A threshold as it arrives from a request: `"100"` or `100`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    /// Numeric form
    Number(f64),
    /// String form
    Text(String),
}

impl Threshold {
    fn value(&self, name: &str) -> Result<f64> {
        match self {
            Self::Number(n) if n.is_finite() => Ok(*n),
            Self::Text(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or_else(|| Error::configuration(format!("bucket threshold '{name}' is not a number: '{s}'"))),
            Self::Number(n) => Err(Error::configuration(format!(
                "bucket threshold '{name}' is not finite: {n}"
            ))),
        }
    }
}

/// Named thresholds, e.g. `{"small": "100", "medium": "1000"}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketConfig(pub BTreeMap<String, Threshold>);

impl BucketConfig {
    /// Threshold by name, or `default` when not configured
    pub fn threshold(&self, name: &str, default: f64) -> Result<f64> {
        self.0.get(name).map_or(Ok(default), |t| t.value(name))
    }

    /// Set a threshold
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.0.insert(name.to_string(), Threshold::Number(value));
        self
    }
}

/// Resolved code change thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodeChangeThresholds {
    /// Changes up to this size are small
    pub small: f64,
    /// Changes up to this size are medium, larger ones large
    pub medium: f64,
}

impl CodeChangeThresholds {
    /// Read `small`/`medium` from a config, falling back to defaults
    pub fn from_config(config: &BucketConfig) -> Result<Self> {
        Ok(Self {
            small: config.threshold("small", DEFAULT_SMALL_CHANGE)?,
            medium: config.threshold("medium", DEFAULT_MEDIUM_CHANGE)?,
        })
    }
}

impl Default for CodeChangeThresholds {
    fn default() -> Self {
        Self {
            small: DEFAULT_SMALL_CHANGE,
            medium: DEFAULT_MEDIUM_CHANGE,
        }
    }
}

/// Resolved comment density thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommentDensityThresholds {
    /// Comment counts up to this are shallow
    pub shallow: f64,
    /// Comment counts up to this are good, higher ones heavy
    pub good: f64,
}

impl CommentDensityThresholds {
    /// Read `shallow`/`good` from a config, falling back to defaults
    pub fn from_config(config: &BucketConfig) -> Result<Self> {
        Ok(Self {
            shallow: config.threshold("shallow", DEFAULT_SHALLOW_DENSITY)?,
            good: config.threshold("good", DEFAULT_GOOD_DENSITY)?,
        })
    }
}

impl Default for CommentDensityThresholds {
    fn default() -> Self {
        Self {
            shallow: DEFAULT_SHALLOW_DENSITY,
            good: DEFAULT_GOOD_DENSITY,
        }
    }
}

/// Bucket a change size. A missing size counts as small.
pub fn code_change(size: Option<f64>, thresholds: CodeChangeThresholds) -> CodeChange {
    match size {
        None => CodeChange::Small,
        Some(n) if n <= thresholds.small => CodeChange::Small,
        Some(n) if n <= thresholds.medium => CodeChange::Medium,
        Some(_) => CodeChange::Large,
    }
}

/// Bucket a comment count
pub fn comment_density(comments: u64, thresholds: CommentDensityThresholds) -> CommentDensity {
    // thresholds are small integers in practice
    #[allow(clippy::cast_precision_loss)]
    let n = comments as f64;
    if n <= thresholds.shallow {
        CommentDensity::Shallow
    } else if n <= thresholds.good {
        CommentDensity::Good
    } else {
        CommentDensity::Heavy
    }
}

/// Classify how a pull request was approved.
///
/// Self-approval wins whenever the creator is among the approvers, no
/// matter who else reviewed.
pub fn collaboration_state<S: AsRef<str>>(
    creator: &str,
    assignees: &[S],
    approvers: &[S],
    commenters: &[S],
) -> CollaborationState {
    let contains = |set: &[S], who: &str| set.iter().any(|s| s.as_ref() == who);

    if approvers.is_empty() {
        return CollaborationState::Unapproved;
    }
    if contains(approvers, creator) {
        if commenters.is_empty() || contains(commenters, creator) {
            return CollaborationState::SelfApproved;
        }
        return CollaborationState::SelfApprovedWithReview;
    }
    if approvers.iter().any(|a| contains(assignees, a.as_ref())) {
        return CollaborationState::AssignedPeerApproved;
    }
    CollaborationState::UnassignedPeerApproved
}

/// Classify review coverage
pub fn review_type<S: AsRef<str>>(creator: &str, reviewers: &[S]) -> ReviewType {
    if reviewers.iter().any(|r| r.as_ref() == creator) {
        ReviewType::SelfReviewed
    } else if reviewers.is_empty() {
        ReviewType::NotReviewed
    } else {
        ReviewType::PeerReviewed
    }
}

fn array_empty(column: &str) -> String {
    format!("COALESCE(cardinality({column}), 0) = 0")
}

/// SQL mirror of [`code_change`] over a numeric size expression
pub fn code_change_sql(size: &str, thresholds: CodeChangeThresholds) -> Sql {
    let mut sql = Sql::raw(format!("CASE WHEN ({size}) IS NULL OR ({size}) <= "));
    sql.push_bind(thresholds.small)
        .push(format!(" THEN '{}' WHEN ({size}) <= ", CodeChange::Small))
        .push_bind(thresholds.medium)
        .push(format!(
            " THEN '{}' ELSE '{}' END",
            CodeChange::Medium,
            CodeChange::Large
        ));
    sql
}

/// SQL mirror of [`comment_density`] over a count expression
pub fn comment_density_sql(count: &str, thresholds: CommentDensityThresholds) -> Sql {
    let mut sql = Sql::raw(format!("CASE WHEN COALESCE({count}, 0) <= "));
    sql.push_bind(thresholds.shallow)
        .push(format!(" THEN '{}' WHEN COALESCE({count}, 0) <= ", CommentDensity::Shallow))
        .push_bind(thresholds.good)
        .push(format!(
            " THEN '{}' ELSE '{}' END",
            CommentDensity::Good,
            CommentDensity::Heavy
        ));
    sql
}

/// SQL mirror of [`collaboration_state`] over text and text array columns
pub fn collaboration_state_sql(creator: &str, assignees: &str, approvers: &str, commenters: &str) -> Sql {
    Sql::raw(format!(
        "CASE \
         WHEN {no_approvers} THEN '{unapproved}' \
         WHEN {creator} = ANY({approvers}) AND ({no_commenters} OR {creator} = ANY({commenters})) THEN '{self_approved}' \
         WHEN {creator} = ANY({approvers}) THEN '{self_with_review}' \
         WHEN {approvers} && {assignees} THEN '{assigned}' \
         ELSE '{unassigned}' END",
        no_approvers = array_empty(approvers),
        no_commenters = array_empty(commenters),
        unapproved = CollaborationState::Unapproved,
        self_approved = CollaborationState::SelfApproved,
        self_with_review = CollaborationState::SelfApprovedWithReview,
        assigned = CollaborationState::AssignedPeerApproved,
        unassigned = CollaborationState::UnassignedPeerApproved,
    ))
}

/// SQL mirror of [`review_type`]
pub fn review_type_sql(creator: &str, reviewers: &str) -> Sql {
    Sql::raw(format!(
        "CASE WHEN {creator} = ANY({reviewers}) THEN '{}' WHEN {} THEN '{}' ELSE '{}' END",
        ReviewType::SelfReviewed,
        array_empty(reviewers),
        ReviewType::NotReviewed,
        ReviewType::PeerReviewed,
    ))
}
