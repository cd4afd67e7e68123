//! Aggregation query engine
//!
//! A [`Domain`] describes one table family: its closed set of fields and
//! calculations, the SQL expression behind each field, and how list rows
//! map to records. The [`compiler`] turns a filter into predicates, the
//! [`builder`] wraps them into aggregation and list statements, and the
//! [`mapper`] turns rows back into [`AggregationRecord`](crate::models::AggregationRecord)s.

pub mod builder;
pub mod compiler;
pub mod mapper;
pub mod sql;
pub mod trend;

use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::PgRow;

use crate::classify::{ChangeUnit, CodeChangeThresholds, CommentDensityThresholds};
use crate::error::{Error, Result};
use crate::macros::keyed_enum;
use crate::models::Classification;
use crate::registry::DynamicKind;

pub use self::sql::{Param, Sql, Statement};

/// A closed enum with a stable wire name per variant
pub trait Keyed:
    Copy
    + Eq
    + Ord
    + Hash
    + Debug
    + Display
    + FromStr<Err = Error>
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Every variant
    const ALL: &'static [Self];

    /// Wire name
    fn as_str(self) -> &'static str;
}

/// The field enum of a domain
pub trait FieldSet: Keyed {
    /// Timestamp field that `across = trend` buckets
    const TREND: Self;

    /// History-scoped field that stage reports group by
    const STAGE: Option<Self> = None;
}

/// How a field's values are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Single text value
    Text,
    /// Text array; grouping unnests it
    TextArray,
    /// Single user: id expression plus display expression
    User,
    /// Parallel arrays of user ids and display names
    UserArray,
    /// Numeric value
    Number,
    /// Timestamp; grouping buckets it by interval
    Timestamp,
}

impl Shape {
    /// True for array shapes
    pub fn is_array(self) -> bool {
        matches!(self, Self::TextArray | Self::UserArray)
    }

    /// True for user shapes
    pub fn is_user(self) -> bool {
        matches!(self, Self::User | Self::UserArray)
    }
}

keyed_enum! {
    /// Label for the empty group of a dimension
    pub enum Fallback {
        Unknown => "_UNKNOWN_",
        Unassigned => "_UNASSIGNED_",
        Unprioritized => "_UNPRIORITIZED_",
    }
}

impl Fallback {
    /// True when `value` is any fallback label
    pub fn is_label(value: &str) -> bool {
        Self::ALL.iter().any(|f| f.as_str() == value)
    }
}

/// Where a field's expression is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Against the record row, alias `t`
    Record,
    /// Against history rows, alias `h`
    History,
}

/// SQL behind one domain field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Value expression; the user id (array) for user shapes
    pub expr: Sql,
    /// Display name expression for user shapes
    pub display: Option<Sql>,
    /// Storage shape
    pub shape: Shape,
    /// Label for the empty group
    pub fallback: Fallback,
    /// Evaluation scope
    pub scope: Scope,
}

impl FieldSpec {
    fn new(expr: Sql, shape: Shape) -> Self {
        Self {
            expr,
            display: None,
            shape,
            fallback: Fallback::Unknown,
            scope: Scope::Record,
        }
    }

    /// Single text column
    pub fn text(expr: &str) -> Self {
        Self::new(Sql::raw(expr), Shape::Text)
    }

    /// Text computed by a parameterized expression
    pub fn derived(expr: Sql) -> Self {
        Self::new(expr, Shape::Text)
    }

    /// Text array column
    pub fn labels(expr: &str) -> Self {
        Self::new(Sql::raw(expr), Shape::TextArray)
    }

    /// Numeric column
    pub fn number(expr: &str) -> Self {
        Self::new(Sql::raw(expr), Shape::Number)
    }

    /// Timestamp column
    pub fn timestamp(expr: &str) -> Self {
        Self::new(Sql::raw(expr), Shape::Timestamp)
    }

    /// User id and display name columns
    pub fn user(id: &str, display: &str) -> Self {
        Self {
            display: Some(Sql::raw(display)),
            fallback: Fallback::Unassigned,
            ..Self::new(Sql::raw(id), Shape::User)
        }
    }

    /// Parallel user id and display name array columns
    pub fn users(ids: &str, displays: &str) -> Self {
        Self {
            display: Some(Sql::raw(displays)),
            fallback: Fallback::Unassigned,
            ..Self::new(Sql::raw(ids), Shape::UserArray)
        }
    }

    /// Text column of the history table
    pub fn history(column: &str) -> Self {
        Self {
            scope: Scope::History,
            ..Self::new(Sql::raw(format!("h.{column}")), Shape::Text)
        }
    }

    /// Replace the fallback label
    #[must_use]
    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = fallback;
        self
    }
}

keyed_enum! {
    /// Per-bucket statistic, usable as a sort key
    pub enum Stat {
        Count => "count",
        TotalTickets => "total_tickets",
        Min => "min",
        Max => "max",
        Mean => "mean",
        Median => "median",
        P90 => "p90",
        Sum => "sum",
        TotalStoryPoints => "total_story_points",
    }
}

impl Stat {
    /// Output column of the aggregation statement
    pub fn column(self) -> &'static str {
        match self {
            Self::Count => "row_count",
            Self::TotalTickets => "total_tickets",
            Self::Min => "min_value",
            Self::Max => "max_value",
            Self::Mean => "mean_value",
            Self::Median => "median_value",
            Self::P90 => "p90_value",
            Self::Sum => "sum_value",
            Self::TotalStoryPoints => "total_story_points",
        }
    }
}

/// What a calculation computes per bucket
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    /// Count records
    Count,
    /// Statistics over a numeric expression (durations in seconds)
    Stats {
        /// Value per record
        value: Sql,
        /// Statistic the calculation sorts by
        sort: Stat,
    },
    /// Distinct values of an expression per bucket
    Collect(Sql),
    /// Time spent per (record, stage)
    StageTimes,
    /// Entries per (record, stage); requires a stage filter
    StageBounces,
    /// Time from first entering one state to last entering another
    StateTransition,
}

impl Metric {
    /// Statistic used when sorting by the calculation
    pub fn sort_stat(&self) -> Stat {
        match self {
            Self::Count | Self::Collect(_) | Self::StageBounces => Stat::TotalTickets,
            Self::Stats { sort, .. } => *sort,
            Self::StageTimes => Stat::Mean,
            Self::StateTransition => Stat::Median,
        }
    }

    /// True when the metric reads the history table
    pub fn uses_history(&self) -> bool {
        matches!(self, Self::StageTimes | Self::StageBounces | Self::StateTransition)
    }

    /// True when results carry a stage
    pub fn is_staged(&self) -> bool {
        matches!(self, Self::StageTimes | Self::StageBounces)
    }
}

/// Ordered lifecycle history of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistorySource {
    /// History table
    pub table: &'static str,
    /// Column referencing the record id
    pub record_column: &'static str,
    /// Stage or status column
    pub stage_column: &'static str,
    /// When the record entered the stage
    pub start_column: &'static str,
    /// When the record left the stage, NULL while current
    pub end_column: &'static str,
}

/// Versioning of records that are re-ingested as whole snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot<F> {
    /// Field holding the snapshot version
    pub field: F,
    /// Predicate over `t` true only for each record's latest version
    pub latest: &'static str,
}

/// Request-scoped inputs to derived field expressions
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FieldContext {
    /// Code change unit
    pub code_change_unit: ChangeUnit,
    /// Code change thresholds
    pub code_change: CodeChangeThresholds,
    /// Comment density thresholds
    pub comment_density: CommentDensityThresholds,
}

impl FieldContext {
    /// Resolve thresholds, failing on malformed values
    pub fn from_classification(classification: &Classification) -> Result<Self> {
        Ok(Self {
            code_change_unit: classification.code_change_unit,
            code_change: CodeChangeThresholds::from_config(&classification.code_change_size_config)?,
            comment_density: CommentDensityThresholds::from_config(
                &classification.comment_density_size_config,
            )?,
        })
    }
}

/// One analytics table family
pub trait Domain: Send + Sync + 'static {
    /// Closed set of fields
    type Field: FieldSet;
    /// Closed set of calculations
    type Calculation: Keyed;
    /// Row-level record returned by list calls
    type Record: Serialize + Send + Unpin + 'static;

    /// Name used in logs
    const NAME: &'static str;
    /// FROM clause; the main table is aliased `t` and has `id` and `tenant_id`
    const SOURCE: &'static str;
    /// Select list for list calls
    const LIST_COLUMNS: &'static str;
    /// Calculation used when a filter names none
    const DEFAULT_CALCULATION: Self::Calculation;
    /// Field list calls sort by (descending) when a filter names none
    const DEFAULT_LIST_SORT: Self::Field;

    /// SQL behind a field
    fn field(field: Self::Field, ctx: &FieldContext) -> FieldSpec;

    /// What a calculation computes
    fn metric(calculation: Self::Calculation) -> Metric;

    /// JSONB column holding dynamic keys of a kind
    fn dynamic_column(_kind: DynamicKind) -> Option<&'static str> {
        None
    }

    /// Lifecycle history, for stage calculations
    fn history() -> Option<HistorySource> {
        None
    }

    /// Snapshot versioning; filters that never name the snapshot field
    /// read only the latest version of each record
    fn snapshot() -> Option<Snapshot<Self::Field>> {
        None
    }

    /// Story points expression, reported per bucket when present
    fn story_points() -> Option<&'static str> {
        None
    }

    /// Map a list row
    fn map_row(row: &PgRow) -> Result<Self::Record>;
}

/// Filter type of a domain
pub type DomainFilter<D> = crate::models::Filter<<D as Domain>::Field, <D as Domain>::Calculation>;
