//! Analytics domains
//!
//! Each module declares one table family for the query engine: its closed
//! field and calculation sets, the SQL behind them, and its list rows.

pub mod cicd;
pub mod commits;
pub mod issues;
pub mod pull_requests;
pub mod scan_findings;

use crate::query::{Metric, Sql, Stat};

pub use cicd::{CicdCalculation, CicdField, JobRuns};
pub use commits::{CommitCalculation, CommitField, Commits};
pub use issues::{IssueCalculation, IssueField, Issues};
pub use pull_requests::{PullRequestCalculation, PullRequestField, PullRequests};
pub use scan_findings::{ScanCalculation, ScanField, ScanFindings};

/// Seconds from `start` to `end`; NULL while `end` is NULL
pub(crate) fn seconds_between(start: &str, end: &str) -> Sql {
    Sql::raw(format!("EXTRACT(EPOCH FROM ({end} - {start}))"))
}

/// Seconds from `start` to `end`, or to now while `end` is NULL
pub(crate) fn seconds_until_now(start: &str, end: &str) -> Sql {
    Sql::raw(format!("EXTRACT(EPOCH FROM (COALESCE({end}, NOW()) - {start}))"))
}

/// Median-sorted statistics over a duration
pub(crate) fn duration(value: Sql) -> Metric {
    Metric::Stats {
        value,
        sort: Stat::Median,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Domain, FieldContext, Keyed};

    fn check_fields<D: Domain>() {
        let ctx = FieldContext::default();
        for field in <D::Field as Keyed>::ALL {
            let spec = D::field(*field, &ctx);
            assert!(!spec.expr.is_empty(), "{} field {field} has no expression", D::NAME);
            assert_eq!(spec.shape.is_user(), spec.display.is_some(), "{} field {field}", D::NAME);
        }
        for calculation in <D::Calculation as Keyed>::ALL {
            let metric = D::metric(*calculation);
            if metric.uses_history() {
                assert!(D::history().is_some(), "{} calculation {calculation}", D::NAME);
            }
        }
    }

    #[test]
    fn test_every_domain_field_resolves() {
        check_fields::<JobRuns>();
        check_fields::<Issues>();
        check_fields::<PullRequests>();
        check_fields::<Commits>();
        check_fields::<ScanFindings>();
    }
}
