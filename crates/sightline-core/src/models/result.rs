//! Aggregation and list results

use serde::{Deserialize, Serialize};

/// One bucket of an aggregation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationRecord {
    /// Group value; the fallback label for the empty group of non-user
    /// dimensions, absent for `across = none` and unresolved users
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Display label: user name, interval label, or user fallback label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_key: Option<String>,

    /// Lifecycle stage for stage reports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Rows in the bucket
    pub count: i64,

    /// Distinct records in the bucket
    pub total_tickets: i64,

    /// Minimum of the calculation value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Maximum of the calculation value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Mean of the calculation value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,

    /// Median of the calculation value (discrete)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,

    /// 90th percentile of the calculation value (interpolated)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p90: Option<f64>,

    /// Sum of the calculation value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,

    /// Story points of the records in the bucket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_story_points: Option<f64>,

    /// Distinct collected values for list-style calculations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,

    /// Nested buckets from the stack dimensions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stacks: Vec<AggregationRecord>,
}

/// Result of an aggregation call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationResponse {
    /// Buckets in sort order
    pub records: Vec<AggregationRecord>,
    /// Number of buckets returned
    pub total_count: i64,
    /// Digest of the filter that produced the response
    pub cache_hash: String,
}

impl AggregationResponse {
    /// Sum of bucket counts
    pub fn bucket_total(&self) -> i64 {
        self.records.iter().map(|r| r.count).sum()
    }
}

/// One page of a list call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Records on this page
    pub records: Vec<T>,
    /// Records matching the filter across all pages
    pub total_count: i64,
    /// Zero-based page number
    pub page: u32,
    /// Page size used
    pub page_size: u32,
}

impl<T> Page<T> {
    /// Map the records, keeping paging information
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            records: self.records.into_iter().map(f).collect(),
            total_count: self.total_count,
            page: self.page,
            page_size: self.page_size,
        }
    }

    /// True when the page holds nothing
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
