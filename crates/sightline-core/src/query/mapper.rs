//! Aggregation rows to [`AggregationRecord`]s

use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::error::Result;
use crate::models::AggregationRecord;
use crate::query::builder::Layout;
use crate::query::trend;

/// Grouping columns of one aggregation row, before labelling
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketKey {
    /// `key` column
    pub key: Option<String>,
    /// `additional_key` column
    pub additional_key: Option<String>,
    /// `key_num` column
    pub key_num: Option<f64>,
}

/// Apply fallback and interval labels to a bucket's grouping columns
pub fn label(layout: &Layout, bucket: BucketKey) -> (Option<String>, Option<String>) {
    let BucketKey {
        key,
        additional_key,
        key_num,
    } = bucket;

    if layout.shape.is_none() {
        return (None, None);
    }
    if layout.is_user() {
        return match key {
            Some(key) => (Some(key), additional_key),
            None => (None, Some(additional_key.unwrap_or_else(|| layout.fallback.to_string()))),
        };
    }

    let Some(key) = key else {
        return (Some(layout.fallback.to_string()), None);
    };
    match (layout.interval, key_num) {
        #[allow(clippy::cast_possible_truncation)]
        (Some(interval), Some(num)) => (Some(key), trend::label(interval, num as i64)),
        _ => (Some(key), additional_key),
    }
}

/// Map one row of an aggregation statement
pub fn record(row: &PgRow, layout: &Layout) -> Result<AggregationRecord> {
    let bucket = BucketKey {
        key: row.try_get("key")?,
        additional_key: row.try_get("additional_key")?,
        key_num: row.try_get("key_num")?,
    };
    let (key, additional_key) = label(layout, bucket);

    Ok(AggregationRecord {
        key,
        additional_key,
        stage: if layout.staged { row.try_get("stage")? } else { None },
        count: row.try_get("row_count")?,
        total_tickets: row.try_get("total_tickets")?,
        min: row.try_get("min_value")?,
        max: row.try_get("max_value")?,
        mean: row.try_get("mean_value")?,
        median: row.try_get("median_value")?,
        p90: row.try_get("p90_value")?,
        sum: row.try_get("sum_value")?,
        total_story_points: row.try_get("total_story_points")?,
        values: row.try_get("collected_values")?,
        stacks: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Interval;
    use crate::query::{Fallback, Shape};
    use pretty_assertions::assert_eq;

    fn layout(shape: Shape, fallback: Fallback, interval: Option<Interval>) -> Layout {
        Layout {
            shape: Some(shape),
            fallback,
            interval,
            staged: false,
        }
    }

    #[test]
    fn test_empty_group_gets_fallback_key() {
        let layout = layout(Shape::Text, Fallback::Unprioritized, None);
        assert_eq!(
            label(&layout, BucketKey::default()),
            (Some("_UNPRIORITIZED_".to_string()), None)
        );
    }

    #[test]
    fn test_unresolved_user_keeps_key_empty() {
        let layout = layout(Shape::User, Fallback::Unassigned, None);
        assert_eq!(
            label(&layout, BucketKey::default()),
            (None, Some("_UNASSIGNED_".to_string()))
        );

        let bucket = BucketKey {
            key: Some("u-1".into()),
            additional_key: Some("Alice".into()),
            key_num: None,
        };
        assert_eq!(label(&layout, bucket), (Some("u-1".into()), Some("Alice".into())));
    }

    #[test]
    fn test_time_bucket_gets_interval_label() {
        let layout = layout(Shape::Timestamp, Fallback::Unknown, Some(Interval::Month));
        let bucket = BucketKey {
            key: Some("1622505600".into()),
            additional_key: None,
            key_num: Some(1_622_505_600.0),
        };
        assert_eq!(
            label(&layout, bucket),
            (Some("1622505600".into()), Some("6-2021".into()))
        );
    }

    #[test]
    fn test_no_dimension_has_no_keys() {
        let layout = Layout {
            shape: None,
            fallback: Fallback::Unknown,
            interval: None,
            staged: false,
        };
        let bucket = BucketKey {
            key: Some("ignored".into()),
            ..BucketKey::default()
        };
        assert_eq!(label(&layout, bucket), (None, None));
    }
}
