//! Time buckets
//!
//! A bucket key is the epoch second of the bucket start in UTC, or the ISO
//! weekday number for `day_of_week`. Labels are derived from the key.

use chrono::{Datelike, TimeZone, Utc, Weekday};

use crate::models::Interval;
use crate::query::sql::Sql;

/// SQL computing the bucket key of a timestamp expression
pub fn bucket_key(interval: Interval, timestamp: &Sql) -> Sql {
    let mut sql = Sql::new();
    match interval {
        Interval::DayOfWeek => {
            sql.push("EXTRACT(ISODOW FROM (")
                .append(timestamp)
                .push(") AT TIME ZONE 'UTC')::bigint");
        }
        _ => {
            sql.push(format!("EXTRACT(EPOCH FROM date_trunc('{}', (", unit(interval)))
                .append(timestamp)
                .push(") AT TIME ZONE 'UTC'))::bigint");
        }
    }
    sql
}

fn unit(interval: Interval) -> &'static str {
    match interval {
        Interval::Day | Interval::DayOfWeek => "day",
        Interval::Week => "week",
        Interval::Month => "month",
        Interval::Quarter => "quarter",
        Interval::Year => "year",
    }
}

/// Human label of a bucket key
///
/// day `17-6-2021`, week `24-2021` (ISO week and year), month `6-2021`,
/// quarter `Q2-2021`, year `2021`, day of week `Monday`.
pub fn label(interval: Interval, key: i64) -> Option<String> {
    let date = || Utc.timestamp_opt(key, 0).single();
    match interval {
        Interval::DayOfWeek => weekday(key).map(|d| weekday_name(d).to_string()),
        Interval::Day => date().map(|d| format!("{}-{}-{}", d.day(), d.month(), d.year())),
        Interval::Week => date().map(|d| {
            let week = d.iso_week();
            format!("{}-{}", week.week(), week.year())
        }),
        Interval::Month => date().map(|d| format!("{}-{}", d.month(), d.year())),
        Interval::Quarter => date().map(|d| format!("Q{}-{}", (d.month() - 1) / 3 + 1, d.year())),
        Interval::Year => date().map(|d| d.year().to_string()),
    }
}

fn weekday(isodow: i64) -> Option<Weekday> {
    match isodow {
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        7 => Some(Weekday::Sun),
        _ => None,
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    // 2021-06-17T00:00:00Z, a Thursday
    const JUNE_17: i64 = 1_623_888_000;

    #[rstest]
    #[case(Interval::Day, JUNE_17, "17-6-2021")]
    #[case(Interval::Week, JUNE_17 - 3 * 86_400, "24-2021")]
    #[case(Interval::Month, 1_622_505_600, "6-2021")]
    #[case(Interval::Quarter, 1_617_235_200, "Q2-2021")]
    #[case(Interval::Year, 1_609_459_200, "2021")]
    #[case(Interval::DayOfWeek, 4, "Thursday")]
    fn test_labels(#[case] interval: Interval, #[case] key: i64, #[case] expected: &str) {
        assert_eq!(label(interval, key).as_deref(), Some(expected));
    }

    #[test]
    fn test_iso_week_year_differs_from_calendar_year() {
        // 2021-01-01 belongs to ISO week 53 of 2020
        assert_eq!(label(Interval::Week, 1_609_459_200).as_deref(), Some("53-2020"));
    }

    #[test]
    fn test_weekday_out_of_range() {
        assert_eq!(label(Interval::DayOfWeek, 0), None);
    }

    #[test]
    fn test_bucket_key_sql() {
        let ts = Sql::raw("t.start_time");
        assert_eq!(
            bucket_key(Interval::Quarter, &ts).render().0,
            "EXTRACT(EPOCH FROM date_trunc('quarter', (t.start_time) AT TIME ZONE 'UTC'))::bigint"
        );
        assert_eq!(
            bucket_key(Interval::DayOfWeek, &ts).render().0,
            "EXTRACT(ISODOW FROM (t.start_time) AT TIME ZONE 'UTC')::bigint"
        );
    }
}
