//! End-to-end aggregation, stack and drilldown tests against PostgreSQL.
//!
//! Skipped unless `SIGHTLINE_TEST_DATABASE_URL` points at a database the
//! tests may migrate. Each test writes under its own tenant.

mod common;

use std::collections::BTreeSet;

use common::{hours, Harness};
use pretty_assertions::assert_eq;
use serde_json::json;
use sightline::db::{IssueRepository, JobRepository, ScmRepository};
use sightline::domains::{
    IssueCalculation, IssueField, Issues, JobRuns, PullRequestField, PullRequests,
};
use sightline::models::{
    Across, Filter, Interval, Issue, Job, JobRun, JobTrigger, PrReview, PullRequest, SortConfig,
    StatusHistoryEntry,
};
use sightline::query::DomainFilter;
use sightline::registry::{DynamicKind, FieldDefinition, FieldRegistry, FieldType, PgFieldRegistry};
use sightline::Error;
use uuid::Uuid;

fn issue(key: &str, priority: Option<&str>, assignee: Option<&str>, project: &str, offset: i64) -> Issue {
    serde_json::from_value(json!({
        "integration_id": "1",
        "issue_key": key,
        "ingested_at": 1_700_000_000,
        "project": project,
        "status": "Open",
        "priority": priority,
        "assignee": assignee,
        "story_points": 3.0,
        "issue_created_at": hours(offset),
    }))
    .unwrap()
}

fn stage(status: &str, start: i64, end: Option<i64>) -> StatusHistoryEntry {
    StatusHistoryEntry {
        status: status.to_string(),
        start_time: hours(start),
        end_time: end.map(hours),
    }
}

async fn seed_issues(h: &Harness) -> Vec<Uuid> {
    let repo = IssueRepository::new(h.db.clone(), h.identities.clone());
    let fixtures = [
        issue("PLAT-1", Some("HIGH"), Some("alice"), "PLAT", 0),
        issue("PLAT-2", Some("HIGH"), Some("bob"), "PLAT", 1),
        issue("PLAT-3", Some("LOW"), None, "PLAT", 2),
        issue("WEB-1", None, Some("alice"), "WEB", 3),
        issue("WEB-2", Some(""), None, "WEB", 4),
        issue("WEB-3", Some("LOW"), Some("carol"), "WEB", 5),
    ];
    let mut ids = Vec::new();
    for fixture in &fixtures {
        ids.push(repo.upsert(&h.tenant, fixture).await.unwrap());
    }
    ids
}

#[tokio::test]
async fn test_job_runs_list_with_triggers() {
    let Some(h) = Harness::connect().await else { return };
    let jobs = JobRepository::new(h.db.clone(), h.identities.clone());

    let job: Job = serde_json::from_value(json!({
        "integration_id": "1",
        "job_name": "TestJob",
        "job_full_name": "folder/TestJob",
    }))
    .unwrap();
    let job_id = jobs.upsert_job(&h.tenant, &job).await.unwrap();

    for i in 0..5_i64 {
        let trigger = if i % 2 == 1 {
            JobTrigger::new("TestJob1", "UpstreamCause")
        } else {
            JobTrigger::new("TestJob2", "UpstreamCause")
                .with_parent(JobTrigger::new("TestJob/Origin1", "UpstreamCause"))
        };
        let run: JobRun = serde_json::from_value(json!({
            "job_id": job_id,
            "run_number": i,
            "status": "SUCCESS",
            "start_time": hours(i),
            "end_time": hours(i + 1),
            "duration_seconds": 3600,
            "cicd_user": "jenkins",
            "triggers": [trigger],
        }))
        .unwrap();
        jobs.upsert_run(&h.tenant, "1", &run).await.unwrap();
    }

    let filter: DomainFilter<JobRuns> = Filter::new(h.tenant.clone()).page(0, 100);
    let page = h.service::<JobRuns>().list(&filter).await.unwrap();

    assert!(page.total_count >= 5);
    for run in &page.records {
        assert!(!run.triggers.is_empty());
        let trigger = run
            .triggers
            .iter()
            .find(|t| t.id == "TestJob1" || t.id == "TestJob2")
            .expect("known trigger");
        if trigger.id == "TestJob2" {
            assert!(trigger.direct_parents.iter().any(|p| p.id == "TestJob/Origin1"));
        }
    }
}

#[tokio::test]
async fn test_collaboration_state_groups() {
    let Some(h) = Harness::connect().await else { return };
    let scm = ScmRepository::new(h.db.clone(), h.identities.clone());

    let review = |id: String, reviewer: &str, state: &str| PrReview {
        review_id: id,
        reviewer: reviewer.to_string(),
        reviewer_id: None,
        state: state.to_string(),
        reviewed_at: hours(2),
    };

    // (assignees, reviews) per collaboration state, two pull requests each
    let matrix: Vec<(Vec<&str>, Vec<(&str, &str)>)> = vec![
        (vec!["bob"], vec![]),
        (vec!["bob"], vec![("alice", "APPROVED")]),
        (vec!["bob"], vec![("alice", "APPROVED"), ("bob", "COMMENTED")]),
        (vec![], vec![("bob", "APPROVED")]),
    ];

    let mut number = 0_i64;
    for (assignees, reviews) in &matrix {
        for _ in 0..2 {
            number += 1;
            let pr: PullRequest = serde_json::from_value(json!({
                "integration_id": "1",
                "repo_id": "acme/api",
                "number": number,
                "state": "open",
                "creator": "alice",
                "assignees": assignees,
                "pr_created_at": hours(number),
            }))
            .unwrap();
            let pr_id = scm.upsert_pull_request(&h.tenant, &pr).await.unwrap();
            for (i, &(reviewer, state)) in reviews.iter().enumerate() {
                scm.upsert_review(&h.tenant, "1", pr_id, &review(format!("{number}-{i}"), reviewer, state))
                    .await
                    .unwrap();
            }
        }
    }

    let filter: DomainFilter<PullRequests> =
        Filter::new(h.tenant.clone()).across(Across::Field(PullRequestField::CollabState));
    let response = h.service::<PullRequests>().aggregate(&filter).await.unwrap();

    let keys: BTreeSet<String> = response.records.iter().filter_map(|r| r.key.clone()).collect();
    let expected: BTreeSet<String> = [
        "unassigned-peer-approved",
        "self-approved",
        "unapproved",
        "self-approved-with-review",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(keys, expected);
    assert!(response.records.iter().all(|r| r.count == 2));
}

#[tokio::test]
async fn test_stage_bounce_report_per_stage() {
    let Some(h) = Harness::connect().await else { return };
    let repo = IssueRepository::new(h.db.clone(), h.identities.clone());

    let fixtures = [
        (
            issue("OPS-1", Some("2"), None, "OPS", 0),
            vec![stage("In Progress", 0, Some(1)), stage("Closed", 1, None)],
        ),
        (
            issue("OPS-2", Some("2"), None, "OPS", 0),
            vec![stage("Open", 0, Some(1)), stage("In Progress", 1, None)],
        ),
        (
            issue("OPS-3", Some("1"), None, "OPS", 0),
            vec![
                stage("Closed", 0, Some(1)),
                stage("In Progress", 1, Some(2)),
                stage("Closed", 2, None),
            ],
        ),
    ];
    for (fixture, history) in &fixtures {
        let id = repo.upsert(&h.tenant, fixture).await.unwrap();
        repo.replace_status_history(&h.tenant, id, history).await.unwrap();
    }

    let filter: DomainFilter<Issues> = Filter::new(h.tenant.clone())
        .across(Across::Field(IssueField::Priority))
        .calculation(IssueCalculation::StageBounceReport)
        .strict(IssueField::Stage, ["Closed", "In Progress"]);
    let response = h.service::<Issues>().aggregate(&filter).await.unwrap();

    let bucket = |key: &str, stage: &str| {
        response
            .records
            .iter()
            .find(|r| r.key.as_deref() == Some(key) && r.stage.as_deref() == Some(stage))
            .unwrap_or_else(|| panic!("missing bucket ({key}, {stage})"))
    };

    let closed = bucket("2", "Closed");
    assert_eq!(closed.median, Some(1.0));
    assert_eq!(closed.mean, Some(1.0));
    assert_eq!(closed.total_tickets, 1);

    let in_progress = bucket("2", "In Progress");
    assert_eq!(in_progress.total_tickets, 2);

    assert_eq!(bucket("1", "Closed").median, Some(2.0));
}

#[tokio::test]
async fn test_stage_bounce_report_requires_stage_filter() {
    let Some(h) = Harness::connect().await else { return };

    let filter: DomainFilter<Issues> = Filter::new(h.tenant.clone())
        .across(Across::Field(IssueField::Priority))
        .calculation(IssueCalculation::StageBounceReport);
    let err = h.service::<Issues>().aggregate(&filter).await.unwrap_err();
    assert!(err.is_request_error());
}

#[tokio::test]
async fn test_drilldown_matches_bucket_counts() {
    let Some(h) = Harness::connect().await else { return };
    seed_issues(&h).await;
    let service = h.service::<Issues>();

    for across in [IssueField::Priority, IssueField::Assignee, IssueField::Project] {
        let filter: DomainFilter<Issues> = Filter::new(h.tenant.clone()).across(Across::Field(across));
        let response = service.aggregate(&filter).await.unwrap();
        let total = service.list(&filter).await.unwrap().total_count;
        assert_eq!(response.bucket_total(), total, "{across}");

        for bucket in &response.records {
            let page = service.drilldown(&filter, bucket).await.unwrap();
            assert_eq!(page.total_count, bucket.count, "{across} {:?}", bucket.key);
        }
    }
}

#[tokio::test]
async fn test_fallback_buckets_collect_missing_values() {
    let Some(h) = Harness::connect().await else { return };
    seed_issues(&h).await;

    let filter: DomainFilter<Issues> =
        Filter::new(h.tenant.clone()).across(Across::Field(IssueField::Priority));
    let response = h.service::<Issues>().aggregate(&filter).await.unwrap();
    let unprioritized = response
        .records
        .iter()
        .find(|r| r.key.as_deref() == Some("_UNPRIORITIZED_"))
        .expect("fallback bucket");
    assert_eq!(unprioritized.count, 2);

    let filter: DomainFilter<Issues> =
        Filter::new(h.tenant.clone()).across(Across::Field(IssueField::Assignee));
    let response = h.service::<Issues>().aggregate(&filter).await.unwrap();
    let unassigned = response
        .records
        .iter()
        .find(|r| r.key.is_none())
        .expect("unassigned bucket");
    assert_eq!(unassigned.additional_key.as_deref(), Some("_UNASSIGNED_"));
    assert_eq!(unassigned.count, 2);
}

#[tokio::test]
async fn test_across_limit_follows_sort() {
    let Some(h) = Harness::connect().await else { return };
    seed_issues(&h).await;
    let service = h.service::<Issues>();

    let filter: DomainFilter<Issues> = Filter::new(h.tenant.clone())
        .across(Across::Field(IssueField::Priority))
        .sort(SortConfig::desc("ticket_count"));
    let unlimited = service.aggregate(&filter).await.unwrap();
    assert_eq!(unlimited.records.len(), 3);

    let limited = service.aggregate(&filter.clone().across_limit(2)).await.unwrap();
    assert_eq!(limited.records.len(), 2);
    assert_eq!(&limited.records[..], &unlimited.records[..2]);

    let zero = service.aggregate(&filter.across_limit(0)).await.unwrap();
    assert_eq!(zero.records, unlimited.records);
}

#[tokio::test]
async fn test_sort_reversal() {
    let Some(h) = Harness::connect().await else { return };
    seed_issues(&h).await;
    let service = h.service::<Issues>();

    let base: DomainFilter<Issues> = Filter::new(h.tenant.clone()).across(Across::Field(IssueField::Project));
    let asc = service
        .aggregate(&base.clone().sort(SortConfig::asc("ticket_count")))
        .await
        .unwrap();
    let desc = service
        .aggregate(&base.sort(SortConfig::desc("ticket_count")))
        .await
        .unwrap();

    // PLAT and WEB tie on count, so the key order decides
    let reversed: Vec<_> = asc.records.iter().rev().map(|r| (r.key.clone(), r.count)).collect();
    let descending: Vec<_> = desc.records.iter().map(|r| (r.key.clone(), r.count)).collect();
    assert_eq!(reversed, descending);
    assert_eq!(descending[0].0.as_deref(), Some("WEB"));
}

#[tokio::test]
async fn test_blank_strict_values_match_everything() {
    let Some(h) = Harness::connect().await else { return };
    seed_issues(&h).await;
    let service = h.service::<Issues>();

    let all: DomainFilter<Issues> = Filter::new(h.tenant.clone());
    let blank = all.clone().strict(IssueField::Assignee, [""]);

    let expected = service.list(&all).await.unwrap().total_count;
    assert_eq!(expected, 6);
    assert_eq!(service.list(&blank).await.unwrap().total_count, expected);
}

#[tokio::test]
async fn test_unknown_integration_is_empty() {
    let Some(h) = Harness::connect().await else { return };
    seed_issues(&h).await;

    let filter: DomainFilter<Issues> = Filter::new(h.tenant.clone())
        .across(Across::Field(IssueField::Project))
        .strict(IssueField::IntegrationId, ["unknown"]);
    let response = h.service::<Issues>().aggregate(&filter).await.unwrap();
    assert!(response.records.is_empty());
    assert_eq!(response.total_count, 0);
}

#[tokio::test]
async fn test_stacks_partition_their_bucket() {
    let Some(h) = Harness::connect().await else { return };
    seed_issues(&h).await;
    let service = h.service::<Issues>();

    let filter: DomainFilter<Issues> = Filter::new(h.tenant.clone())
        .across(Across::Field(IssueField::Project))
        .stack(Across::Field(IssueField::Priority));
    let response = service.aggregate(&filter).await.unwrap();
    assert_eq!(response.records.len(), 2);

    for bucket in &response.records {
        let stacked: i64 = bucket.stacks.iter().map(|s| s.count).sum();
        assert_eq!(stacked, bucket.count, "{:?}", bucket.key);

        for stack in &bucket.stacks {
            let page = service.drilldown_stack(&filter, bucket, stack).await.unwrap();
            assert_eq!(page.total_count, stack.count, "{:?} / {:?}", bucket.key, stack.key);
        }
    }
}

#[tokio::test]
async fn test_tenants_do_not_see_each_other() {
    let Some(h) = Harness::connect().await else { return };
    seed_issues(&h).await;

    let other: DomainFilter<Issues> = Filter::new(format!("{}-other", h.tenant));
    let page = h.service::<Issues>().list(&other).await.unwrap();
    assert_eq!(page.total_count, 0);
}

#[tokio::test]
async fn test_trend_buckets_and_labels() {
    let Some(h) = Harness::connect().await else { return };
    let repo = IssueRepository::new(h.db.clone(), h.identities.clone());
    // 2024-03-04 and 2024-03-05 fall in ISO week 10, 2024-04-15 in week 16
    for fixture in [
        issue("PLAT-1", None, None, "PLAT", 0),
        issue("PLAT-2", None, None, "PLAT", 30),
        issue("PLAT-3", None, None, "PLAT", 42 * 24),
    ] {
        repo.upsert(&h.tenant, &fixture).await.unwrap();
    }
    let service = h.service::<Issues>();

    let expected = [
        (Interval::Week, [("1709510400", "10-2024", 2), ("1713139200", "16-2024", 1)]),
        (Interval::Quarter, [("1704067200", "Q1-2024", 2), ("1711929600", "Q2-2024", 1)]),
    ];
    for (interval, buckets) in expected {
        let filter: DomainFilter<Issues> = Filter::new(h.tenant.clone()).across(Across::Trend).interval(interval);
        let response = service.aggregate(&filter).await.unwrap();
        let got: Vec<_> = response
            .records
            .iter()
            .map(|r| (r.key.clone().unwrap(), r.additional_key.clone().unwrap(), r.count))
            .collect();
        let want: Vec<_> = buckets
            .iter()
            .map(|(k, l, c)| (k.to_string(), l.to_string(), *c))
            .collect();
        assert_eq!(got, want, "{interval:?}");

        for bucket in &response.records {
            let page = service.drilldown(&filter, bucket).await.unwrap();
            assert_eq!(page.total_count, bucket.count, "{interval:?} {:?}", bucket.key);
        }
    }
}

#[tokio::test]
async fn test_custom_field_across_and_filter() {
    let Some(h) = Harness::connect().await else { return };
    let registry = PgFieldRegistry::new(h.db.pool().clone());
    registry
        .register(
            &h.tenant,
            FieldDefinition {
                kind: DynamicKind::CustomField,
                key: "customfield_10020".to_string(),
                name: "Sprint".to_string(),
                field_type: FieldType::String,
            },
        )
        .await
        .unwrap();

    let repo = IssueRepository::new(h.db.clone(), h.identities.clone());
    let sprints = [("PLAT-1", Some("Sprint 1")), ("PLAT-2", Some("Sprint 1")), ("PLAT-3", Some("Sprint 2")), ("PLAT-4", None)];
    for (n, (key, sprint)) in sprints.into_iter().enumerate() {
        let mut fixture = issue(key, None, None, "PLAT", n as i64);
        if let Some(sprint) = sprint {
            fixture.custom_fields = json!({ "customfield_10020": sprint });
        }
        repo.upsert(&h.tenant, &fixture).await.unwrap();
    }
    let service = h.service::<Issues>();

    let filter: DomainFilter<Issues> = Filter::new(h.tenant.clone()).across_custom_field("customfield_10020");
    let response = service.aggregate(&filter).await.unwrap();
    assert_eq!(response.records.len(), 3);
    let sprint_one = response
        .records
        .iter()
        .find(|r| r.key.as_deref() == Some("Sprint 1"))
        .expect("sprint bucket");
    assert_eq!(sprint_one.count, 2);
    assert_eq!(response.bucket_total(), service.list(&filter).await.unwrap().total_count);

    for bucket in &response.records {
        let page = service.drilldown(&filter, bucket).await.unwrap();
        assert_eq!(page.total_count, bucket.count, "{:?}", bucket.key);
    }

    let narrowed: DomainFilter<Issues> =
        Filter::new(h.tenant.clone()).custom_field("customfield_10020", ["Sprint 2"]);
    let page = service.list(&narrowed).await.unwrap();
    assert_eq!(page.total_count, 1);
    assert_eq!(page.records[0].issue_key, "PLAT-3");

    let unregistered: DomainFilter<Issues> = Filter::new(h.tenant.clone()).across_custom_field("customfield_99999");
    assert!(matches!(
        service.aggregate(&unregistered).await,
        Err(Error::UnknownField { .. })
    ));
}
