//! Shared fixtures for integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing_subscriber::EnvFilter;

use policy_graph::resolver::{CollectorJob, ReportingJob, ResolvedPolicy, SupportedPredicateSet};
use policy_graph::{BundleMap, ResolveError, ResolveRequest, Resolver};

/// Fixed evaluation time for time-bounded groups.
pub const NOW: i64 = 1_700_000_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("policy_graph=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(NOW, 0).unwrap_or_default()
}

pub fn asset(predicates: &[&str]) -> SupportedPredicateSet {
    predicates.iter().copied().collect()
}

pub fn bundle(yaml: &str) -> BundleMap {
    BundleMap::from_yaml(yaml).unwrap_or_else(|e| panic!("fixture does not parse: {e}"))
}

pub fn resolve_policy(
    bundle: &BundleMap,
    mrn: &str,
    predicates: &[&str],
) -> Result<ResolvedPolicy, ResolveError> {
    init_tracing();
    let request = ResolveRequest::for_policy(mrn, asset(predicates)).at(now());
    Resolver::new(bundle).resolve(&request)
}

pub fn resolve_asset(
    bundle: &BundleMap,
    policies: &[&str],
    frameworks: &[&str],
    predicates: &[&str],
) -> Result<ResolvedPolicy, ResolveError> {
    init_tracing();
    let request = ResolveRequest::for_asset(
        "//assets/test",
        policies.iter().map(|s| s.to_string()).collect(),
        frameworks.iter().map(|s| s.to_string()).collect(),
        asset(predicates),
    )
    .at(now());
    Resolver::new(bundle).resolve(&request)
}

/// Looks up a reporting job by QrId, failing the test if it is absent.
pub fn job<'a>(collector: &'a CollectorJob, qr_id: &str) -> &'a ReportingJob {
    collector
        .job_by_qr_id(qr_id)
        .unwrap_or_else(|| panic!("no reporting job for {qr_id}"))
}

/// Impact of `child` on `parent`, if the edge exists.
pub fn edge<'a>(
    parent: &'a ReportingJob,
    child: &ReportingJob,
) -> Option<&'a policy_graph::resolver::Impact> {
    parent.child_jobs.get(&child.uuid)
}

/// Root exists, notify lists are duplicate-free and every edge is recorded on
/// both ends.
pub fn assert_graph_invariants(collector: &CollectorJob) {
    let root = collector.root().expect("root reporting job");
    assert!(root.notify.is_empty(), "root has parents");

    let jobs = &collector.reporting_jobs;
    for job in collector.reporting_jobs.values() {
        let unique: HashSet<_> = job.notify.iter().collect();
        assert_eq!(unique.len(), job.notify.len(), "duplicate notify on {}", job.qr_id);
        if job.uuid != root.uuid {
            assert!(!job.notify.is_empty(), "{} has no parent", job.qr_id);
        }
        for parent in &job.notify {
            let parent = jobs
                .get(parent)
                .unwrap_or_else(|| panic!("{} notifies a missing job", job.qr_id));
            assert!(
                parent.child_jobs.contains_key(&job.uuid),
                "{} -> {} missing in child jobs",
                parent.qr_id,
                job.qr_id
            );
        }
        for child in job.child_jobs.keys() {
            let child = jobs
                .get(child)
                .unwrap_or_else(|| panic!("{} has a missing child", job.qr_id));
            assert!(child.notify.contains(&job.uuid));
        }
    }
}
