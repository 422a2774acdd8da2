//! Policy resolver — compiles a bundle into a per-asset execution and
//! reporting plan.
//!
//! Resolution is pure over its inputs: the same bundle can be resolved for many
//! assets concurrently. Each call returns freshly allocated reporting jobs.

mod activation;
mod checksum;
mod compiler;
mod filters;
mod graph;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::bundle::{BundleMap, CompiledCode};
use crate::error::ResolveError;
use crate::executor::{RawData, RunQueueItem};
use crate::types::{CodeId, Mrn, PredicateId, ReportingJobType};

pub use checksum::CHECKSUM_VERSION;
pub use filters::SupportedPredicateSet;
pub use graph::{Impact, NodeIdentity, ReportingJob};

/// QrId of the root node when resolving an asset.
pub const ROOT_QR_ID: &str = "root";

// ─── Request ──────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ResolveTarget {
    /// Resolve one policy directly; it becomes the root.
    Policy(Mrn),
    /// Resolve the policies and frameworks assigned to an asset.
    Asset {
        asset_mrn: Mrn,
        policy_mrns: Vec<Mrn>,
        framework_mrns: Vec<Mrn>,
    },
}

#[derive(Clone, Debug)]
pub struct ResolveRequest {
    pub target: ResolveTarget,
    pub asset_filters: SupportedPredicateSet,
    /// Reference time for group start/end dates.
    pub evaluated_at: DateTime<Utc>,
}

impl ResolveRequest {
    pub fn for_policy(mrn: impl Into<Mrn>, asset_filters: SupportedPredicateSet) -> Self {
        Self {
            target: ResolveTarget::Policy(mrn.into()),
            asset_filters,
            evaluated_at: Utc::now(),
        }
    }

    pub fn for_asset(
        asset_mrn: impl Into<Mrn>,
        policy_mrns: Vec<Mrn>,
        framework_mrns: Vec<Mrn>,
        asset_filters: SupportedPredicateSet,
    ) -> Self {
        Self {
            target: ResolveTarget::Asset {
                asset_mrn: asset_mrn.into(),
                policy_mrns,
                framework_mrns,
            },
            asset_filters,
            evaluated_at: Utc::now(),
        }
    }

    /// Evaluate time-bounded groups as of `at`.
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.evaluated_at = at;
        self
    }
}

// ─── Execution job ────────────────────────────────────────────

/// One distinct piece of code to run, with the property queries it reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionQuery {
    /// First query Mrn that contributed this code.
    pub query_mrn: Mrn,
    pub code: CompiledCode,
    /// Property name → code id of the property query.
    pub properties: BTreeMap<String, CodeId>,
}

impl ExecutionQuery {
    /// Builds a run queue item from the results of the property queries.
    /// A property without a result is passed on as an error.
    pub fn bind(&self, property_results: &HashMap<CodeId, RawData>) -> RunQueueItem {
        let props = self
            .properties
            .iter()
            .map(|(name, code_id)| {
                let data = property_results
                    .get(code_id)
                    .cloned()
                    .unwrap_or_else(|| RawData::error(format!("no result for {code_id}")));
                (name.clone(), data)
            })
            .collect();
        RunQueueItem {
            code: self.code.clone(),
            props,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionJob {
    pub queries: BTreeMap<CodeId, ExecutionQuery>,
}

impl ExecutionJob {
    /// Code ids that other queries read as properties.
    pub fn property_code_ids(&self) -> Vec<&CodeId> {
        let mut ids: Vec<&CodeId> = self
            .queries
            .values()
            .flat_map(|q| q.properties.values())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

// ─── Collector job ────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DatapointInfo {
    /// Reporting jobs that consume this datapoint.
    pub notify: Vec<Uuid>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskFactorInfo {
    pub mrn: Mrn,
    pub magnitude: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectorJob {
    pub root_uuid: Uuid,
    pub reporting_jobs: BTreeMap<Uuid, ReportingJob>,
    /// Datapoint checksum → consumers.
    pub datapoints: BTreeMap<String, DatapointInfo>,
    pub risk_factors: BTreeMap<Mrn, RiskFactorInfo>,
}

impl CollectorJob {
    pub fn root(&self) -> Option<&ReportingJob> {
        self.reporting_jobs.get(&self.root_uuid)
    }

    pub fn job_by_qr_id(&self, qr_id: &str) -> Option<&ReportingJob> {
        self.reporting_jobs.values().find(|j| j.qr_id == qr_id)
    }

    pub fn jobs_of_type(&self, job_type: ReportingJobType) -> impl Iterator<Item = &ReportingJob> {
        self.reporting_jobs
            .values()
            .filter(move |j| j.job_type == job_type)
    }
}

// ─── Result ───────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPolicy {
    pub execution_job: ExecutionJob,
    pub collector_job: CollectorJob,
    /// Declared predicates the asset supports.
    pub filters: Vec<PredicateId>,
    pub graph_execution_checksum: String,
}

/// Resolves requests against one immutable bundle.
#[derive(Clone, Copy, Debug)]
pub struct Resolver<'b> {
    bundle: &'b BundleMap,
}

impl<'b> Resolver<'b> {
    pub fn new(bundle: &'b BundleMap) -> Self {
        Self { bundle }
    }

    pub fn resolve(&self, request: &ResolveRequest) -> Result<ResolvedPolicy, ResolveError> {
        tracing::debug!(resolve_target = ?request.target, "resolving");
        compiler::compile(self.bundle, request)
    }
}
