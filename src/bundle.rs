//! Compiled bundle map — the read-only input of every resolution.
//!
//! Bundles arrive already compiled: every query carries its `CodeId` and every
//! applicability filter has been reduced to predicate ids. The YAML/JSON shape
//! is a flat list per entity kind; lookups go through Mrn-keyed maps.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::BundleError;
use crate::types::{
    Action, CodeId, GroupType, Mrn, PredicateId, ReviewStatus, ScoringSystem, UnixSeconds,
};

// ─── Queries ──────────────────────────────────────────────────

/// Portable executable form of a query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledCode {
    pub id: CodeId,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub entrypoints: Vec<String>,
    #[serde(default)]
    pub datapoints: Vec<String>,
}

impl CompiledCode {
    /// Every datapoint identity this code can report: entrypoints first, then
    /// datapoints, each once.
    pub fn codepoint_checksums(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.entrypoints.len() + self.datapoints.len());
        for checksum in self.entrypoints.iter().chain(self.datapoints.iter()) {
            if !out.contains(checksum) {
                out.push(checksum.clone());
            }
        }
        out
    }
}

/// A named property a query reads, bound to the query that computes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyBinding {
    pub name: String,
    pub mrn: Mrn,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub mrn: Mrn,
    #[serde(default)]
    pub title: Option<String>,
    /// Absent for composite (variant) queries.
    #[serde(default)]
    pub code: Option<CompiledCode>,
    #[serde(default)]
    pub required_predicate_ids: Vec<PredicateId>,
    #[serde(default)]
    pub variant_mrns: Vec<Mrn>,
    #[serde(default)]
    pub props: Vec<PropertyBinding>,
}

impl CompiledQuery {
    pub fn code_id(&self) -> Option<&CodeId> {
        self.code.as_ref().map(|c| &c.id)
    }

    pub fn is_composite(&self) -> bool {
        !self.variant_mrns.is_empty()
    }
}

// ─── References ───────────────────────────────────────────────

/// Reference from a group or control map to a check or data query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRef {
    pub mrn: Mrn,
    #[serde(default)]
    pub action: Action,
    /// Scoring weight of the edge, if declared.
    #[serde(default)]
    pub impact: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyRef {
    pub mrn: Mrn,
    #[serde(default)]
    pub action: Action,
    /// Replaces the referenced policy's scoring system on this edge only.
    #[serde(default)]
    pub scoring_system: Option<ScoringSystem>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskFactorRef {
    pub mrn: Mrn,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub magnitude: Option<f32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameworkRef {
    pub mrn: Mrn,
    #[serde(default)]
    pub action: Action,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlRef {
    pub mrn: Mrn,
}

// ─── Policies ─────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyGroup {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default, rename = "type")]
    pub group_type: GroupType,
    #[serde(default)]
    pub review_status: ReviewStatus,
    #[serde(default)]
    pub required_predicate_ids: Vec<PredicateId>,
    #[serde(default)]
    pub start_date: UnixSeconds,
    #[serde(default)]
    pub end_date: UnixSeconds,
    #[serde(default)]
    pub checks: Vec<QueryRef>,
    #[serde(default)]
    pub queries: Vec<QueryRef>,
    #[serde(default)]
    pub policies: Vec<PolicyRef>,
    #[serde(default)]
    pub risk_factors: Vec<RiskFactorRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub mrn: Mrn,
    #[serde(default)]
    pub owner_mrn: Mrn,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub scoring_system: ScoringSystem,
    #[serde(default)]
    pub groups: Vec<PolicyGroup>,
    #[serde(default)]
    pub risk_factors: Vec<RiskFactorRef>,
}

// ─── Frameworks ───────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameworkGroup {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default, rename = "type")]
    pub group_type: GroupType,
    #[serde(default)]
    pub review_status: ReviewStatus,
    #[serde(default)]
    pub start_date: UnixSeconds,
    #[serde(default)]
    pub end_date: UnixSeconds,
    #[serde(default)]
    pub controls: Vec<ControlRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Framework {
    pub mrn: Mrn,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<FrameworkRef>,
    #[serde(default)]
    pub groups: Vec<FrameworkGroup>,
}

/// Evidence a policy bundle provides for one control.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlMap {
    pub mrn: Mrn,
    #[serde(default)]
    pub checks: Vec<QueryRef>,
    #[serde(default)]
    pub queries: Vec<QueryRef>,
    #[serde(default)]
    pub controls: Vec<ControlRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameworkMap {
    pub mrn: Mrn,
    pub owner_framework_mrn: Mrn,
    #[serde(default)]
    pub policy_dependencies: Vec<Mrn>,
    #[serde(default)]
    pub controls: Vec<ControlMap>,
}

// ─── Risk factors ─────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub mrn: Mrn,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub magnitude: f32,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub required_predicate_ids: Vec<PredicateId>,
    #[serde(default)]
    pub checks: Vec<QueryRef>,
}

// ─── Bundle map ───────────────────────────────────────────────

/// Serialized shape: one list per entity kind.
#[derive(Debug, Default, Deserialize)]
struct BundleDoc {
    #[serde(default)]
    owner_mrn: Mrn,
    #[serde(default)]
    policies: Vec<Policy>,
    #[serde(default)]
    frameworks: Vec<Framework>,
    #[serde(default)]
    framework_maps: Vec<FrameworkMap>,
    #[serde(default)]
    queries: Vec<CompiledQuery>,
    #[serde(default)]
    risk_factors: Vec<RiskFactor>,
}

/// Mrn-indexed view over a compiled bundle.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(from = "BundleDoc")]
pub struct BundleMap {
    pub owner_mrn: Mrn,
    pub policies: HashMap<Mrn, Policy>,
    pub frameworks: HashMap<Mrn, Framework>,
    /// Kept in declaration order; several maps may target one framework.
    pub framework_maps: Vec<FrameworkMap>,
    pub queries: HashMap<Mrn, CompiledQuery>,
    pub risk_factors: HashMap<Mrn, RiskFactor>,
}

impl From<BundleDoc> for BundleMap {
    fn from(doc: BundleDoc) -> Self {
        Self {
            owner_mrn: doc.owner_mrn,
            policies: index("policy", doc.policies, |p| &p.mrn),
            frameworks: index("framework", doc.frameworks, |f| &f.mrn),
            framework_maps: doc.framework_maps,
            queries: index("query", doc.queries, |q| &q.mrn),
            risk_factors: index("risk factor", doc.risk_factors, |r| &r.mrn),
        }
    }
}

fn index<T>(kind: &str, items: Vec<T>, key: impl Fn(&T) -> &Mrn) -> HashMap<Mrn, T> {
    let mut map = HashMap::with_capacity(items.len());
    for item in items {
        let mrn = key(&item).clone();
        if map.insert(mrn.clone(), item).is_some() {
            tracing::warn!(kind, mrn = %mrn, "duplicate bundle entry, keeping the last one");
        }
    }
    map
}

impl BundleMap {
    pub fn from_yaml(source: &str) -> Result<Self, BundleError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_json(source: &str) -> Result<Self, BundleError> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn policy(&self, mrn: &str) -> Option<&Policy> {
        self.policies.get(mrn)
    }

    pub fn framework(&self, mrn: &str) -> Option<&Framework> {
        self.frameworks.get(mrn)
    }

    pub fn query(&self, mrn: &str) -> Option<&CompiledQuery> {
        self.queries.get(mrn)
    }

    pub fn risk_factor(&self, mrn: &str) -> Option<&RiskFactor> {
        self.risk_factors.get(mrn)
    }
}
