//! Reporting graph — node arena with identity-based deduplication.
//!
//! Nodes are drafted into an arena while the compiler walks the hierarchy and
//! turned into [`ReportingJob`]s (with fresh uuids) once the walk completes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

use crate::types::{CodeId, Mrn, ReportingJobType, ScoringSystem};

// ─── Identity ─────────────────────────────────────────────────

/// Dedup key of a reporting node. Checks collapse by code, everything else is
/// keyed by its declared Mrn.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum NodeIdentity {
    Code(CodeId),
    Mrn(Mrn),
}

impl NodeIdentity {
    /// Key the collector reports the node under.
    pub fn qr_id(&self) -> &str {
        match self {
            NodeIdentity::Code(id) | NodeIdentity::Mrn(id) => id,
        }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeIdentity::Code(id) => write!(f, "code:{id}"),
            NodeIdentity::Mrn(mrn) => write!(f, "mrn:{mrn}"),
        }
    }
}

// ─── Edges ────────────────────────────────────────────────────

/// How a child contributes to one parent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impact {
    /// Per-edge scoring override; `Unspecified` keeps the child's own rule.
    pub scoring: ScoringSystem,
    #[serde(default)]
    pub weight: Option<u32>,
}

impl Impact {
    pub fn ignored() -> Self {
        Self {
            scoring: ScoringSystem::IgnoreScore,
            weight: None,
        }
    }

    pub fn is_ignored(&self) -> bool {
        self.scoring == ScoringSystem::IgnoreScore
    }
}

// ─── Output node ──────────────────────────────────────────────

/// One node of the per-asset scoring DAG.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportingJob {
    pub uuid: Uuid,
    pub qr_id: String,
    pub identity: NodeIdentity,
    pub job_type: ReportingJobType,
    pub scoring_system: ScoringSystem,
    pub child_jobs: BTreeMap<Uuid, Impact>,
    /// Parents, in the order their edges were created.
    pub notify: Vec<Uuid>,
    pub mrns: Vec<Mrn>,
    pub datapoints: Vec<String>,
}

// ─── Arena ────────────────────────────────────────────────────

pub(crate) type NodeId = usize;

#[derive(Debug)]
pub(crate) struct NodeDraft {
    pub identity: NodeIdentity,
    pub job_type: ReportingJobType,
    pub scoring_system: ScoringSystem,
    pub mrns: Vec<Mrn>,
    pub datapoints: Vec<String>,
    pub children: Vec<(NodeId, Impact)>,
    pub parents: Vec<NodeId>,
    /// Query whose code backs this node (CHECK / DATA_QUERY leaves only).
    pub query_mrn: Option<Mrn>,
    pub code_id: Option<CodeId>,
}

#[derive(Debug, Default)]
pub(crate) struct GraphBuilder {
    nodes: Vec<NodeDraft>,
    index: HashMap<NodeIdentity, NodeId>,
}

impl GraphBuilder {
    /// Returns the existing node for `identity`, or drafts a new one.
    pub fn get_or_create(
        &mut self,
        identity: NodeIdentity,
        job_type: ReportingJobType,
        scoring_system: ScoringSystem,
    ) -> NodeId {
        if let Some(&id) = self.index.get(&identity) {
            return id;
        }
        let id = self.nodes.len();
        self.index.insert(identity.clone(), id);
        self.nodes.push(NodeDraft {
            identity,
            job_type,
            scoring_system,
            mrns: Vec::new(),
            datapoints: Vec::new(),
            children: Vec::new(),
            parents: Vec::new(),
            query_mrn: None,
            code_id: None,
        });
        id
    }

    pub fn lookup(&self, identity: &NodeIdentity) -> Option<NodeId> {
        self.index.get(identity).copied()
    }

    pub fn add_mrn(&mut self, id: NodeId, mrn: &Mrn) {
        let mrns = &mut self.nodes[id].mrns;
        if !mrns.contains(mrn) {
            mrns.push(mrn.clone());
        }
    }

    pub fn add_datapoints(&mut self, id: NodeId, checksums: Vec<String>) {
        let datapoints = &mut self.nodes[id].datapoints;
        for checksum in checksums {
            if !datapoints.contains(&checksum) {
                datapoints.push(checksum);
            }
        }
    }

    /// Wires `parent -> child`. The first edge between two nodes wins.
    pub fn connect(&mut self, parent: NodeId, child: NodeId, impact: Impact) {
        if self.nodes[parent].children.iter().any(|(c, _)| *c == child) {
            return;
        }
        self.nodes[parent].children.push((child, impact));
        self.nodes[child].parents.push(parent);
    }

    pub fn node(&self, id: NodeId) -> &NodeDraft {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut NodeDraft {
        &mut self.nodes[id]
    }

    pub fn nodes(&self) -> &[NodeDraft] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Assigns fresh uuids and emits the reporting jobs in draft order.
    pub fn into_reporting_jobs(self) -> Vec<ReportingJob> {
        let uuids: Vec<Uuid> = (0..self.nodes.len()).map(|_| Uuid::new_v4()).collect();
        self.nodes
            .into_iter()
            .enumerate()
            .map(|(id, node)| ReportingJob {
                uuid: uuids[id],
                qr_id: node.identity.qr_id().to_string(),
                identity: node.identity,
                job_type: node.job_type,
                scoring_system: node.scoring_system,
                child_jobs: node
                    .children
                    .iter()
                    .map(|(child, impact)| (uuids[*child], *impact))
                    .collect(),
                notify: node.parents.iter().map(|p| uuids[*p]).collect(),
                mrns: node.mrns,
                datapoints: node.datapoints,
            })
            .collect()
    }
}
