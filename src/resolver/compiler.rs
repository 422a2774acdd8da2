//! Graph compiler — one traversal from the root, nodes materialized on unwind.
//!
//! Phases:
//!   1. Scope probe over the reachable policy hierarchy (fails fast on mismatch)
//!   2. Override index over the whole assigned hierarchy
//!   3. Policies, their queries and risk factors
//!   4. Frameworks and controls, linked only to already materialized queries
//!   5. Data-query sibling cross-linking, checksum, execution job, collector job
//!
//! Structural nodes are only created once at least one child materialized, so
//! empty policies, frameworks, controls and risk factors never reach the graph.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::activation::{
    control_modifications, framework_group_applies, policy_group_applies, ControlModification,
    OverrideIndex,
};
use super::checksum::graph_execution_checksum;
use super::filters::{ScopeProbe, SupportedPredicateSet};
use super::graph::{GraphBuilder, Impact, NodeId, NodeIdentity, ReportingJob};
use super::{
    CollectorJob, DatapointInfo, ExecutionJob, ExecutionQuery, ResolveRequest, ResolveTarget,
    ResolvedPolicy, RiskFactorInfo, ROOT_QR_ID,
};
use crate::bundle::{BundleMap, CompiledQuery, ControlMap, Framework, Policy, PolicyRef, QueryRef};
use crate::error::ResolveError;
use crate::types::{
    Action, Activation, GroupType, Mrn, PredicateId, ReportingJobType, ScoringSystem, UnixSeconds,
};

pub(crate) fn compile(
    bundle: &BundleMap,
    request: &ResolveRequest,
) -> Result<ResolvedPolicy, ResolveError> {
    let asset = &request.asset_filters;
    let now = request.evaluated_at.timestamp();

    let (root_identity, root_scoring, root_mrn, policies): (_, _, _, Vec<&Policy>) =
        match &request.target {
            ResolveTarget::Policy(mrn) => {
                let policy = bundle
                    .policy(mrn)
                    .ok_or_else(|| ResolveError::PolicyNotFound(mrn.clone()))?;
                (
                    NodeIdentity::Mrn(mrn.clone()),
                    policy.scoring_system,
                    mrn.clone(),
                    vec![policy],
                )
            }
            ResolveTarget::Asset {
                asset_mrn,
                policy_mrns,
                ..
            } => {
                let policies = policy_mrns
                    .iter()
                    .filter_map(|mrn| {
                        let policy = bundle.policy(mrn);
                        if policy.is_none() {
                            tracing::warn!(
                                asset = %asset_mrn,
                                mrn = %mrn,
                                "skipping assignment of undeclared policy"
                            );
                        }
                        policy
                    })
                    .collect();
                (
                    NodeIdentity::Mrn(ROOT_QR_ID.to_string()),
                    ScoringSystem::Unspecified,
                    asset_mrn.clone(),
                    policies,
                )
            }
        };

    let probe = probe_scope(bundle, &policies);
    if !probe.in_scope(asset) {
        return Err(ResolveError::ScopeMismatch {
            policy_predicates: probe.declared(),
            asset_predicates: asset.iter().cloned().collect(),
        });
    }

    let overrides = OverrideIndex::collect(bundle, &policies, asset, now);
    let mut compiler = Compiler::new(bundle, asset, now, overrides);
    let root = compiler
        .graph
        .get_or_create(root_identity, ReportingJobType::Root, root_scoring);
    compiler.graph.add_mrn(root, &root_mrn);

    match &request.target {
        ResolveTarget::Policy(mrn) => {
            compiler.policy_path.push(mrn.clone());
            let children = compiler.policy_children(policies[0]);
            compiler.policy_path.pop();
            for (child, impact) in children {
                compiler.graph.connect(root, child, impact);
            }
            compiler.policy_nodes.insert(mrn.clone(), Some(root));
        }
        ResolveTarget::Asset { framework_mrns, .. } => {
            for policy in &policies {
                if let Some(child) = compiler.policy_node(&root_mrn, &policy.mrn) {
                    compiler.graph.connect(root, child, Impact::default());
                }
            }
            compiler.compile_frameworks(root, framework_mrns);
        }
    }

    Ok(compiler.finish(root, probe.used(asset)))
}

/// Walks the policy hierarchy ignoring actions, collecting the predicates it
/// declares.
fn probe_scope(bundle: &BundleMap, policies: &[&Policy]) -> ScopeProbe {
    let mut probe = ScopeProbe::default();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&Policy> = policies.to_vec();

    let declare_query = |probe: &mut ScopeProbe, mrn: &str| {
        if let Some(query) = bundle.query(mrn) {
            probe.declare(&query.required_predicate_ids);
            for variant in query.variant_mrns.iter().filter_map(|v| bundle.query(v)) {
                probe.declare(&variant.required_predicate_ids);
            }
        }
    };
    let gate_risk_factor = |probe: &mut ScopeProbe, mrn: &str| {
        if let Some(rf) = bundle.risk_factor(mrn) {
            probe.gate(&rf.required_predicate_ids);
            for check in &rf.checks {
                declare_query(&mut *probe, &check.mrn);
            }
        }
    };

    while let Some(policy) = stack.pop() {
        if !seen.insert(policy.mrn.as_str()) {
            continue;
        }
        for group in &policy.groups {
            if group.group_type.is_modifier() {
                continue;
            }
            probe.gate(&group.required_predicate_ids);
            for r in group.checks.iter().chain(group.queries.iter()) {
                declare_query(&mut probe, &r.mrn);
            }
            for r in &group.risk_factors {
                gate_risk_factor(&mut probe, &r.mrn);
            }
            stack.extend(group.policies.iter().filter_map(|r| bundle.policy(&r.mrn)));
        }
        for r in &policy.risk_factors {
            gate_risk_factor(&mut probe, &r.mrn);
        }
    }
    probe
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueryRole {
    Check,
    DataQuery,
}

impl QueryRole {
    fn job_type(self) -> ReportingJobType {
        match self {
            QueryRole::Check => ReportingJobType::Check,
            QueryRole::DataQuery => ReportingJobType::DataQuery,
        }
    }
}

fn impact_for(activation: Activation, scoring: ScoringSystem, weight: Option<u32>) -> Impact {
    match activation {
        Activation::Ignored => Impact {
            scoring: ScoringSystem::IgnoreScore,
            weight,
        },
        _ => Impact { scoring, weight },
    }
}

struct Compiler<'a> {
    bundle: &'a BundleMap,
    asset: &'a SupportedPredicateSet,
    now: UnixSeconds,
    graph: GraphBuilder,
    overrides: OverrideIndex,

    // Per-path visited sets cut cycles back to ancestors.
    policy_path: Vec<Mrn>,
    variant_path: Vec<Mrn>,
    framework_path: Vec<Mrn>,
    control_path: Vec<Mrn>,

    // Memoized outcomes; `None` means "visited, nothing materialized".
    policy_nodes: HashMap<Mrn, Option<NodeId>>,
    risk_factor_nodes: HashMap<Mrn, Option<NodeId>>,
    framework_nodes: HashMap<Mrn, Option<NodeId>>,
    control_nodes: HashMap<Mrn, Option<NodeId>>,

    checks_by_mrn: HashMap<Mrn, NodeId>,
    data_queries_by_mrn: HashMap<Mrn, NodeId>,
    control_mods: HashMap<Mrn, ControlModification>,
    control_evidence: HashMap<Mrn, Vec<&'a ControlMap>>,
    risk_factors: BTreeMap<Mrn, RiskFactorInfo>,
}

impl<'a> Compiler<'a> {
    fn new(
        bundle: &'a BundleMap,
        asset: &'a SupportedPredicateSet,
        now: UnixSeconds,
        overrides: OverrideIndex,
    ) -> Self {
        Self {
            bundle,
            asset,
            now,
            graph: GraphBuilder::default(),
            overrides,
            policy_path: Vec::new(),
            variant_path: Vec::new(),
            framework_path: Vec::new(),
            control_path: Vec::new(),
            policy_nodes: HashMap::new(),
            risk_factor_nodes: HashMap::new(),
            framework_nodes: HashMap::new(),
            control_nodes: HashMap::new(),
            checks_by_mrn: HashMap::new(),
            data_queries_by_mrn: HashMap::new(),
            control_mods: HashMap::new(),
            control_evidence: HashMap::new(),
            risk_factors: BTreeMap::new(),
        }
    }

    /// Overrides visible from `referrer` win over the reference's own action.
    fn effective_action(&self, referrer: &str, mrn: &str, declared: Action) -> Action {
        match self.overrides.action(referrer, mrn) {
            Action::Unspecified => declared,
            action => action,
        }
    }

    // ── Policies ────────────────────────────────────────────────

    fn policy_children(&mut self, policy: &'a Policy) -> Vec<(NodeId, Impact)> {
        let mut children = Vec::new();
        for group in &policy.groups {
            if group.group_type.is_modifier() || !policy_group_applies(group, self.asset, self.now) {
                continue;
            }
            for r in &group.checks {
                children.extend(self.visit_query(&policy.mrn, r, QueryRole::Check));
            }
            for r in &group.queries {
                children.extend(self.visit_query(&policy.mrn, r, QueryRole::DataQuery));
            }
            for r in &group.policies {
                children.extend(self.visit_policy(&policy.mrn, r));
            }
            for r in &group.risk_factors {
                children.extend(self.visit_risk_factor(&policy.mrn, &r.mrn));
            }
        }
        for r in &policy.risk_factors {
            children.extend(self.visit_risk_factor(&policy.mrn, &r.mrn));
        }
        children
    }

    fn visit_policy(&mut self, referrer: &str, r: &PolicyRef) -> Option<(NodeId, Impact)> {
        let activation = Activation::from(self.effective_action(referrer, &r.mrn, r.action));
        if activation == Activation::Absent {
            return None;
        }
        let node = self.policy_node(referrer, &r.mrn)?;
        Some((
            node,
            impact_for(activation, r.scoring_system.unwrap_or_default(), None),
        ))
    }

    fn policy_node(&mut self, referrer: &str, mrn: &Mrn) -> Option<NodeId> {
        if let Some(memo) = self.policy_nodes.get(mrn) {
            return *memo;
        }
        if self.policy_path.contains(mrn) {
            tracing::debug!(referrer, mrn = %mrn, "cutting policy cycle");
            return None;
        }
        let bundle = self.bundle;
        let Some(policy) = bundle.policy(mrn) else {
            tracing::warn!(referrer, mrn = %mrn, "skipping reference to undeclared policy");
            return None;
        };

        self.policy_path.push(mrn.clone());
        let children = self.policy_children(policy);
        self.policy_path.pop();

        let scoring = self.overrides.scoring(mrn).unwrap_or(policy.scoring_system);
        let node = self.materialize_structural(
            NodeIdentity::Mrn(mrn.clone()),
            ReportingJobType::Policy,
            scoring,
            children,
        );
        self.policy_nodes.insert(mrn.clone(), node);
        node
    }

    /// Creates a structural node only when it has at least one child.
    fn materialize_structural(
        &mut self,
        identity: NodeIdentity,
        job_type: ReportingJobType,
        scoring: ScoringSystem,
        children: Vec<(NodeId, Impact)>,
    ) -> Option<NodeId> {
        if children.is_empty() {
            return None;
        }
        let mrn = identity.qr_id().to_string();
        let node = self.graph.get_or_create(identity, job_type, scoring);
        self.graph.add_mrn(node, &mrn);
        for (child, impact) in children {
            self.graph.connect(node, child, impact);
        }
        Some(node)
    }

    // ── Queries ─────────────────────────────────────────────────

    fn visit_query(
        &mut self,
        referrer: &str,
        r: &QueryRef,
        role: QueryRole,
    ) -> Option<(NodeId, Impact)> {
        let activation = Activation::from(self.effective_action(referrer, &r.mrn, r.action));
        if activation == Activation::Absent {
            return None;
        }
        let bundle = self.bundle;
        let Some(query) = bundle.query(&r.mrn) else {
            tracing::warn!(referrer, mrn = %r.mrn, "skipping reference to undeclared query");
            return None;
        };
        if !self.asset.matches(&query.required_predicate_ids) {
            return None;
        }
        let node = self.materialize_query(query, role, None)?;
        Some((node, impact_for(activation, ScoringSystem::Unspecified, r.impact)))
    }

    fn materialize_query(
        &mut self,
        query: &'a CompiledQuery,
        role: QueryRole,
        composite: Option<&'a Mrn>,
    ) -> Option<NodeId> {
        if query.is_composite() {
            return self.materialize_composite(query, role);
        }
        let Some(code) = &query.code else {
            tracing::warn!(mrn = %query.mrn, "query has neither code nor variants");
            return None;
        };

        let identity = match role {
            QueryRole::Check => NodeIdentity::Code(code.id.clone()),
            QueryRole::DataQuery => NodeIdentity::Mrn(query.mrn.clone()),
        };
        let node = self
            .graph
            .get_or_create(identity, role.job_type(), ScoringSystem::Unspecified);
        self.graph.add_mrn(node, &query.mrn);
        if let Some(composite) = composite {
            self.graph.add_mrn(node, composite);
        }
        let draft = self.graph.node_mut(node);
        if draft.query_mrn.is_none() {
            draft.query_mrn = Some(query.mrn.clone());
            draft.code_id = Some(code.id.clone());
        }
        self.graph.add_datapoints(node, code.codepoint_checksums());
        self.index_query(role, &query.mrn, node);
        Some(node)
    }

    fn materialize_composite(&mut self, query: &'a CompiledQuery, role: QueryRole) -> Option<NodeId> {
        if self.variant_path.contains(&query.mrn) {
            tracing::debug!(mrn = %query.mrn, "cutting variant cycle");
            return None;
        }
        let bundle = self.bundle;

        self.variant_path.push(query.mrn.clone());
        let mut variants: Vec<(&'a Mrn, NodeId, Impact)> = Vec::new();
        for variant_mrn in &query.variant_mrns {
            // Composite nodes are shared, so variants see every override layer.
            let activation = Activation::from(self.effective_action(
                &query.mrn,
                variant_mrn,
                Action::Unspecified,
            ));
            if activation == Activation::Absent {
                continue;
            }
            let Some(variant) = bundle.query(variant_mrn) else {
                tracing::warn!(
                    referrer = %query.mrn,
                    mrn = %variant_mrn,
                    "skipping undeclared variant"
                );
                continue;
            };
            if !self.asset.matches(&variant.required_predicate_ids) {
                continue;
            }
            if let Some(node) = self.materialize_query(variant, role, Some(&query.mrn)) {
                let impact = impact_for(activation, ScoringSystem::Unspecified, None);
                variants.push((variant_mrn, node, impact));
            }
        }
        self.variant_path.pop();

        if variants.is_empty() {
            return None;
        }
        let node = self.graph.get_or_create(
            NodeIdentity::Mrn(query.mrn.clone()),
            role.job_type(),
            ScoringSystem::Unspecified,
        );
        self.graph.add_mrn(node, &query.mrn);
        for (variant_mrn, child, impact) in variants {
            self.graph.add_mrn(node, variant_mrn);
            self.graph.connect(node, child, impact);
        }
        self.index_query(role, &query.mrn, node);
        Some(node)
    }

    fn index_query(&mut self, role: QueryRole, mrn: &Mrn, node: NodeId) {
        let index = match role {
            QueryRole::Check => &mut self.checks_by_mrn,
            QueryRole::DataQuery => &mut self.data_queries_by_mrn,
        };
        index.entry(mrn.clone()).or_insert(node);
    }

    // ── Risk factors ────────────────────────────────────────────

    fn visit_risk_factor(&mut self, referrer: &str, mrn: &Mrn) -> Option<(NodeId, Impact)> {
        if let Some(memo) = self.risk_factor_nodes.get(mrn) {
            return memo.map(|node| (node, Impact::default()));
        }
        let bundle = self.bundle;
        let Some(rf) = bundle.risk_factor(mrn) else {
            tracing::warn!(referrer, mrn = %mrn, "skipping reference to undeclared risk factor");
            return None;
        };

        // Risk factors are shared, so they see every override layer, including
        // the actions declared on the references themselves.
        let action = match self.overrides.action(mrn, mrn) {
            Action::Unspecified => rf.action,
            action => action,
        };
        let node = if Activation::from(action) != Activation::Active
            || !self.asset.matches(&rf.required_predicate_ids)
        {
            None
        } else {
            let mut children = Vec::new();
            for check in &rf.checks {
                children.extend(self.visit_query(&rf.mrn, check, QueryRole::Check));
            }
            let node = self.materialize_structural(
                NodeIdentity::Mrn(mrn.clone()),
                ReportingJobType::RiskFactor,
                ScoringSystem::Unspecified,
                children,
            );
            if node.is_some() {
                let magnitude = self.overrides.magnitude(mrn).unwrap_or(rf.magnitude);
                self.risk_factors.insert(
                    mrn.clone(),
                    RiskFactorInfo {
                        mrn: mrn.clone(),
                        magnitude,
                    },
                );
            }
            node
        };
        self.risk_factor_nodes.insert(mrn.clone(), node);
        node.map(|node| (node, Impact::default()))
    }

    // ── Frameworks & controls ───────────────────────────────────

    fn compile_frameworks(&mut self, root: NodeId, framework_mrns: &[Mrn]) {
        if framework_mrns.is_empty() {
            return;
        }
        let mut active: Vec<&'a Framework> = Vec::new();
        let mut seen: HashSet<Mrn> = HashSet::new();
        for mrn in framework_mrns {
            self.discover_framework(mrn, &mut active, &mut seen);
        }

        self.control_mods = control_modifications(active.iter().copied(), self.now);

        let bundle = self.bundle;
        for map in &bundle.framework_maps {
            if !seen.contains(&map.owner_framework_mrn) {
                continue;
            }
            let has_policy = map
                .policy_dependencies
                .iter()
                .any(|p| matches!(self.policy_nodes.get(p), Some(Some(_))));
            if !has_policy {
                tracing::debug!(
                    map = %map.mrn,
                    "framework map has no active policy dependency"
                );
                continue;
            }
            for control in &map.controls {
                self.control_evidence
                    .entry(control.mrn.clone())
                    .or_default()
                    .push(control);
            }
        }

        for mrn in framework_mrns {
            if let Some(node) = self.framework_node(mrn) {
                // Framework scores never feed the asset's policy score.
                self.graph.connect(root, node, Impact::ignored());
            }
        }
    }

    fn discover_framework(
        &self,
        mrn: &Mrn,
        active: &mut Vec<&'a Framework>,
        seen: &mut HashSet<Mrn>,
    ) {
        if seen.contains(mrn) {
            return;
        }
        let bundle = self.bundle;
        let Some(framework) = bundle.framework(mrn) else {
            tracing::warn!(mrn = %mrn, "skipping reference to undeclared framework");
            return;
        };
        seen.insert(mrn.clone());
        active.push(framework);
        for dep in &framework.dependencies {
            if dep.action != Action::Deactivate {
                self.discover_framework(&dep.mrn, active, seen);
            }
        }
    }

    fn framework_node(&mut self, mrn: &Mrn) -> Option<NodeId> {
        if let Some(memo) = self.framework_nodes.get(mrn) {
            return *memo;
        }
        if self.framework_path.contains(mrn) {
            tracing::debug!(mrn = %mrn, "cutting framework cycle");
            return None;
        }
        let bundle = self.bundle;
        let framework = bundle.framework(mrn)?;

        self.framework_path.push(mrn.clone());
        let mut children = Vec::new();
        for group in &framework.groups {
            if group.group_type != GroupType::Default || !framework_group_applies(group, self.now) {
                continue;
            }
            for control in &group.controls {
                children.extend(self.linked_control(&control.mrn));
            }
        }
        for dep in &framework.dependencies {
            let activation = Activation::from(dep.action);
            if activation == Activation::Absent {
                continue;
            }
            if let Some(node) = self.framework_node(&dep.mrn) {
                children.push((node, impact_for(activation, ScoringSystem::Unspecified, None)));
            }
        }
        self.framework_path.pop();

        let node = self.materialize_structural(
            NodeIdentity::Mrn(mrn.clone()),
            ReportingJobType::Framework,
            ScoringSystem::Average,
            children,
        );
        self.framework_nodes.insert(mrn.clone(), node);
        node
    }

    /// A control edge after framework modifications are applied.
    fn linked_control(&mut self, mrn: &Mrn) -> Option<(NodeId, Impact)> {
        let impact = match self.control_mods.get(mrn).copied() {
            Some(ControlModification::Removed(_)) => return None,
            Some(ControlModification::Ignored) => Impact::ignored(),
            None => Impact::default(),
        };
        self.control_node(mrn).map(|node| (node, impact))
    }

    fn control_node(&mut self, mrn: &Mrn) -> Option<NodeId> {
        if let Some(memo) = self.control_nodes.get(mrn) {
            return *memo;
        }
        if self.control_path.contains(mrn) {
            tracing::debug!(mrn = %mrn, "cutting control cycle");
            return None;
        }
        let evidence = self.control_evidence.get(mrn).cloned().unwrap_or_default();

        self.control_path.push(mrn.clone());
        let mut children = Vec::new();
        for map in evidence {
            for r in &map.checks {
                children.extend(linked_query(&self.checks_by_mrn, r));
            }
            for r in &map.queries {
                children.extend(linked_query(&self.data_queries_by_mrn, r));
            }
            for sub in &map.controls {
                children.extend(self.linked_control(&sub.mrn));
            }
        }
        self.control_path.pop();

        let node = self.materialize_structural(
            NodeIdentity::Mrn(mrn.clone()),
            ReportingJobType::Control,
            ScoringSystem::Average,
            children,
        );
        self.control_nodes.insert(mrn.clone(), node);
        node
    }

    // ── Output ──────────────────────────────────────────────────

    fn finish(mut self, root: NodeId, filters: Vec<PredicateId>) -> ResolvedPolicy {
        self.cross_link_data_queries();

        let graph_execution_checksum = graph_execution_checksum(&self.graph);
        let execution_job = self.execution_job();
        let node_count = self.graph.len();

        let jobs = self.graph.into_reporting_jobs();
        let root_uuid = jobs[root].uuid;
        let mut datapoints: BTreeMap<String, DatapointInfo> = BTreeMap::new();
        for job in jobs.iter().filter(|j| j.job_type.is_query()) {
            for checksum in &job.datapoints {
                let info = datapoints.entry(checksum.clone()).or_default();
                if !info.notify.contains(&job.uuid) {
                    info.notify.push(job.uuid);
                }
            }
        }
        let reporting_jobs: BTreeMap<_, ReportingJob> =
            jobs.into_iter().map(|job| (job.uuid, job)).collect();

        tracing::info!(
            nodes = node_count,
            queries = execution_job.queries.len(),
            checksum = %graph_execution_checksum,
            "resolved policy graph"
        );

        ResolvedPolicy {
            execution_job,
            collector_job: CollectorJob {
                root_uuid,
                reporting_jobs,
                datapoints,
                risk_factors: self.risk_factors,
            },
            filters,
            graph_execution_checksum,
        }
    }

    /// Data queries sharing code each list every sibling's Mrn.
    fn cross_link_data_queries(&mut self) {
        let mut by_code: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        for (id, node) in self.graph.nodes().iter().enumerate() {
            if node.job_type != ReportingJobType::DataQuery {
                continue;
            }
            if let Some(code_id) = &node.code_id {
                by_code.entry(code_id.clone()).or_default().push(id);
            }
        }
        for siblings in by_code.values().filter(|s| s.len() > 1) {
            let mut merged: Vec<Mrn> = Vec::new();
            for &id in siblings {
                for mrn in &self.graph.node(id).mrns {
                    if !merged.contains(mrn) {
                        merged.push(mrn.clone());
                    }
                }
            }
            for &id in siblings {
                self.graph.node_mut(id).mrns = merged.clone();
            }
        }
    }

    fn execution_job(&self) -> ExecutionJob {
        let bundle = self.bundle;
        let mut job = ExecutionJob::default();
        for node in self.graph.nodes() {
            if !node.job_type.is_query() {
                continue;
            }
            let Some(query) = node.query_mrn.as_ref().and_then(|m| bundle.query(m)) else {
                continue;
            };
            self.add_execution_query(&mut job, query);
        }
        job
    }

    fn add_execution_query(&self, job: &mut ExecutionJob, query: &'a CompiledQuery) {
        let Some(code) = &query.code else {
            return;
        };
        if job.queries.contains_key(&code.id) {
            return;
        }

        let bundle = self.bundle;
        let mut bound: Vec<&'a CompiledQuery> = Vec::new();
        let mut properties = BTreeMap::new();
        for prop in &query.props {
            let Some(prop_query) = bundle.query(&prop.mrn) else {
                tracing::warn!(
                    referrer = %query.mrn,
                    mrn = %prop.mrn,
                    "skipping undeclared property query"
                );
                continue;
            };
            let Some(prop_code) = &prop_query.code else {
                tracing::warn!(mrn = %prop.mrn, "property query has no code");
                continue;
            };
            properties.insert(prop.name.clone(), prop_code.id.clone());
            bound.push(prop_query);
        }

        job.queries.insert(
            code.id.clone(),
            ExecutionQuery {
                query_mrn: query.mrn.clone(),
                code: code.clone(),
                properties,
            },
        );
        for prop_query in bound {
            self.add_execution_query(job, prop_query);
        }
    }
}

/// Controls only link to query nodes the policies already materialized.
fn linked_query(index: &HashMap<Mrn, NodeId>, r: &QueryRef) -> Option<(NodeId, Impact)> {
    let activation = Activation::from(r.action);
    if activation == Activation::Absent {
        return None;
    }
    let node = index.get(&r.mrn).copied()?;
    Some((node, impact_for(activation, ScoringSystem::Unspecified, r.impact)))
}
