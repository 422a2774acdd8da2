//! Activation — which reachable entities are active, ignored or absent.
//!
//! Before traversal every policy reachable from the assignment contributes an
//! [`OverrideLayer`] built from its applicable groups. The [`OverrideIndex`]
//! keys each layer by the shallowest depth its policy is reached at, so the
//! outcome for an entity never depends on the order policies are assigned or
//! visited:
//!
//! - a policy sees the layers of every shallower policy plus its own;
//! - the shallowest explicit action wins, same-depth conflicts resolve to the
//!   most restrictive action (DEACTIVATE, then IGNORE, then ACTIVATE);
//! - shared entities (risk factors, variants, node scoring) see every layer.

use std::collections::{HashMap, HashSet};

use super::filters::SupportedPredicateSet;
use crate::bundle::{BundleMap, Framework, FrameworkGroup, Policy, PolicyGroup};
use crate::types::{
    is_valid_from, is_valid_until, Action, GroupType, Mrn, ReviewStatus, ScoringSystem,
    UnixSeconds,
};

// ─── Group applicability ──────────────────────────────────────

fn review_allows(group_type: GroupType, status: ReviewStatus) -> bool {
    match status {
        ReviewStatus::Rejected => false,
        ReviewStatus::Accepted => true,
        ReviewStatus::Unspecified => group_type != GroupType::Exception,
    }
}

/// Whether a policy group takes effect for this asset at `now`. Expired or
/// rejected groups behave as if they were never declared.
pub(crate) fn policy_group_applies(
    group: &PolicyGroup,
    asset: &SupportedPredicateSet,
    now: UnixSeconds,
) -> bool {
    review_allows(group.group_type, group.review_status)
        && is_valid_from(group.start_date, now)
        && is_valid_until(group.end_date, now)
        && asset.matches(&group.required_predicate_ids)
}

pub(crate) fn framework_group_applies(group: &FrameworkGroup, now: UnixSeconds) -> bool {
    review_allows(group.group_type, group.review_status)
        && is_valid_from(group.start_date, now)
        && is_valid_until(group.end_date, now)
}

// ─── Override layers ──────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Override {
    action: Action,
    magnitude: Option<f32>,
    scoring: Option<ScoringSystem>,
}

fn restrictiveness(action: Action) -> u8 {
    match action {
        Action::Deactivate => 3,
        Action::Ignore => 2,
        Action::Activate => 1,
        Action::Unspecified => 0,
    }
}

/// Overrides one policy declares for the entities below it.
#[derive(Debug, Default)]
pub(crate) struct OverrideLayer {
    entries: HashMap<Mrn, Override>,
}

impl OverrideLayer {
    pub fn from_policy(policy: &Policy, asset: &SupportedPredicateSet, now: UnixSeconds) -> Self {
        let mut layer = Self::default();
        let applicable: Vec<&PolicyGroup> = policy
            .groups
            .iter()
            .filter(|g| policy_group_applies(g, asset, now))
            .collect();

        // Content groups first so modifier groups win inside one policy.
        for group in applicable.iter().filter(|g| !g.group_type.is_modifier()) {
            for r in group.checks.iter().chain(group.queries.iter()) {
                layer.declare(&r.mrn, r.action);
            }
            for r in &group.policies {
                layer.declare(&r.mrn, r.action);
                if let Some(scoring) = r.scoring_system {
                    layer.entries.entry(r.mrn.clone()).or_default().scoring = Some(scoring);
                }
            }
            for r in &group.risk_factors {
                layer.declare_risk_factor(&r.mrn, r.action, r.magnitude);
            }
        }
        for r in &policy.risk_factors {
            layer.declare_risk_factor(&r.mrn, r.action, r.magnitude);
        }

        for group in applicable.iter().filter(|g| g.group_type.is_modifier()) {
            let action = match group.group_type {
                GroupType::Exception => Action::Ignore,
                _ => Action::Deactivate,
            };
            let mrns = group
                .checks
                .iter()
                .chain(group.queries.iter())
                .map(|r| &r.mrn)
                .chain(group.policies.iter().map(|r| &r.mrn))
                .chain(group.risk_factors.iter().map(|r| &r.mrn));
            for mrn in mrns {
                layer.force(mrn, action);
            }
        }
        layer
    }

    fn declare(&mut self, mrn: &Mrn, action: Action) {
        if action.is_specified() {
            self.entries.entry(mrn.clone()).or_default().action = action;
        }
    }

    fn declare_risk_factor(&mut self, mrn: &Mrn, action: Action, magnitude: Option<f32>) {
        if !action.is_specified() && magnitude.is_none() {
            return;
        }
        let entry = self.entries.entry(mrn.clone()).or_default();
        if action.is_specified() {
            entry.action = action;
        }
        if magnitude.is_some() {
            entry.magnitude = magnitude;
        }
    }

    fn force(&mut self, mrn: &Mrn, action: Action) {
        self.entries.entry(mrn.clone()).or_default().action = action;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
struct IndexedOverride {
    depth: usize,
    owner: Mrn,
    value: Override,
}

/// Override layers of the whole assigned policy hierarchy.
#[derive(Debug, Default)]
pub(crate) struct OverrideIndex {
    /// Shallowest depth each reachable policy is reached at.
    depths: HashMap<Mrn, usize>,
    /// Per overridden Mrn, ordered by depth then declaring policy.
    entries: HashMap<Mrn, Vec<IndexedOverride>>,
}

impl OverrideIndex {
    /// Walks the hierarchy breadth-first from `roots`. A sub-policy is only
    /// followed when it is not deactivated as seen from its referrer.
    pub fn collect(
        bundle: &BundleMap,
        roots: &[&Policy],
        asset: &SupportedPredicateSet,
        now: UnixSeconds,
    ) -> Self {
        let mut index = Self::default();
        let mut level: Vec<&Policy> = Vec::new();
        let mut queued: HashSet<&str> = HashSet::new();
        for policy in roots {
            if queued.insert(policy.mrn.as_str()) {
                level.push(*policy);
            }
        }

        let mut depth = 0;
        while !level.is_empty() {
            for policy in &level {
                index.depths.insert(policy.mrn.clone(), depth);
            }
            for policy in &level {
                index.add_layer(depth, &policy.mrn, OverrideLayer::from_policy(policy, asset, now));
            }

            let mut next = Vec::new();
            for policy in &level {
                let groups = policy
                    .groups
                    .iter()
                    .filter(|g| !g.group_type.is_modifier() && policy_group_applies(g, asset, now));
                for r in groups.flat_map(|g| g.policies.iter()) {
                    if queued.contains(r.mrn.as_str()) {
                        continue;
                    }
                    let action = match index.action(&policy.mrn, &r.mrn) {
                        Action::Unspecified => r.action,
                        action => action,
                    };
                    if action == Action::Deactivate {
                        continue;
                    }
                    if let Some(sub) = bundle.policy(&r.mrn) {
                        queued.insert(sub.mrn.as_str());
                        next.push(sub);
                    }
                }
            }
            level = next;
            depth += 1;
        }
        index
    }

    fn add_layer(&mut self, depth: usize, owner: &Mrn, layer: OverrideLayer) {
        for (mrn, value) in layer.entries {
            let entries = self.entries.entry(mrn).or_default();
            let at = entries.partition_point(|e| (e.depth, &e.owner) < (depth, owner));
            entries.insert(
                at,
                IndexedOverride {
                    depth,
                    owner: owner.clone(),
                    value,
                },
            );
        }
    }

    /// Explicit action for `mrn` as seen from `referrer`, or `Unspecified`.
    /// A referrer that is not an indexed policy sees every layer.
    pub fn action(&self, referrer: &str, mrn: &str) -> Action {
        let Some(entries) = self.entries.get(mrn) else {
            return Action::Unspecified;
        };
        let limit = self.depths.get(referrer).copied();
        let mut found: Option<(usize, Action)> = None;
        for entry in entries {
            let visible = match limit {
                Some(limit) => entry.depth < limit || entry.owner == referrer,
                None => true,
            };
            if !visible || !entry.value.action.is_specified() {
                continue;
            }
            match found {
                None => found = Some((entry.depth, entry.value.action)),
                Some((depth, action)) if depth == entry.depth => {
                    if restrictiveness(entry.value.action) > restrictiveness(action) {
                        found = Some((depth, entry.value.action));
                    }
                }
                Some(_) => break,
            }
        }
        found.map(|(_, action)| action).unwrap_or_default()
    }

    /// Shallowest magnitude override for `mrn`.
    pub fn magnitude(&self, mrn: &str) -> Option<f32> {
        self.entries.get(mrn)?.iter().find_map(|e| e.value.magnitude)
    }

    /// Shallowest scoring system override for the policy `mrn`.
    pub fn scoring(&self, mrn: &str) -> Option<ScoringSystem> {
        self.entries.get(mrn)?.iter().find_map(|e| e.value.scoring)
    }
}

// ─── Framework modifications ──────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ControlModification {
    /// DISABLE or OUT_OF_SCOPE: the control is treated as undeclared.
    Removed(GroupType),
    /// Accepted EXCEPTION: the control stays but scores nothing.
    Ignored,
}

/// Control modifications declared by the active frameworks. Removal beats an
/// exception regardless of which framework declared it.
pub(crate) fn control_modifications<'b>(
    frameworks: impl IntoIterator<Item = &'b Framework>,
    now: UnixSeconds,
) -> HashMap<Mrn, ControlModification> {
    let mut mods: HashMap<Mrn, ControlModification> = HashMap::new();
    for framework in frameworks {
        for group in &framework.groups {
            if !group.group_type.is_modifier() || !framework_group_applies(group, now) {
                continue;
            }
            for control in &group.controls {
                match group.group_type {
                    GroupType::Exception => {
                        mods.entry(control.mrn.clone())
                            .or_insert(ControlModification::Ignored);
                    }
                    kind => {
                        mods.insert(control.mrn.clone(), ControlModification::Removed(kind));
                    }
                }
            }
        }
    }
    mods
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{ControlRef, PolicyRef, QueryRef, RiskFactorRef};

    const NOW: UnixSeconds = 1_700_000_000;

    fn check(mrn: &str, action: Action) -> QueryRef {
        QueryRef {
            mrn: mrn.into(),
            action,
            impact: None,
        }
    }

    fn asset() -> SupportedPredicateSet {
        ["true"].into_iter().collect()
    }

    // ── Group applicability ─────────────────────────────────────

    #[test]
    fn test_expired_group_does_not_apply() {
        let group = PolicyGroup {
            end_date: NOW - 1,
            ..Default::default()
        };
        assert!(!policy_group_applies(&group, &asset(), NOW));
    }

    #[test]
    fn test_future_group_does_not_apply_yet() {
        let group = PolicyGroup {
            start_date: NOW + 10,
            ..Default::default()
        };
        assert!(!policy_group_applies(&group, &asset(), NOW));
    }

    #[test]
    fn test_exception_requires_acceptance() {
        let mut group = FrameworkGroup {
            group_type: GroupType::Exception,
            end_date: NOW + 100,
            ..Default::default()
        };
        assert!(!framework_group_applies(&group, NOW));
        group.review_status = ReviewStatus::Accepted;
        assert!(framework_group_applies(&group, NOW));
        group.review_status = ReviewStatus::Rejected;
        assert!(!framework_group_applies(&group, NOW));
    }

    #[test]
    fn test_rejected_disable_has_no_effect() {
        let group = FrameworkGroup {
            group_type: GroupType::Disable,
            review_status: ReviewStatus::Rejected,
            ..Default::default()
        };
        assert!(!framework_group_applies(&group, NOW));
    }

    // ── Override index ──────────────────────────────────────────

    fn policy(mrn: &str, groups: Vec<PolicyGroup>) -> Policy {
        Policy {
            mrn: mrn.into(),
            groups,
            ..Default::default()
        }
    }

    fn includes(mrns: &[&str]) -> PolicyGroup {
        PolicyGroup {
            policies: mrns
                .iter()
                .map(|m| PolicyRef {
                    mrn: (*m).into(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn index(bundle: &BundleMap, roots: &[&str]) -> OverrideIndex {
        let roots: Vec<&Policy> = roots.iter().filter_map(|m| bundle.policy(m)).collect();
        OverrideIndex::collect(bundle, &roots, &asset(), NOW)
    }

    fn bundle_of(policies: Vec<Policy>) -> BundleMap {
        BundleMap {
            policies: policies.into_iter().map(|p| (p.mrn.clone(), p)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_outermost_override_wins() {
        let mut outer_group = includes(&["//policy/inner"]);
        outer_group.checks = vec![check("//query/c1", Action::Deactivate)];
        outer_group.risk_factors = vec![RiskFactorRef {
            mrn: "//rf/1".into(),
            action: Action::Unspecified,
            magnitude: Some(0.9),
        }];
        let mut inner = policy(
            "//policy/inner",
            vec![PolicyGroup {
                checks: vec![check("//query/c1", Action::Activate)],
                ..Default::default()
            }],
        );
        inner.risk_factors = vec![RiskFactorRef {
            mrn: "//rf/1".into(),
            action: Action::Activate,
            magnitude: Some(0.6),
        }];
        let bundle = bundle_of(vec![policy("//policy/outer", vec![outer_group]), inner]);
        let index = index(&bundle, &["//policy/outer"]);

        assert_eq!(index.action("//policy/inner", "//query/c1"), Action::Deactivate);
        assert_eq!(index.action("//policy/outer", "//query/c1"), Action::Deactivate);
        assert_eq!(index.magnitude("//rf/1"), Some(0.9));
        // Outer layer declared no action for the risk factor.
        assert_eq!(index.action("//rf/1", "//rf/1"), Action::Activate);
        assert_eq!(index.action("//policy/inner", "//query/unknown"), Action::Unspecified);
    }

    #[test]
    fn test_siblings_do_not_see_each_other() {
        let a = policy(
            "//policy/a",
            vec![PolicyGroup {
                checks: vec![check("//query/c1", Action::Deactivate)],
                ..Default::default()
            }],
        );
        let b = policy(
            "//policy/b",
            vec![PolicyGroup {
                checks: vec![check("//query/c1", Action::Ignore)],
                ..Default::default()
            }],
        );
        let bundle = bundle_of(vec![a, b]);
        for roots in [["//policy/a", "//policy/b"], ["//policy/b", "//policy/a"]] {
            let index = index(&bundle, &roots);
            assert_eq!(index.action("//policy/a", "//query/c1"), Action::Deactivate);
            assert_eq!(index.action("//policy/b", "//query/c1"), Action::Ignore);
            // Shared entities resolve same-depth conflicts restrictively.
            assert_eq!(index.action("//query/c1", "//query/c1"), Action::Deactivate);
        }
    }

    #[test]
    fn test_deactivated_sub_policy_is_not_indexed() {
        let mut outer_group = includes(&["//policy/inner"]);
        outer_group.policies[0].action = Action::Deactivate;
        let inner = policy(
            "//policy/inner",
            vec![PolicyGroup {
                checks: vec![check("//query/c1", Action::Ignore)],
                ..Default::default()
            }],
        );
        let bundle = bundle_of(vec![policy("//policy/outer", vec![outer_group]), inner]);
        let index = index(&bundle, &["//policy/outer"]);
        assert_eq!(index.action("//query/c1", "//query/c1"), Action::Unspecified);
    }

    #[test]
    fn test_scoring_override_from_shallowest_reference() {
        let mut outer_group = includes(&["//policy/mid", "//policy/leaf"]);
        outer_group.policies[1].scoring_system = Some(ScoringSystem::Banded);
        let mut mid_group = includes(&["//policy/leaf"]);
        mid_group.policies[0].scoring_system = Some(ScoringSystem::Worst);
        let bundle = bundle_of(vec![
            policy("//policy/outer", vec![outer_group]),
            policy("//policy/mid", vec![mid_group]),
            policy("//policy/leaf", vec![]),
        ]);
        let index = index(&bundle, &["//policy/outer"]);
        assert_eq!(index.scoring("//policy/leaf"), Some(ScoringSystem::Banded));
        assert_eq!(index.scoring("//policy/mid"), None);
    }

    #[test]
    fn test_modifier_groups_override_content_in_same_policy() {
        let p = policy(
            "//policy/p",
            vec![
                PolicyGroup {
                    group_type: GroupType::Disable,
                    checks: vec![check("//query/c1", Action::Unspecified)],
                    ..Default::default()
                },
                PolicyGroup {
                    checks: vec![check("//query/c1", Action::Activate)],
                    ..Default::default()
                },
                PolicyGroup {
                    group_type: GroupType::Exception,
                    review_status: ReviewStatus::Accepted,
                    checks: vec![check("//query/c2", Action::Unspecified)],
                    ..Default::default()
                },
            ],
        );
        let bundle = bundle_of(vec![p]);
        let index = index(&bundle, &["//policy/p"]);
        assert_eq!(index.action("//policy/p", "//query/c1"), Action::Deactivate);
        assert_eq!(index.action("//policy/p", "//query/c2"), Action::Ignore);
    }

    #[test]
    fn test_unmatched_group_contributes_nothing() {
        let policy = Policy {
            mrn: "//policy/p".into(),
            groups: vec![PolicyGroup {
                required_predicate_ids: vec!["windows".into()],
                checks: vec![check("//query/c1", Action::Deactivate)],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(OverrideLayer::from_policy(&policy, &asset(), NOW).is_empty());
    }

    // ── Framework modifications ─────────────────────────────────

    #[test]
    fn test_removal_beats_exception() {
        let group = |group_type, mrn: &str| FrameworkGroup {
            group_type,
            review_status: ReviewStatus::Accepted,
            controls: vec![ControlRef { mrn: mrn.into() }],
            ..Default::default()
        };
        let f1 = Framework {
            mrn: "//framework/f1".into(),
            groups: vec![
                group(GroupType::Exception, "//control/1"),
                group(GroupType::Exception, "//control/2"),
            ],
            ..Default::default()
        };
        let f2 = Framework {
            mrn: "//framework/f2".into(),
            groups: vec![group(GroupType::OutOfScope, "//control/1")],
            ..Default::default()
        };
        let mods = control_modifications([&f1, &f2], NOW);
        assert_eq!(
            mods.get("//control/1"),
            Some(&ControlModification::Removed(GroupType::OutOfScope))
        );
        assert_eq!(mods.get("//control/2"), Some(&ControlModification::Ignored));
    }

    #[test]
    fn test_expired_exception_has_no_effect() {
        let f = Framework {
            mrn: "//framework/f".into(),
            groups: vec![FrameworkGroup {
                group_type: GroupType::Exception,
                review_status: ReviewStatus::Accepted,
                end_date: NOW - 60,
                controls: vec![ControlRef {
                    mrn: "//control/1".into(),
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(control_modifications([&f], NOW).is_empty());
    }
}
