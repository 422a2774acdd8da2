//! Filter matching — which entities apply to an asset.
//!
//! Predicates are compared by id only; evaluating them against asset facts
//! happens upstream and yields a [`SupportedPredicateSet`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::PredicateId;

/// Predicate ids an asset satisfies.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedPredicateSet(BTreeSet<PredicateId>);

impl SupportedPredicateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<PredicateId>) -> bool {
        self.0.insert(id.into())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Sorted ids.
    pub fn iter(&self) -> impl Iterator<Item = &PredicateId> {
        self.0.iter()
    }

    /// Unconditional (empty) requirements always match; otherwise any one
    /// supported id suffices.
    pub fn matches(&self, required: &[PredicateId]) -> bool {
        required.is_empty() || required.iter().any(|id| self.0.contains(id))
    }
}

impl<S: Into<PredicateId>> FromIterator<S> for SupportedPredicateSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Collects the predicates a hierarchy declares, for the global scope check.
#[derive(Debug, Default)]
pub(crate) struct ScopeProbe {
    declared: BTreeSet<PredicateId>,
    unconditional: bool,
}

impl ScopeProbe {
    /// Records a gating entity (group or risk factor). An empty requirement
    /// list makes the hierarchy unconditionally applicable.
    pub fn gate(&mut self, required: &[PredicateId]) {
        if required.is_empty() {
            self.unconditional = true;
        }
        self.declare(required);
    }

    /// Records predicates that narrow an already gated entity.
    pub fn declare(&mut self, required: &[PredicateId]) {
        self.declared.extend(required.iter().cloned());
    }

    /// Declared predicates the asset supports, sorted.
    pub fn used(&self, asset: &SupportedPredicateSet) -> Vec<PredicateId> {
        self.declared
            .iter()
            .filter(|id| asset.contains(id))
            .cloned()
            .collect()
    }

    pub fn in_scope(&self, asset: &SupportedPredicateSet) -> bool {
        self.unconditional || self.declared.iter().any(|id| asset.contains(id))
    }

    pub fn declared(&self) -> Vec<PredicateId> {
        self.declared.iter().cloned().collect()
    }
}
