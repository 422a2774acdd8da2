use thiserror::Error;

use crate::types::{Mrn, PredicateId};

/// Failures that abort a resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("policy not found: {0}")]
    PolicyNotFound(Mrn),

    #[error("{}", scope_mismatch_message(.policy_predicates, .asset_predicates))]
    ScopeMismatch {
        /// Union of predicates the reachable hierarchy declared.
        policy_predicates: Vec<PredicateId>,
        /// Predicates the asset supplied.
        asset_predicates: Vec<PredicateId>,
    },
}

fn scope_mismatch_message(policy: &[PredicateId], asset: &[PredicateId]) -> String {
    let mut msg = String::from("asset isn't supported by any policies\n");
    if policy.is_empty() {
        msg.push_str("policies didn't provide any filters\n");
    } else {
        msg.push_str(&format!("policies support: {}\n", policy.join(", ")));
    }
    if asset.is_empty() {
        msg.push_str("asset didn't provide any filters\n");
    } else {
        msg.push_str(&format!("asset supports: {}\n", asset.join(", ")));
    }
    msg
}

/// Failures loading a compiled bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("invalid bundle yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid bundle json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures reported by the execution manager.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("query execution timed out")]
    QueryTimeout,

    #[error("collection runtime failed: {0:#}")]
    Runtime(anyhow::Error),

    #[error("execution worker panicked: {0}")]
    Panicked(String),
}
