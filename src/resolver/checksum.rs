//! Structural checksum of a resolved graph.
//!
//! Algorithm:
//!   1. One line per node: `node:<type>:<identity>[:<code id>]`
//!   2. One line per edge: `edge:<parent>><child>:<scoring>:<weight>`
//!   3. Sort all lines
//!   4. Hash: SHA-256 of ("v1:" + lines joined by \n), hex-encoded
//!
//! Uuids, titles and Mrn lists never enter the hash, so re-resolving the same
//! structure yields the same checksum.

use sha2::{Digest, Sha256};

use super::graph::GraphBuilder;

/// Current checksum version prefix.
pub const CHECKSUM_VERSION: &str = "v1";

pub(crate) fn graph_execution_checksum(graph: &GraphBuilder) -> String {
    let nodes = graph.nodes();
    let mut lines: Vec<String> = Vec::with_capacity(nodes.len() * 2);

    for node in nodes {
        let mut line = format!("node:{}:{}", node.job_type.as_str(), node.identity);
        if let Some(code_id) = &node.code_id {
            line.push(':');
            line.push_str(code_id);
        }
        lines.push(line);

        for (child, impact) in &node.children {
            lines.push(format!(
                "edge:{}>{}:{}:{}",
                node.identity,
                nodes[*child].identity,
                impact.scoring.as_str(),
                impact.weight.map(|w| w.to_string()).unwrap_or_default()
            ));
        }
    }
    lines.sort();

    let mut hasher = Sha256::new();
    hasher.update(format!("{}:", CHECKSUM_VERSION).as_bytes());
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
