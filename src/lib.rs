//! policy-graph — per-asset policy compilation and query execution.
//!
//! Two halves:
//!
//! - [`resolver`] turns a compiled [`bundle::BundleMap`] plus the predicates an
//!   asset supports into a [`resolver::ResolvedPolicy`]: the deduplicated
//!   execution job and the reporting DAG that scores results bottom-up.
//! - [`executor`] runs queued compiled queries against a pluggable collection
//!   runtime and streams raw results back, one item at a time, under a timeout.
//!
//! ```ignore
//! let bundle = BundleMap::from_yaml(&source)?;
//! let request = ResolveRequest::for_policy("//policy/ssh", predicates);
//! let resolved = Resolver::new(&bundle).resolve(&request)?;
//! println!("{}", resolved.graph_execution_checksum);
//! ```

pub mod bundle;
pub mod error;
pub mod executor;
pub mod resolver;
pub mod types;

pub use bundle::BundleMap;
pub use error::{BundleError, ExecutionError, ResolveError};
pub use executor::{ExecutionManager, ExecutorConfig, KeyedLatch};
pub use resolver::{ResolveRequest, ResolveTarget, ResolvedPolicy, Resolver};
