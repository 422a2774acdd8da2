//! Query execution.
//!
//! The [`ExecutionManager`] consumes [`RunQueueItem`]s built from a resolved
//! execution job and pushes [`RawResult`]s to a sink as the
//! [`CollectionRuntime`] reports them.

mod config;
mod latch;
mod manager;
mod memory;
mod runtime;

pub use config::{
    ExecutorConfig, DEFAULT_SLOW_QUERY_THRESHOLD, DEFAULT_TIMEOUT, ENV_MEM_DEBUG, ENV_TIMEOUT_SECS,
};
pub use latch::KeyedLatch;
pub use manager::ExecutionManager;
pub use memory::MemoryUsage;
pub use runtime::{
    CollectionRuntime, QueryExecutor, RawData, RawResult, ResultCallback, RunQueueItem,
};
