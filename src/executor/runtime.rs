//! Collection runtime seam and the raw values flowing through it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bundle::CompiledCode;

/// A value or an error reported for one datapoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RawData {
    pub fn value(value: serde_json::Value) -> Self {
        Self { value, error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            value: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One result pushed to the sink, keyed by datapoint checksum.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    pub code_id: String,
    pub data: RawData,
}

impl RawResult {
    pub fn error(code_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code_id: code_id.into(),
            data: RawData::error(message),
        }
    }
}

/// Compiled code plus the resolved values (or errors) of its properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunQueueItem {
    pub code: CompiledCode,
    #[serde(default)]
    pub props: BTreeMap<String, RawData>,
}

impl RunQueueItem {
    pub fn new(code: CompiledCode) -> Self {
        Self {
            code,
            props: BTreeMap::new(),
        }
    }

    pub fn with_prop(mut self, name: impl Into<String>, data: RawData) -> Self {
        self.props.insert(name.into(), data);
        self
    }

    /// Error message for the first failed property, by name.
    pub fn property_error(&self) -> Option<String> {
        self.props.iter().find_map(|(name, data)| {
            data.error
                .as_ref()
                .map(|e| format!("property {name} errored: {e}"))
        })
    }

    fn property_values(&self) -> BTreeMap<String, serde_json::Value> {
        self.props
            .iter()
            .map(|(name, data)| (name.clone(), data.value.clone()))
            .collect()
    }

    pub(crate) fn into_parts(self) -> (CompiledCode, BTreeMap<String, serde_json::Value>) {
        let values = self.property_values();
        (self.code, values)
    }
}

/// Receives results from the runtime, from any thread, any number of times.
pub type ResultCallback = Arc<dyn Fn(RawResult) + Send + Sync>;

/// A prepared execution; `run` starts it and may return before results arrive.
pub trait QueryExecutor: Send {
    fn run(&mut self) -> anyhow::Result<()>;
}

/// Backend that collects facts for compiled code.
pub trait CollectionRuntime: Send + Sync {
    fn executor(
        &self,
        code: &CompiledCode,
        props: BTreeMap<String, serde_json::Value>,
        callback: ResultCallback,
    ) -> anyhow::Result<Box<dyn QueryExecutor>>;
}
