//! Merged device-state document.
//!
//! The printer reports partial documents: a full dump after `pushall`,
//! then small deltas containing only the fields that changed. The
//! aggregator folds them into one document that readers can query at any
//! time.
//!
//! Ingestion happens on the single MQTT delivery task. Readers take a
//! shared lock, the delivery task takes the exclusive lock for exactly one
//! document, so no reader ever sees half of a merge.

use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::error::{BambuError, Result};
use crate::value;

/// Default time to wait for the first report.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Concurrently readable device state built from partial reports.
#[derive(Debug)]
pub struct StateAggregator {
    document: RwLock<Map<String, Value>>,
    ready: watch::Sender<bool>,
}

impl Default for StateAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StateAggregator {
    /// Create an empty, not-yet-ready aggregator.
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            document: RwLock::new(Map::new()),
            ready,
        }
    }

    /// Merge one report into the document.
    ///
    /// For each top-level key, two mappings are merged one level deep
    /// (incoming leaves win, other existing leaves are kept). Any other
    /// combination replaces the stored value.
    pub fn ingest(&self, doc: Map<String, Value>) {
        {
            let mut document = self.document.write();
            for (key, incoming) in doc {
                match incoming {
                    Value::Object(fields) => match document.get_mut(&key) {
                        Some(Value::Object(existing)) => existing.extend(fields),
                        _ => {
                            document.insert(key, Value::Object(fields));
                        }
                    },
                    other => {
                        document.insert(key, other);
                    }
                }
            }
        }

        self.ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                tracing::debug!("first telemetry report merged");
                *ready = true;
                true
            }
        });
    }

    /// Merge a decoded report, skipping anything that is not a mapping.
    ///
    /// Returns whether the value was merged.
    pub fn ingest_value(&self, doc: Value) -> bool {
        match doc {
            Value::Object(map) => {
                self.ingest(map);
                true
            }
            other => {
                tracing::warn!(kind = kind_of(&other), "ignoring non-object report");
                false
            }
        }
    }

    /// Point-in-time deep copy of the whole document.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.document.read().clone()
    }

    /// Copy of the value at `path`, or `None` if any step is missing or
    /// not a mapping.
    pub fn get(&self, path: &[&str]) -> Option<Value> {
        let document = self.document.read();
        value::lookup_in(&document, path).cloned()
    }

    /// Whether at least one report has been merged.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the first report is merged.
    ///
    /// `None` waits for [`DEFAULT_READY_TIMEOUT`]. Returns immediately once
    /// the aggregator has become ready; readiness never resets.
    pub async fn wait_for_ready(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(DEFAULT_READY_TIMEOUT);
        let mut ready = self.ready.subscribe();

        let outcome = tokio::time::timeout(timeout, ready.wait_for(|r| *r))
            .await
            .map(|waited| waited.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(BambuError::Timeout("state aggregator dropped".into())),
            Err(_) => Err(BambuError::Timeout(
                "timeout waiting for printer data".into(),
            )),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
