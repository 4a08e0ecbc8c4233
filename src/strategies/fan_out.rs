//! Concurrent fan-out over upstream calls with partial-failure collection.
//!
//! Each call runs as its own task with its own deadline; the parent awaits all
//! of them and collects results into maps keyed by upstream service name,
//! never by completion order. A failed call becomes an `errors` entry and does
//! not disturb its siblings. Dropping the parent future aborts every in-flight
//! sub-task, which is how client disconnects propagate downward.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::warn;

use crate::upstream::{UpstreamCall, UpstreamClient};

/// One named sub-call of a fan-out
pub struct FanOutCall {
    pub service: String,
    pub call: UpstreamCall,
}

/// Partial-success outcome of a fan-out
///
/// `data.len() + errors.len()` equals the number of attempted calls.
#[derive(Debug, Default)]
pub struct FanOutResults {
    pub data: Map<String, Value>,
    pub errors: HashMap<String, String>,
}

impl FanOutResults {
    pub fn record_error(&mut self, service: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(service.into(), message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Errors map as a JSON object
    pub fn errors_value(&self) -> Value {
        Value::Object(
            self.errors
                .iter()
                .map(|(service, message)| (service.clone(), Value::String(message.clone())))
                .collect(),
        )
    }
}

/// Run every call concurrently and collect keyed results
pub async fn collect(client: Arc<UpstreamClient>, calls: Vec<FanOutCall>) -> FanOutResults {
    let mut results = FanOutResults::default();
    let mut tasks = JoinSet::new();

    for FanOutCall { service, call } in calls {
        let client = client.clone();
        tasks.spawn(async move {
            let outcome = client.fetch_value(call).await;
            (service, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((service, Ok(value))) => {
                results.data.insert(service, value);
            }
            Ok((service, Err(err))) => {
                warn!(service = %service, error = %err, "Service call failed");
                results.errors.insert(service, err.to_string());
            }
            Err(err) => {
                // only reachable if a sub-task panicked
                warn!(error = %err, "Fan-out sub-task aborted");
            }
        }
    }

    results
}
