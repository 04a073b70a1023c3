//! Shared test utilities for the armctl test suite.
//!
//! This module provides:
//! - An in-memory ARM control plane implementing `ResourceClient`
//! - Fast retry and polling policies
//! - A factory pointed at a wiremock server
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use armctl::client::{ArmClientFactory, ClientFactory, PollPolicy, Precondition, ResourceClient};
use armctl::config::ArmConfig;
use armctl::error::{RemoteOperationError, Result};
use armctl::reconcile::{FetchResult, ObservedState};
use armctl::retry::{JitterStrategy, RetryPolicy};

pub const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000001";
pub const TOKEN: &str = "test-token";

/// Object-valued JSON literal as a parameter map.
pub fn params(value: Value) -> Map<String, Value> {
    value
        .as_object()
        .cloned()
        .unwrap_or_else(|| panic!("expected a JSON object, got {value}"))
}

/// Retries quickly so throttling tests stay fast.
pub fn quick_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(3)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(10))
        .jitter(JitterStrategy::None)
        .build()
}

pub fn quick_poll(timeout: Duration) -> PollPolicy {
    PollPolicy {
        initial_interval: Duration::from_millis(5),
        max_interval: Duration::from_millis(20),
        multiplier: 2.0,
        timeout,
    }
}

/// Factory for clients talking to `endpoint` (normally a `MockServer::uri()`).
pub fn arm_factory(
    endpoint: &str,
    retry: RetryPolicy,
    polling: PollPolicy,
    cancel: CancellationToken,
) -> ArmClientFactory {
    let arm = ArmConfig {
        endpoint: endpoint.to_string(),
        subscription_id: Some(SUBSCRIPTION.to_string()),
        token: Some(TOKEN.to_string()),
        request_timeout: Duration::from_secs(5),
    };
    ArmClientFactory::new(&arm, retry, polling, cancel).expect("valid test endpoint")
}

// ============================================================================
// In-memory control plane
// ============================================================================

/// One recorded request.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub method: &'static str,
    pub id: String,
    pub body: Option<Value>,
    pub precondition: Precondition,
}

/// Resource store keyed by id. PATCH merges top-level objects one level deep;
/// reads can be made to fail.
#[derive(Default)]
pub struct MemoryArm {
    resources: Mutex<HashMap<String, Value>>,
    requests: Mutex<Vec<Recorded>>,
    read_failure: Mutex<Option<RemoteOperationError>>,
}

impl MemoryArm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, id: &str, body: Value) {
        self.resources.lock().unwrap().insert(id.to_string(), body);
    }

    pub fn resource(&self, id: &str) -> Option<Value> {
        self.resources.lock().unwrap().get(id).cloned()
    }

    pub fn fail_reads_with(&self, error: RemoteOperationError) {
        *self.read_failure.lock().unwrap() = Some(error);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Methods of the recorded requests, e.g. `["GET", "PUT"]`.
    pub fn methods(&self) -> Vec<&'static str> {
        self.requests().into_iter().map(|r| r.method).collect()
    }

    fn record(
        &self,
        method: &'static str,
        id: &str,
        body: Option<&Value>,
        precondition: &Precondition,
    ) {
        self.requests.lock().unwrap().push(Recorded {
            method,
            id: id.to_string(),
            body: body.cloned(),
            precondition: precondition.clone(),
        });
    }
}

#[async_trait]
impl ResourceClient for MemoryArm {
    async fn get(&self, id: &str) -> FetchResult {
        self.record("GET", id, None, &Precondition::None);
        if let Some(error) = self.read_failure.lock().unwrap().clone() {
            return FetchResult::Failed(error);
        }
        match self.resource(id) {
            Some(body) => FetchResult::Found(ObservedState::new(body)),
            None => FetchResult::NotFound,
        }
    }

    async fn create_or_update(
        &self,
        id: &str,
        body: &Value,
        precondition: &Precondition,
    ) -> Result<Value> {
        self.record("PUT", id, Some(body), precondition);
        let mut stored = body.clone();
        stored["id"] = json!(id);
        self.seed(id, stored.clone());
        Ok(stored)
    }

    async fn update(&self, id: &str, patch: &Value, precondition: &Precondition) -> Result<Value> {
        self.record("PATCH", id, Some(patch), precondition);
        let mut resources = self.resources.lock().unwrap();
        let current = resources
            .entry(id.to_string())
            .or_insert_with(|| json!({ "id": id }));
        merge_one_level(current, patch);
        Ok(current.clone())
    }

    async fn delete(&self, id: &str, precondition: &Precondition) -> Result<()> {
        self.record("DELETE", id, None, precondition);
        self.resources.lock().unwrap().remove(id);
        Ok(())
    }
}

fn merge_one_level(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (key, value) in patch {
            match (target.get_mut(key), value) {
                (Some(Value::Object(existing)), Value::Object(incoming)) => {
                    for (k, v) in incoming {
                        existing.insert(k.clone(), v.clone());
                    }
                }
                _ => {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Hands out the same in-memory client for every provider.
pub struct MemoryFactory(pub Arc<MemoryArm>);

impl ClientFactory for MemoryFactory {
    fn client(&self, _provider: &str, _api_version: &str) -> Result<Arc<dyn ResourceClient>> {
        Ok(self.0.clone())
    }
}
