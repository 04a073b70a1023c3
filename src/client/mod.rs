//! Remote access to ARM resources.
//!
//! The reconciler only sees [`ResourceOperations`]; this module provides the
//! implementation that forwards those operations to a [`ResourceClient`], and
//! the [`ClientFactory`] seam that picks a client for a provider namespace and
//! API version.

pub mod arm;
pub mod lro;

pub use arm::{ArmClient, ArmClientFactory};
pub use lro::{OperationStatus, PollPolicy};

use crate::error::Result;
use crate::reconcile::{ChangeSet, DesiredState, FetchResult, ResourceOperations};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Optimistic-concurrency precondition sent with a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Precondition {
    /// Unconditional write
    #[default]
    None,
    /// Only write if the resource's ETag matches
    IfMatch(String),
    /// Only write if the resource does not exist yet
    IfNoneMatch,
}

impl Precondition {
    /// Header to send, if any.
    pub fn header(&self) -> Option<(&'static str, &str)> {
        match self {
            Precondition::None => None,
            Precondition::IfMatch(etag) => Some(("If-Match", etag.as_str())),
            Precondition::IfNoneMatch => Some(("If-None-Match", "*")),
        }
    }
}

/// CRUD operations on ARM resources addressed by full resource id.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Read a resource. A missing resource is [`FetchResult::NotFound`], not an error.
    async fn get(&self, id: &str) -> FetchResult;

    /// Create or replace a resource (PUT), waiting for the operation to finish.
    async fn create_or_update(&self, id: &str, body: &Value, precondition: &Precondition)
        -> Result<Value>;

    /// Partially update a resource (PATCH), waiting for the operation to finish.
    async fn update(&self, id: &str, patch: &Value, precondition: &Precondition) -> Result<Value>;

    /// Delete a resource, waiting for the operation to finish. Deleting a
    /// resource that is already gone succeeds.
    async fn delete(&self, id: &str, precondition: &Precondition) -> Result<()>;
}

/// Picks a client for a provider namespace and API version.
pub trait ClientFactory: Send + Sync {
    fn client(&self, provider: &str, api_version: &str) -> Result<Arc<dyn ResourceClient>>;
}

/// How an update is sent to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMethod {
    /// PUT the full desired body
    Put,
    /// PATCH only the changed fields
    Patch,
}

impl fmt::Display for UpdateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateMethod::Put => write!(f, "PUT"),
            UpdateMethod::Patch => write!(f, "PATCH"),
        }
    }
}

/// One remote resource instance, bound to its id.
pub struct RemoteResource {
    client: Arc<dyn ResourceClient>,
    id: String,
    update_method: UpdateMethod,
    precondition: Precondition,
}

impl RemoteResource {
    pub fn new(client: Arc<dyn ResourceClient>, id: impl Into<String>) -> Self {
        Self {
            client,
            id: id.into(),
            update_method: UpdateMethod::Put,
            precondition: Precondition::None,
        }
    }

    pub fn with_update_method(mut self, method: UpdateMethod) -> Self {
        self.update_method = method;
        self
    }

    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl ResourceOperations for RemoteResource {
    async fn fetch(&self) -> FetchResult {
        self.client.get(&self.id).await
    }

    async fn apply_create(&self, desired: &DesiredState) -> Result<Value> {
        self.client
            .create_or_update(&self.id, &desired.to_value(), &self.precondition)
            .await
    }

    async fn apply_update(&self, changes: &ChangeSet, desired: &DesiredState) -> Result<Value> {
        debug!(id = %self.id, method = %self.update_method, "sending update");
        match self.update_method {
            UpdateMethod::Patch => {
                self.client
                    .update(&self.id, &changes.patch_body(desired), &self.precondition)
                    .await
            }
            UpdateMethod::Put => {
                self.client
                    .create_or_update(&self.id, &desired.to_value(), &self.precondition)
                    .await
            }
        }
    }

    async fn apply_delete(&self) -> Result<()> {
        self.client.delete(&self.id, &self.precondition).await
    }
}
