//! Module system for armctl
//!
//! A module is a named unit of work driven by a parameter map. Every resource
//! type in the [`Registry`](crate::registry::Registry) is exposed as an
//! `azure_rm_<type>` module backed by [`AzureRmModule`].

pub mod azure_rm;

pub use azure_rm::{requested_state, validate_arguments, AzureRmModule};

use crate::client::ClientFactory;
use crate::error::{Error, Result};
use crate::registry::Registry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome reported for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    /// The resource was (or in check mode would be) created, updated or deleted
    Changed,
    /// Nothing to do
    Ok,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleStatus::Changed => write!(f, "changed"),
            ModuleStatus::Ok => write!(f, "ok"),
        }
    }
}

/// Represents a difference between current and desired state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    /// Summary of the current state
    pub before: String,
    /// Summary of the desired state
    pub after: String,
    /// Unified diff of the two documents
    pub details: Option<String>,
}

impl Diff {
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Result of a module execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleOutput {
    /// Whether the module changed anything
    pub changed: bool,
    /// Human-readable message about what happened
    pub msg: String,
    /// Status of the execution
    pub status: ModuleStatus,
    /// Optional diff showing what changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
    /// Additional data returned by the module
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl ModuleOutput {
    fn with_status(changed: bool, msg: impl Into<String>, status: ModuleStatus) -> Self {
        Self {
            changed,
            msg: msg.into(),
            status,
            diff: None,
            data: BTreeMap::new(),
        }
    }

    pub fn ok(msg: impl Into<String>) -> Self {
        Self::with_status(false, msg, ModuleStatus::Ok)
    }

    pub fn changed(msg: impl Into<String>) -> Self {
        Self::with_status(true, msg, ModuleStatus::Changed)
    }

    pub fn with_diff(mut self, diff: Diff) -> Self {
        self.diff = Some(diff);
        self
    }

    /// Attach a result field (`action`, `id`, `state`, ...)
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Parameters passed to a module
pub type ModuleParams = Map<String, Value>;

/// Context for module execution
#[derive(Debug, Clone, Default)]
pub struct ModuleContext {
    /// Whether to run in check mode (dry run)
    pub check_mode: bool,
    /// Whether to show diffs
    pub diff_mode: bool,
    /// Subscription used when resource ids need one
    pub subscription_id: Option<String>,
    /// Stops retries and long-running operation polling
    pub cancel: CancellationToken,
}

impl ModuleContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    pub fn with_diff_mode(mut self, diff_mode: bool) -> Self {
        self.diff_mode = diff_mode;
        self
    }

    pub fn with_subscription(mut self, subscription_id: Option<String>) -> Self {
        self.subscription_id = subscription_id;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Trait that all modules must implement
#[async_trait]
pub trait Module: Send + Sync {
    /// Name used to look the module up
    fn name(&self) -> &str;

    /// One-line description
    fn description(&self) -> &str;

    /// Reject bad parameters before anything remote happens.
    fn validate_params(&self, _params: &ModuleParams) -> Result<()> {
        Ok(())
    }

    /// Run the module. Check mode is read from `context`.
    async fn execute(&self, params: &ModuleParams, context: &ModuleContext)
        -> Result<ModuleOutput>;
}

/// Typed access to module parameters
pub trait ParamExt {
    /// String value of `key`; numbers and booleans are stringified.
    fn get_string(&self, key: &str) -> Result<Option<String>>;
    fn get_string_required(&self, key: &str) -> Result<String>;
}

impl ParamExt for ModuleParams {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(v.to_string())),
            Some(_) => Err(Error::invalid_argument(key, "must be a string")),
        }
    }

    fn get_string_required(&self, key: &str) -> Result<String> {
        self.get_string(key)?
            .ok_or_else(|| Error::MissingArgument(key.to_string()))
    }
}

/// Registry for looking up modules by name
#[derive(Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// One `azure_rm_<type>` module per registered resource type
    pub fn from_resource_types(types: &Registry, clients: Arc<dyn ClientFactory>) -> Self {
        let mut registry = Self::new();
        for resource_type in types.iter() {
            registry.register(Arc::new(AzureRmModule::new(
                resource_type.clone(),
                Arc::clone(&clients),
            )));
        }
        registry
    }

    /// Register a module
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Get a module by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    /// Check if a module exists
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Get all module names
    pub fn names(&self) -> Vec<&str> {
        self.modules.keys().map(|s| s.as_str()).collect()
    }

    /// Validate parameters, then execute a module by name
    pub async fn execute(
        &self,
        name: &str,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> Result<ModuleOutput> {
        let module = self
            .get(name)
            .ok_or_else(|| Error::UnknownResourceType(name.to_string()))?;

        module.validate_params(params)?;
        module.execute(params, context).await
    }
}
