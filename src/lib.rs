//! # armctl - Declarative Azure Resource Manager reconciliation
//!
//! armctl brings a single ARM resource to a declared state. The caller names a
//! resource type and provides its arguments; armctl turns the arguments into
//! the request body the service expects, reads the live resource, compares the
//! two field by field, and creates, updates, deletes, or leaves the resource
//! alone.
//!
//! ## Core Concepts
//!
//! - **Resource types**: data-only descriptions of an ARM type (provider, API
//!   version, id template, argument schema), loaded from YAML manifests
//! - **Argument schema**: per-argument type, disposition (where the value goes
//!   in the body), comparison policy, and update rules
//! - **Desired / observed state**: the body built from the arguments, and the
//!   body the service returned
//! - **Change set**: the fields that differ, split into applicable changes and
//!   warnings for fields that cannot be updated
//! - **Modules**: `azure_rm_<type>` units of work with check and diff modes
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │                 (apply, plan, types, schema, validate)               │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Module Registry (azure_rm_*)                     │
//! └─────────────────────────────────────────────────────────────────────┘
//!          │                         │                         │
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │    Resource     │   │     Reconciler      │   │     ARM client      │
//! │    registry     │   │ (inflate, diff,     │   │ (retry, LRO polling │
//! │  (manifests)    │   │  decide action)     │   │  ETag preconditions)│
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use armctl::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let registry = Registry::builtin()?;
//!     let clients = Arc::new(ArmClientFactory::from_config(&config, Default::default())?);
//!     let modules = ModuleRegistry::from_resource_types(&registry, clients);
//!
//!     let params = serde_json::json!({"name": "rg1", "location": "westeurope"});
//!     let output = modules
//!         .execute(
//!             "azure_rm_resource_group",
//!             params.as_object().unwrap(),
//!             &ModuleContext::new().with_subscription(config.arm.subscription_id.clone()),
//!         )
//!         .await?;
//!     println!("{}", output.msg);
//!     Ok(())
//! }
//! ```

// ============================================================================
// Prelude
// ============================================================================

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Error handling
    pub use crate::error::{Error, ErrorCategory, Result};

    // Configuration
    pub use crate::config::Config;

    // Reconciliation
    pub use crate::reconcile::{
        reconcile, Action, ArgumentSchema, ArgumentSpec, ChangeSet, DesiredState, FetchResult,
        ObservedState, ReconcileOptions, ReconcileOutcome, RequestedState, ResourceOperations,
    };

    // Registry
    pub use crate::registry::{Registry, ResourceType};

    // Client layer
    pub use crate::client::{ArmClientFactory, ClientFactory, ResourceClient};

    // Module system
    pub use crate::modules::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleRegistry};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases.
///
/// Every [`Error`](error::Error) reports an [`ErrorCategory`](error::ErrorCategory)
/// that separates "resource not found" from "request failed" and
/// "validation failed".
pub mod error;

/// Configuration loading from files and environment.
pub mod config;

/// Retry policy for transient remote failures.
pub mod retry;

// ============================================================================
// Reconciliation
// ============================================================================

/// Desired-state construction, comparison, and action selection.
pub mod reconcile;

/// Resource-type registry and manifests.
pub mod registry;

// ============================================================================
// Remote Access
// ============================================================================

/// ARM HTTP client, long-running operations, and the client factory.
pub mod client;

// ============================================================================
// Modules
// ============================================================================

/// Module system; one `azure_rm_<type>` module per resource type.
pub mod modules;

pub use error::{Error, Result};

/// Version of armctl
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
