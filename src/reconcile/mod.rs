//! Declarative state reconciliation.
//!
//! Given an argument schema and the arguments a caller provided, the
//! reconciler builds the desired request body, compares it against the remote
//! resource, and decides whether to create, update, delete, or leave it alone.
//! It never talks to the network itself: reading and writing the remote
//! resource is delegated to a [`ResourceOperations`] implementation.
//!
//! ```text
//!   arguments ──► build_desired_state ──► DesiredState ─┐
//!   schema ─────► build_modifiers ──────► Modifiers ────┼──► diff ──► ChangeSet
//!   fetch() ────────────────────────────► ObservedState ┘               │
//!                                                                       ▼
//!                                              decide_action ──► Create/Update/Delete/NoOp
//! ```

pub mod action;
pub mod diff;
pub mod inflate;
pub mod modifiers;
pub mod path;
pub mod schema;
pub mod state;

pub use action::{decide_action, Action, RequestedState};
pub use diff::{diff, ChangeSet, FieldChange};
pub use inflate::{build_desired_state, IdContext};
pub use modifiers::{build_modifiers, Modifier, Modifiers};
pub use path::{Disposition, FieldPath};
pub use schema::{ArgType, ArgumentSchema, ArgumentSpec, CaseTransform, Comparison};
pub use state::{DesiredState, FetchResult, ObservedState};

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Remote side of a reconciliation: read, create, update, and delete one
/// resource instance.
#[async_trait]
pub trait ResourceOperations: Send + Sync {
    /// Read the resource.
    async fn fetch(&self) -> FetchResult;

    /// Create the resource; returns its representation.
    async fn apply_create(&self, desired: &DesiredState) -> Result<Value>;

    /// Update the resource; returns its representation.
    async fn apply_update(&self, changes: &ChangeSet, desired: &DesiredState) -> Result<Value>;

    /// Delete the resource.
    async fn apply_delete(&self) -> Result<()>;
}

/// Options for a single reconciliation.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Decide the action but do not apply it
    pub check_mode: bool,
    /// Values for resource-id patterns
    pub ids: IdContext,
}

/// Outcome of a reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    /// Action decided
    pub action: Action,
    /// Whether the remote resource changed (or would, in check mode)
    pub changed: bool,
    /// Resource representation after the action; `None` when absent
    pub result: Option<Value>,
    /// Resource as observed before the action
    #[serde(skip)]
    pub before: Option<Value>,
    /// Desired body
    #[serde(skip)]
    pub desired: DesiredState,
    /// Differences found
    pub change_set: ChangeSet,
    /// Comparison policy used
    #[serde(skip)]
    pub modifiers: Modifiers,
}

/// Run the full reconciliation contract for one resource.
///
/// Fetch failures are returned as errors; only an explicit
/// [`FetchResult::NotFound`] means the resource is absent.
pub async fn reconcile(
    schema: &ArgumentSchema,
    params: &Map<String, Value>,
    requested: RequestedState,
    ops: &dyn ResourceOperations,
    options: &ReconcileOptions,
) -> Result<ReconcileOutcome> {
    let modifiers = build_modifiers(schema)?;
    let desired = build_desired_state(schema, params, &options.ids)?;

    let observed = ops.fetch().await.into_observed()?;
    let observed_exists = observed.is_some();

    let change_set = match (&observed, requested) {
        (Some(observed), RequestedState::Present) => diff(&desired, observed, &modifiers),
        _ => ChangeSet::default(),
    };

    let action = decide_action(observed_exists, &desired, &change_set, requested);
    debug!(%action, check_mode = options.check_mode, "reconciling resource");

    let before = observed.map(ObservedState::into_value);
    let result = if options.check_mode {
        match action {
            Action::Create => Some(desired.to_value()),
            Action::Update => before.as_ref().map(|b| merged(b, &desired)),
            Action::Delete => None,
            Action::NoOp => before.clone(),
        }
    } else {
        match action {
            Action::Create => {
                info!("creating resource");
                Some(ops.apply_create(&desired).await?)
            }
            Action::Update => {
                info!(changes = change_set.len(), "updating resource");
                Some(ops.apply_update(&change_set, &desired).await?)
            }
            Action::Delete => {
                info!("deleting resource");
                ops.apply_delete().await?;
                None
            }
            Action::NoOp => before.clone(),
        }
    };

    Ok(ReconcileOutcome {
        action,
        changed: action.is_change(),
        result,
        before,
        desired,
        change_set,
        modifiers,
    })
}

/// `base` with every field of `desired` laid over it.
pub fn merged(base: &Value, desired: &DesiredState) -> Value {
    let mut out = base.clone();
    overlay(&mut out, &desired.to_value());
    out
}

fn overlay(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        overlay(existing, value);
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
