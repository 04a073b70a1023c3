//! Choosing what to do with a resource.

use crate::error::{Error, Result};
use crate::reconcile::diff::ChangeSet;
use crate::reconcile::state::DesiredState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::trace;

/// State the caller asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedState {
    /// The resource should exist and match the desired state
    #[default]
    Present,
    /// The resource should not exist
    Absent,
}

impl FromStr for RequestedState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "present" => Ok(RequestedState::Present),
            "absent" => Ok(RequestedState::Absent),
            _ => Err(Error::invalid_argument(
                "state",
                format!("invalid state '{s}'. Valid states: present, absent"),
            )),
        }
    }
}

impl fmt::Display for RequestedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestedState::Present => write!(f, "present"),
            RequestedState::Absent => write!(f, "absent"),
        }
    }
}

/// What the reconciler decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Delete,
    NoOp,
}

impl Action {
    /// Whether carrying out the action changes the remote resource.
    pub fn is_change(self) -> bool {
        !matches!(self, Action::NoOp)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Update => write!(f, "update"),
            Action::Delete => write!(f, "delete"),
            Action::NoOp => write!(f, "no_op"),
        }
    }
}

/// Decide the action from whether the resource exists remotely, the computed
/// change set, and the requested state.
///
/// | remote  | requested | changes | action |
/// |---------|-----------|---------|--------|
/// | absent  | present   | -       | Create |
/// | present | absent    | -       | Delete |
/// | present | present   | yes     | Update |
/// | present | present   | no      | NoOp   |
/// | absent  | absent    | -       | NoOp   |
pub fn decide_action(
    observed_exists: bool,
    desired: &DesiredState,
    change_set: &ChangeSet,
    requested: RequestedState,
) -> Action {
    let action = match (observed_exists, requested) {
        (false, RequestedState::Present) => Action::Create,
        (true, RequestedState::Absent) => Action::Delete,
        (true, RequestedState::Present) if change_set.requires_update() => Action::Update,
        (true, RequestedState::Present) | (false, RequestedState::Absent) => Action::NoOp,
    };
    trace!(
        observed_exists,
        desired_fields = desired.paths().len(),
        changes = change_set.len(),
        %requested,
        %action,
        "decided action"
    );
    action
}
