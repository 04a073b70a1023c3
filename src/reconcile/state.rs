//! Desired and observed resource state.
//!
//! Both are plain nested JSON objects built fresh for every reconciliation and
//! dropped afterwards. [`FetchResult`] is the outcome of reading the remote
//! resource, keeping "does not exist" apart from "could not be read".

use crate::error::RemoteOperationError;
use crate::reconcile::path::FieldPath;
use serde::Serialize;
use serde_json::{Map, Value};

/// Look up `path` inside `root`, descending through objects only.
pub fn lookup<'a>(root: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(root, |current, segment| current.as_object()?.get(segment))
}

/// Collect the path of every non-object leaf below `value`.
///
/// Lists count as leaves. An empty object is reported as a leaf itself.
pub fn leaf_paths(value: &Value, at: &FieldPath, out: &mut Vec<FieldPath>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                leaf_paths(child, &at.child(key.clone()), out);
            }
        }
        _ => out.push(at.clone()),
    }
}

/// The caller's desired configuration, shaped like the request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DesiredState {
    body: Map<String, Value>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(body: Map<String, Value>) -> Self {
        Self { body }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Value at `path`, if present.
    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        path.segments()
            .split_first()
            .and_then(|(first, rest)| {
                let start = self.body.get(first)?;
                lookup(start, &FieldPath::from_segments(rest.iter().cloned()))
            })
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.get(path).is_some()
    }

    /// Leaf paths present in the desired state.
    pub fn paths(&self) -> Vec<FieldPath> {
        let mut out = Vec::new();
        for (key, value) in &self.body {
            leaf_paths(value, &FieldPath::root().child(key.clone()), &mut out);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// The request body.
    pub fn to_value(&self) -> Value {
        Value::Object(self.body.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

/// The remote resource as last read from the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ObservedState {
    body: Value,
}

impl ObservedState {
    pub fn new(body: Value) -> Self {
        Self { body }
    }

    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        lookup(&self.body, path)
    }

    pub fn as_value(&self) -> &Value {
        &self.body
    }

    pub fn into_value(self) -> Value {
        self.body
    }

    /// The resource's ETag, when the service returned one.
    pub fn etag(&self) -> Option<&str> {
        self.body.get("etag").and_then(Value::as_str)
    }

    /// Provisioning state reported under `properties.provisioningState`.
    pub fn provisioning_state(&self) -> Option<&str> {
        self.body
            .get("properties")
            .and_then(|p| p.get("provisioningState"))
            .and_then(Value::as_str)
    }
}

impl From<Value> for ObservedState {
    fn from(body: Value) -> Self {
        Self::new(body)
    }
}

/// Outcome of reading a remote resource.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    /// The resource exists.
    Found(ObservedState),
    /// The service reported the resource does not exist.
    NotFound,
    /// The read failed; existence is unknown.
    Failed(RemoteOperationError),
}

impl FetchResult {
    /// Whether the resource is known to exist.
    pub fn exists(&self) -> bool {
        matches!(self, FetchResult::Found(_))
    }

    /// Convert into `Option<ObservedState>`, surfacing failures as errors.
    pub fn into_observed(self) -> Result<Option<ObservedState>, RemoteOperationError> {
        match self {
            FetchResult::Found(observed) => Ok(Some(observed)),
            FetchResult::NotFound => Ok(None),
            FetchResult::Failed(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteErrorKind;
    use serde_json::json;

    fn path(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn test_lookup() {
        let body = json!({"properties": {"sku": {"name": "Standard"}, "list": [1, 2]}});
        assert_eq!(
            lookup(&body, &path("/properties/sku/name")),
            Some(&json!("Standard"))
        );
        assert_eq!(lookup(&body, &path("/properties/missing")), None);
        assert_eq!(lookup(&body, &path("/properties/list/0")), None);
        assert_eq!(lookup(&body, &FieldPath::root()), Some(&body));
    }

    #[test]
    fn test_desired_paths() {
        let desired = DesiredState::from_map(
            json!({
                "location": "eastus",
                "tags": {"env": "prod", "team": "core"},
                "properties": {"scopes": ["a", "b"], "empty": {}}
            })
            .as_object()
            .cloned()
            .unwrap(),
        );
        let paths: Vec<String> = desired.paths().iter().map(ToString::to_string).collect();
        assert_eq!(
            paths,
            vec![
                "/location",
                "/tags/env",
                "/tags/team",
                "/properties/scopes",
                "/properties/empty"
            ]
        );
        assert!(desired.contains(&path("/tags/env")));
        assert!(!desired.contains(&path("/tags/owner")));
        assert!(desired.get(&FieldPath::root()).is_none());
    }

    #[test]
    fn test_observed_accessors() {
        let observed = ObservedState::new(json!({
            "etag": "W/\"abc\"",
            "properties": {"provisioningState": "Succeeded"}
        }));
        assert_eq!(observed.etag(), Some("W/\"abc\""));
        assert_eq!(observed.provisioning_state(), Some("Succeeded"));
    }

    #[test]
    fn test_fetch_result_conversion() {
        assert!(FetchResult::Found(ObservedState::new(json!({}))).exists());
        assert!(!FetchResult::NotFound.exists());
        assert_eq!(FetchResult::NotFound.into_observed().unwrap(), None);

        let failed = FetchResult::Failed(RemoteOperationError::new(
            RemoteErrorKind::Unauthorized,
            "token expired",
        ));
        assert!(!failed.exists());
        assert_eq!(
            failed.into_observed().unwrap_err().kind,
            RemoteErrorKind::Unauthorized
        );
    }
}
