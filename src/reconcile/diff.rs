//! Desired-versus-observed comparison.
//!
//! Only fields present in the desired state are compared; anything the server
//! reports beyond that is left alone. A desired field missing remotely is
//! always a difference.

use crate::reconcile::modifiers::Modifiers;
use crate::reconcile::path::FieldPath;
use crate::reconcile::schema::Comparison;
use crate::reconcile::state::{DesiredState, ObservedState};
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Placeholder shown instead of `no_log` values.
pub const REDACTED: &str = "VALUE_SPECIFIED_IN_NO_LOG_PARAMETER";

/// One differing field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    /// Where the difference was found
    pub path: FieldPath,
    /// Outermost location that must be resent to apply the change; differs
    /// from `path` only inside lists, which are replaced as a whole
    #[serde(skip)]
    pub container: FieldPath,
    /// Desired value at `path`
    pub desired: Value,
    /// Observed value at `path`, `None` when absent remotely
    pub observed: Option<Value>,
    /// Comparison that was applied
    pub comparison: Comparison,
}

/// Result of comparing desired and observed state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    /// Differences that require an update
    pub changes: Vec<FieldChange>,
    /// Differences on fields that cannot be updated; reported, not applied
    pub warnings: Vec<FieldChange>,
}

impl ChangeSet {
    /// Whether any updatable field differs.
    pub fn requires_update(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Paths of the differing updatable fields.
    pub fn paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.changes.iter().map(|change| &change.path)
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.paths().any(|p| p == path)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// A body holding only the changed parts of `desired`, for PATCH-style
    /// updates. Lists are sent whole.
    pub fn patch_body(&self, desired: &DesiredState) -> Value {
        let mut body = Map::new();
        for change in &self.changes {
            if let Some(value) = desired.get(&change.container) {
                set_path(&mut body, change.container.segments(), value.clone());
            }
        }
        Value::Object(body)
    }

    /// Copy with `no_log` values replaced by [`REDACTED`].
    pub fn redacted(&self, modifiers: &Modifiers) -> ChangeSet {
        let redact = |changes: &[FieldChange]| {
            changes
                .iter()
                .map(|change| {
                    let hidden = modifiers.is_no_log(&without_positions(&change.path))
                        || modifiers.is_no_log(&without_positions(&change.container));
                    if hidden {
                        FieldChange {
                            desired: Value::String(REDACTED.to_string()),
                            observed: change
                                .observed
                                .as_ref()
                                .map(|_| Value::String(REDACTED.to_string())),
                            ..change.clone()
                        }
                    } else {
                        let schema_path = without_positions(&change.path);
                        FieldChange {
                            desired: redact_below(&change.desired, &schema_path, modifiers),
                            observed: change
                                .observed
                                .as_ref()
                                .map(|o| redact_below(o, &schema_path, modifiers)),
                            ..change.clone()
                        }
                    }
                })
                .collect()
        };
        ChangeSet {
            changes: redact(&self.changes),
            warnings: redact(&self.warnings),
        }
    }
}

/// `path` with list positions dropped, the form modifiers are keyed by.
fn without_positions(path: &FieldPath) -> FieldPath {
    FieldPath::from_segments(
        path.segments()
            .iter()
            .filter(|segment| segment.parse::<usize>().is_err()),
    )
}

/// Copy of a whole body with every `no_log` field replaced by [`REDACTED`].
pub fn redact_value(value: &Value, modifiers: &Modifiers) -> Value {
    redact_below(value, &FieldPath::root(), modifiers)
}

fn redact_below(value: &Value, schema_path: &FieldPath, modifiers: &Modifiers) -> Value {
    if !schema_path.is_root() && modifiers.is_no_log(schema_path) {
        return Value::String(REDACTED.to_string());
    }
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| {
                    let child = schema_path.child(key.clone());
                    (key.clone(), redact_below(v, &child, modifiers))
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_below(item, schema_path, modifiers))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn set_path(target: &mut Map<String, Value>, segments: &[String], value: Value) {
    match segments {
        [] => {}
        [leaf] => {
            target.insert(leaf.clone(), value);
        }
        [head, rest @ ..] => {
            let entry = target
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                set_path(inner, rest, value);
            }
        }
    }
}

/// Compare `desired` against `observed` under `modifiers`.
pub fn diff(desired: &DesiredState, observed: &ObservedState, modifiers: &Modifiers) -> ChangeSet {
    let mut differ = Differ {
        modifiers,
        result: ChangeSet::default(),
    };

    let root = FieldPath::root();
    for (key, value) in desired.as_map() {
        let path = root.child(key.clone());
        let observed_value = observed.get(&path);
        differ.compare(value, observed_value, &path, &path, None);
    }

    debug!(
        changes = differ.result.changes.len(),
        warnings = differ.result.warnings.len(),
        "compared desired state against remote"
    );
    differ.result
}

struct Differ<'a> {
    modifiers: &'a Modifiers,
    result: ChangeSet,
}

impl Differ<'_> {
    /// `schema_path` ignores list positions and is used for modifier lookup;
    /// `path` is the concrete location reported back. `list_root` is the
    /// outermost enclosing list, if any.
    fn compare(
        &mut self,
        desired: &Value,
        observed: Option<&Value>,
        schema_path: &FieldPath,
        path: &FieldPath,
        list_root: Option<&FieldPath>,
    ) {
        if self.modifiers.is_ignored(schema_path) {
            return;
        }

        match desired {
            Value::Object(desired_map) => match observed {
                Some(Value::Object(observed_map)) => {
                    for (key, value) in desired_map {
                        self.compare(
                            value,
                            observed_map.get(key),
                            &schema_path.child(key.clone()),
                            &path.child(key.clone()),
                            list_root,
                        );
                    }
                }
                _ => self.record(desired, observed, schema_path, path, list_root),
            },
            Value::Array(desired_items) => {
                let observed_items = match observed {
                    Some(Value::Array(items)) if items.len() == desired_items.len() => items,
                    _ => {
                        self.record(desired, observed, schema_path, path, list_root);
                        return;
                    }
                };
                let root = list_root.unwrap_or(path).clone();
                self.compare_lists(desired_items, observed_items, schema_path, path, &root);
            }
            _ => {
                let modifier = self.modifiers.for_path(schema_path);
                let equal = observed
                    .map(|o| scalars_equal(desired, o, modifier.comparison))
                    .unwrap_or(false);
                if !equal {
                    self.record(desired, observed, schema_path, path, list_root);
                }
            }
        }
    }

    fn compare_lists(
        &mut self,
        desired: &[Value],
        observed: &[Value],
        schema_path: &FieldPath,
        path: &FieldPath,
        list_root: &FieldPath,
    ) {
        if desired.iter().all(Value::is_object) && observed.iter().all(Value::is_object) {
            let key = match_key(desired, observed);
            let key_comparison = key
                .as_ref()
                .map(|key| self.modifiers.for_path(&schema_path.child(key.clone())).comparison)
                .map(|comparison| match comparison {
                    Comparison::Ignore => Comparison::Default,
                    other => other,
                });
            let mut claimed = vec![false; observed.len()];
            for (index, item) in desired.iter().enumerate() {
                let item_path = path.child(index.to_string());
                let slot = match (&key, key_comparison) {
                    (Some(key), Some(comparison)) => item.get(key).and_then(|wanted| {
                        (0..observed.len()).find(|&i| {
                            !claimed[i]
                                && observed[i]
                                    .get(key)
                                    .is_some_and(|have| scalars_equal(wanted, have, comparison))
                        })
                    }),
                    _ => Some(index),
                };
                let counterpart = slot.map(|i| {
                    claimed[i] = true;
                    &observed[i]
                });
                self.compare(item, counterpart, schema_path, &item_path, Some(list_root));
            }
            return;
        }

        let comparison = self.modifiers.for_path(schema_path).comparison;
        let mut desired_sorted: Vec<&Value> = desired.iter().collect();
        let mut observed_sorted: Vec<&Value> = observed.iter().collect();
        desired_sorted.sort_by(|a, b| sort_key(a, comparison).cmp(&sort_key(b, comparison)));
        observed_sorted.sort_by(|a, b| sort_key(a, comparison).cmp(&sort_key(b, comparison)));

        let equal = desired_sorted
            .iter()
            .zip(observed_sorted.iter())
            .all(|(d, o)| values_equal(d, o, comparison));
        if !equal {
            let observed_list = Value::Array(observed.to_vec());
            self.record(
                &Value::Array(desired.to_vec()),
                Some(&observed_list),
                schema_path,
                path,
                Some(list_root),
            );
        }
    }

    fn record(
        &mut self,
        desired: &Value,
        observed: Option<&Value>,
        schema_path: &FieldPath,
        path: &FieldPath,
        list_root: Option<&FieldPath>,
    ) {
        let modifier = self.modifiers.for_path(schema_path);
        let change = FieldChange {
            path: path.clone(),
            container: list_root.unwrap_or(path).clone(),
            desired: desired.clone(),
            observed: observed.cloned(),
            comparison: modifier.comparison,
        };

        if modifier.updatable {
            debug!(path = %change.path, "field differs");
            self.result.changes.push(change);
        } else {
            warn!(
                path = %change.path,
                "property cannot be updated, ignoring difference"
            );
            self.result.warnings.push(change);
        }
    }
}

/// Key used to pair up list elements: `id`, then `name`, then the first key
/// of the first observed element, provided every element on both sides has it.
fn match_key(desired: &[Value], observed: &[Value]) -> Option<String> {
    let has_everywhere = |key: &str| {
        desired
            .iter()
            .chain(observed.iter())
            .all(|item| item.get(key).is_some())
    };
    ["id", "name"]
        .into_iter()
        .map(str::to_string)
        .chain(
            observed
                .first()
                .and_then(Value::as_object)
                .and_then(|m| m.keys().next().cloned()),
        )
        .find(|key| has_everywhere(key))
}

fn sort_key(value: &Value, comparison: Comparison) -> String {
    match value {
        Value::String(s) => normalize(s, comparison),
        other => other.to_string(),
    }
}

fn normalize(value: &str, comparison: Comparison) -> String {
    match comparison {
        Comparison::Insensitive => value.to_lowercase(),
        Comparison::Location => value
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase(),
        _ => value.to_string(),
    }
}

fn values_equal(desired: &Value, observed: &Value, comparison: Comparison) -> bool {
    match (desired, observed) {
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            desired == observed
        }
        _ => scalars_equal(desired, observed, comparison),
    }
}

/// Scalar equality under `comparison`.
///
/// Numbers compare numerically; a string on one side and a number or bool on
/// the other compare by their string forms, since services sometimes echo
/// numbers back as strings.
pub fn scalars_equal(desired: &Value, observed: &Value, comparison: Comparison) -> bool {
    if comparison == Comparison::Ignore {
        return true;
    }
    match (desired, observed) {
        (Value::String(d), Value::String(o)) => {
            normalize(d, comparison) == normalize(o, comparison)
        }
        (Value::Number(d), Value::Number(o)) => match (d.as_i64(), o.as_i64()) {
            (Some(d), Some(o)) => d == o,
            _ => d
                .as_f64()
                .zip(o.as_f64())
                .map_or(false, |(d, o)| d.partial_cmp(&o) == Some(Ordering::Equal)),
        },
        (Value::String(s), other @ (Value::Number(_) | Value::Bool(_)))
        | (other @ (Value::Number(_) | Value::Bool(_)), Value::String(s)) => {
            normalize(s, comparison) == normalize(&other.to_string(), comparison)
        }
        _ => desired == observed,
    }
}
