//! Building the desired state from flat arguments.
//!
//! Each provided argument with a disposition is projected onto its location in
//! the request body. Nested options are projected relative to their parent,
//! and list-of-dict arguments are projected element by element.

use crate::error::{Error, Result, SchemaError};
use crate::reconcile::path::{Disposition, FieldPath};
use crate::reconcile::schema::{ArgumentSchema, ArgumentSpec, CaseTransform};
use crate::reconcile::state::DesiredState;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::trace;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_][a-z0-9_]*)\}").expect("placeholder regex is valid"));

/// Values available to resource-id patterns.
#[derive(Debug, Clone, Default)]
pub struct IdContext {
    pub subscription_id: Option<String>,
    pub resource_group: Option<String>,
}

impl IdContext {
    pub fn new(subscription_id: Option<String>, resource_group: Option<String>) -> Self {
        Self {
            subscription_id,
            resource_group,
        }
    }
}

/// Names of the `{placeholder}`s in a template, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Fill a `{placeholder}` template from `lookup`, failing on the first missing value.
pub fn expand_template<F>(template: &str, mut lookup: F) -> std::result::Result<String, String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut missing = None;
    let expanded = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
        lookup(&caps[1]).unwrap_or_else(|| {
            missing.get_or_insert_with(|| caps[1].to_string());
            String::new()
        })
    });
    match missing {
        Some(name) => Err(name),
        None => Ok(expanded.into_owned()),
    }
}

/// Build the desired state for `params` according to `schema`.
///
/// Only arguments with a disposition and a non-null value are included.
/// Malformed dispositions and colliding locations are reported as
/// [`SchemaError`]s; unusable values (for example a resource-id pattern that
/// cannot be filled) as argument errors.
pub fn build_desired_state(
    schema: &ArgumentSchema,
    params: &Map<String, Value>,
    ids: &IdContext,
) -> Result<DesiredState> {
    let mut body = Map::new();
    inflate_into(&mut body, schema, params, ids, true, "")?;
    trace!(fields = body.len(), "built desired state");
    Ok(DesiredState::from_map(body))
}

fn inflate_into(
    target: &mut Map<String, Value>,
    schema: &ArgumentSchema,
    params: &Map<String, Value>,
    ids: &IdContext,
    top_level: bool,
    prefix: &str,
) -> Result<()> {
    for (name, spec) in schema.iter() {
        let value = match params.get(name) {
            Some(value) if !value.is_null() => value,
            _ => continue,
        };

        let disposition = match spec.parsed_disposition(name)? {
            Some(disposition) => disposition,
            None if top_level => continue,
            None => Disposition::own_name(),
        };

        let qualified = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };

        let value = transform_value(spec, value, ids, &qualified)?;
        let value = match &spec.options {
            Some(options) => inflate_nested(options, value, ids, &qualified)?,
            None => value,
        };

        let segments = disposition.resolve(name);
        insert_at(target, &segments, value, &qualified)?;
    }
    Ok(())
}

fn inflate_nested(
    options: &ArgumentSchema,
    value: Value,
    ids: &IdContext,
    qualified: &str,
) -> Result<Value> {
    match value {
        Value::Object(inner) => {
            let mut nested = Map::new();
            inflate_into(&mut nested, options, &inner, ids, false, qualified)?;
            Ok(Value::Object(nested))
        }
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(inner) => {
                    let mut nested = Map::new();
                    let item_name = format!("{qualified}[{index}]");
                    inflate_into(&mut nested, options, &inner, ids, false, &item_name)?;
                    Ok(Value::Object(nested))
                }
                _ => Err(Error::invalid_argument(
                    format!("{qualified}[{index}]"),
                    "expected a dict",
                )),
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        _ => Err(Error::invalid_argument(
            qualified,
            "expected a dict or a list of dicts",
        )),
    }
}

fn insert_at(
    target: &mut Map<String, Value>,
    segments: &[String],
    value: Value,
    argument: &str,
) -> Result<()> {
    let conflict = || SchemaError::PathConflict {
        argument: argument.to_string(),
        path: FieldPath::from_segments(segments.iter().cloned()).to_string(),
    };

    let Some((leaf, parents)) = segments.split_last() else {
        return Err(conflict().into());
    };

    let mut current = target;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry.as_object_mut().ok_or_else(conflict)?;
    }

    if !current.contains_key(leaf) {
        current.insert(leaf.clone(), value);
        return Ok(());
    }

    match (current.get_mut(leaf), value) {
        // Two arguments may share an intermediate object, e.g. a dict argument
        // at `/properties` and a scalar at `/properties/enabled`.
        (Some(Value::Object(existing)), Value::Object(incoming)) => {
            for (key, item) in incoming {
                if existing.contains_key(&key) {
                    return Err(conflict().into());
                }
                existing.insert(key, item);
            }
            Ok(())
        }
        _ => Err(conflict().into()),
    }
}

fn transform_value(
    spec: &ArgumentSpec,
    value: &Value,
    ids: &IdContext,
    argument: &str,
) -> Result<Value> {
    let transforms_items =
        spec.transform.is_some() || spec.pattern.is_some() || spec.value_map.is_some();
    match value {
        Value::String(s) => transform_string(spec, s, ids, argument).map(Value::String),
        Value::Array(items) if transforms_items => items
            .iter()
            .map(|item| match item {
                Value::String(s) => transform_string(spec, s, ids, argument).map(Value::String),
                other => Ok(map_value(spec, other)),
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Ok(map_value(spec, other)),
    }
}

fn map_value(spec: &ArgumentSpec, value: &Value) -> Value {
    let key = match value {
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        _ => return value.clone(),
    };
    spec.value_map
        .as_ref()
        .and_then(|map| map.get(&key))
        .cloned()
        .unwrap_or_else(|| value.clone())
}

fn transform_string(
    spec: &ArgumentSpec,
    value: &str,
    ids: &IdContext,
    argument: &str,
) -> Result<String> {
    if let Some(mapped) = spec.value_map.as_ref().and_then(|map| map.get(value)) {
        return Ok(match mapped {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    }

    let mut result = match spec.transform {
        Some(CaseTransform::Camelize) => snake_to_camel(value, false),
        Some(CaseTransform::Pascalize) => snake_to_camel(value, true),
        Some(CaseTransform::Upper) => value.to_uppercase(),
        Some(CaseTransform::Lower) => value.to_lowercase(),
        None => value.to_string(),
    };

    if let Some(pattern) = &spec.pattern {
        result = normalize_resource_id(&result, pattern, ids)
            .map_err(|message| Error::invalid_argument(argument, message))?;
    }
    Ok(result)
}

/// `snake_case` to `camelCase` (or `PascalCase` when `capitalize_first`).
pub fn snake_to_camel(value: &str, capitalize_first: bool) -> String {
    let mut out = String::with_capacity(value.len());
    let mut upper_next = capitalize_first;
    for c in value.chars() {
        if c == '_' {
            upper_next = !out.is_empty() || capitalize_first;
            continue;
        }
        if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Expand a bare resource name into a full resource id using `pattern`.
///
/// Values that already look like resource ids are returned unchanged. The
/// value may also be given as `resource_group/name` to point at a resource in
/// another group.
pub fn normalize_resource_id(
    value: &str,
    pattern: &str,
    ids: &IdContext,
) -> std::result::Result<String, String> {
    if value.starts_with('/') {
        return Ok(value.to_string());
    }

    let (group, name) = match value.split_once('/') {
        Some((group, name)) => (Some(group.to_string()), name.to_string()),
        None => (ids.resource_group.clone(), value.to_string()),
    };

    expand_template(pattern, |placeholder| match placeholder {
        "subscription_id" => ids.subscription_id.clone(),
        "resource_group" => group.clone(),
        "name" => Some(name.clone()),
        _ => None,
    })
    .map_err(|missing| {
        format!("cannot expand '{value}' into a resource id: no value for '{missing}'")
    })
}
