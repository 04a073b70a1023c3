//! Argument schemas.
//!
//! An [`ArgumentSchema`] is the per-resource-type description of the flat
//! arguments a user may provide: their types, allowed values, where they land
//! in the request body (the disposition) and how they are compared against the
//! remote resource. Schemas are usually deserialized from a resource-type
//! manifest.

use crate::error::{Error, Result, SchemaError};
use crate::reconcile::path::Disposition;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Declared type of an argument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    #[default]
    #[serde(alias = "string")]
    Str,
    #[serde(alias = "integer")]
    Int,
    Float,
    #[serde(alias = "boolean")]
    Bool,
    Dict,
    List,
    /// Any JSON value, passed through unchecked.
    Raw,
}

impl ArgType {
    /// Whether `value` is acceptable for this type.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ArgType::Str => value.is_string(),
            ArgType::Int => value.is_i64() || value.is_u64(),
            ArgType::Float => value.is_number(),
            ArgType::Bool => value.is_boolean(),
            ArgType::Dict => value.is_object(),
            ArgType::List => value.is_array(),
            ArgType::Raw => true,
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgType::Str => "str",
            ArgType::Int => "int",
            ArgType::Float => "float",
            ArgType::Bool => "bool",
            ArgType::Dict => "dict",
            ArgType::List => "list",
            ArgType::Raw => "raw",
        };
        write!(f, "{name}")
    }
}

/// How a field is compared against the remote resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// Exact comparison (case-sensitive for strings).
    #[default]
    Default,
    /// Case-sensitive string comparison.
    Sensitive,
    /// Case-insensitive string comparison.
    Insensitive,
    /// Region names: case- and whitespace-insensitive (`East US` == `eastus`).
    Location,
    /// Never compared.
    Ignore,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Comparison::Default => "default",
            Comparison::Sensitive => "sensitive",
            Comparison::Insensitive => "insensitive",
            Comparison::Location => "location",
            Comparison::Ignore => "ignore",
        };
        write!(f, "{name}")
    }
}

/// A string case transform applied while building the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseTransform {
    /// `snake_case` to `camelCase`
    Camelize,
    /// `snake_case` to `PascalCase`
    Pascalize,
    Upper,
    Lower,
}

/// Specification of a single argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArgumentSpec {
    /// Declared type
    #[serde(rename = "type")]
    pub arg_type: ArgType,

    /// Element type for lists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elements: Option<ArgType>,

    /// Whether the argument must be provided
    pub required: bool,

    /// Allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Value>>,

    /// Location in the request body; top-level arguments without one are
    /// identifying (path) parameters and never part of the body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,

    /// Comparison policy against the remote resource
    pub comparison: Comparison,

    /// Whether the remote API accepts changes to this field after creation
    pub updatable: bool,

    /// Server-generated field, never compared
    pub read_only: bool,

    /// Value must not appear in output
    pub no_log: bool,

    /// Case transform applied to string values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<CaseTransform>,

    /// Maps user-facing choice values onto wire values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_map: Option<IndexMap<String, Value>>,

    /// Resource-id template used to expand bare names into full ids, with
    /// `{subscription_id}`, `{resource_group}` and `{name}` placeholders
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Nested options for dict arguments or list-of-dict arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ArgumentSchema>,

    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Default for ArgumentSpec {
    fn default() -> Self {
        Self {
            arg_type: ArgType::Str,
            elements: None,
            required: false,
            choices: None,
            disposition: None,
            comparison: Comparison::Default,
            updatable: true,
            read_only: false,
            no_log: false,
            transform: None,
            value_map: None,
            pattern: None,
            options: None,
            description: None,
        }
    }
}

impl ArgumentSpec {
    pub fn new(arg_type: ArgType) -> Self {
        Self {
            arg_type,
            ..Self::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn disposition(mut self, disposition: impl Into<String>) -> Self {
        self.disposition = Some(disposition.into());
        self
    }

    pub fn comparison(mut self, comparison: Comparison) -> Self {
        self.comparison = comparison;
        self
    }

    pub fn not_updatable(mut self) -> Self {
        self.updatable = false;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn choices<I: IntoIterator<Item = Value>>(mut self, choices: I) -> Self {
        self.choices = Some(choices.into_iter().collect());
        self
    }

    pub fn elements(mut self, elements: ArgType) -> Self {
        self.elements = Some(elements);
        self
    }

    pub fn options(mut self, options: ArgumentSchema) -> Self {
        self.options = Some(options);
        self
    }

    pub fn transform(mut self, transform: CaseTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Parsed disposition, or `None` when the argument declares none.
    pub fn parsed_disposition(
        &self,
        name: &str,
    ) -> std::result::Result<Option<Disposition>, SchemaError> {
        self.disposition
            .as_deref()
            .map(|d| Disposition::parse(name, d))
            .transpose()
    }
}

/// Ordered mapping of argument name to specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArgumentSchema {
    arguments: IndexMap<String, ArgumentSpec>,
}

impl ArgumentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, name: impl Into<String>, spec: ArgumentSpec) -> Self {
        self.arguments.insert(name.into(), spec);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: ArgumentSpec) {
        self.arguments.insert(name.into(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&ArgumentSpec> {
        self.arguments.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.arguments.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArgumentSpec)> {
        self.arguments.iter()
    }

    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// Names of the required top-level arguments.
    pub fn required_arguments(&self) -> Vec<&str> {
        self.arguments
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Top-level arguments without a disposition (resource-identifying).
    pub fn identifying_arguments(&self) -> Vec<&str> {
        self.arguments
            .iter()
            .filter(|(_, spec)| spec.disposition.is_none())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Copy of the schema in which only identifying arguments are required.
    /// Deleting a resource needs its id, not its body.
    pub fn identifying_requirements_only(&self) -> ArgumentSchema {
        let mut relaxed = self.clone();
        for spec in relaxed.arguments.values_mut() {
            if spec.disposition.is_some() {
                spec.required = false;
            }
        }
        relaxed
    }

    /// Check the schema metadata itself: dispositions parse, nested options
    /// only appear on dicts and lists, and value transforms are usable.
    pub fn check(&self) -> std::result::Result<(), SchemaError> {
        for (name, spec) in &self.arguments {
            spec.parsed_disposition(name)?;

            if spec.options.is_some() && !matches!(spec.arg_type, ArgType::Dict | ArgType::List) {
                return Err(SchemaError::OptionsOnScalar {
                    argument: name.clone(),
                    arg_type: spec.arg_type.to_string(),
                });
            }

            let string_valued = spec.arg_type == ArgType::Str
                || (spec.arg_type == ArgType::List && spec.elements == Some(ArgType::Str));
            if (spec.transform.is_some() || spec.pattern.is_some()) && !string_valued {
                return Err(SchemaError::InvalidTransform {
                    argument: name.clone(),
                    reason: "transforms apply to str or list of str arguments only".to_string(),
                });
            }
            if let Some(pattern) = &spec.pattern {
                if !pattern.starts_with('/') {
                    return Err(SchemaError::InvalidTransform {
                        argument: name.clone(),
                        reason: format!("resource id pattern '{pattern}' must start with '/'"),
                    });
                }
            }

            if let Some(options) = &spec.options {
                options.check()?;
            }
        }
        Ok(())
    }

    /// Validate provided arguments against this schema.
    ///
    /// Null values count as not provided. Arguments named in `reserved` are
    /// accepted without being part of the schema.
    pub fn validate(&self, params: &Map<String, Value>, reserved: &[&str]) -> Result<()> {
        self.validate_at(params, reserved, "")
    }

    fn validate_at(
        &self,
        params: &Map<String, Value>,
        reserved: &[&str],
        prefix: &str,
    ) -> Result<()> {
        for key in params.keys() {
            if !self.arguments.contains_key(key) && !reserved.contains(&key.as_str()) {
                return Err(Error::invalid_argument(
                    qualified(prefix, key),
                    "unsupported argument",
                ));
            }
        }

        for (name, spec) in &self.arguments {
            let qualified_name = qualified(prefix, name);
            let value = match params.get(name) {
                Some(value) if !value.is_null() => value,
                _ => {
                    if spec.required {
                        return Err(Error::MissingArgument(qualified_name));
                    }
                    continue;
                }
            };

            if !spec.arg_type.accepts(value) {
                return Err(Error::invalid_argument(
                    qualified_name,
                    format!("expected a value of type {}", spec.arg_type),
                ));
            }

            if let Some(choices) = &spec.choices {
                let candidates: Vec<&Value> = match value {
                    Value::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                for candidate in candidates {
                    if !choices.contains(candidate) {
                        return Err(Error::invalid_argument(
                            qualified_name,
                            format!(
                                "value {candidate} is not one of {}",
                                Value::Array(choices.clone())
                            ),
                        ));
                    }
                }
            }

            if let (Value::Array(items), Some(elements)) = (value, spec.elements) {
                if let Some(bad) = items.iter().find(|item| !elements.accepts(item)) {
                    return Err(Error::invalid_argument(
                        qualified_name,
                        format!("list element {bad} is not of type {elements}"),
                    ));
                }
            }

            if let Some(options) = &spec.options {
                match value {
                    Value::Object(inner) => options.validate_at(inner, &[], &qualified_name)?,
                    Value::Array(items) => {
                        for (index, item) in items.iter().enumerate() {
                            let item_name = format!("{qualified_name}[{index}]");
                            let inner = item.as_object().ok_or_else(|| {
                                Error::invalid_argument(&item_name, "expected a dict")
                            })?;
                            options.validate_at(inner, &[], &item_name)?;
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

fn qualified(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
