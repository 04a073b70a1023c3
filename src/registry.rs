//! Resource-type registry.
//!
//! Every ARM resource type armctl can manage is described by data: provider
//! namespace, API version, resource-id template and argument schema. The
//! built-in manifest ships with the binary; users add their own manifests in
//! the same YAML format.

use crate::error::{Error, Result, SchemaError};
use crate::reconcile::inflate::{expand_template, placeholders};
use crate::reconcile::ArgumentSchema;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

const BUILTIN_MANIFEST: &str = include_str!("../manifests/builtin.yml");

/// Prefix of module names derived from resource types.
pub const MODULE_PREFIX: &str = "azure_rm_";

/// Placeholder filled from configuration rather than from arguments.
const SUBSCRIPTION_PLACEHOLDER: &str = "subscription_id";

/// Description of one ARM resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceType {
    /// Short name, e.g. `resource_group`
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Provider namespace, e.g. `Microsoft.Storage`
    pub provider: String,

    /// Type within the provider, e.g. `storageAccounts/encryptionScopes`
    pub resource_type: String,

    /// Resource id with `{placeholder}`s for identifying arguments
    pub id_template: String,

    pub api_version: String,

    /// Whether updates may be sent as PATCH with only the changed fields
    #[serde(default)]
    pub supports_patch: bool,

    pub arguments: ArgumentSchema,
}

impl ResourceType {
    /// Name of the module that manages this type.
    pub fn module_name(&self) -> String {
        format!("{MODULE_PREFIX}{}", self.name)
    }

    /// Fully qualified type, e.g. `Microsoft.Storage/storageAccounts/encryptionScopes`.
    pub fn qualified_type(&self) -> String {
        format!("{}/{}", self.provider, self.resource_type)
    }

    /// Check the schema and that every id placeholder names an identifying argument.
    pub fn validate(&self) -> std::result::Result<(), SchemaError> {
        self.arguments.check()?;

        if !self.id_template.starts_with('/') {
            return Err(SchemaError::MalformedPath {
                path: self.id_template.clone(),
                reason: "resource id template must start with '/'".to_string(),
            });
        }

        let identifying = self.arguments.identifying_arguments();
        for placeholder in placeholders(&self.id_template) {
            if placeholder != SUBSCRIPTION_PLACEHOLDER
                && !identifying.contains(&placeholder.as_str())
            {
                return Err(SchemaError::UnknownPlaceholder {
                    resource_type: self.name.clone(),
                    placeholder,
                });
            }
        }
        Ok(())
    }

    /// Fill the id template from the identifying arguments.
    ///
    /// `{subscription_id}` comes from `params` when given there, otherwise from
    /// `subscription_id`.
    pub fn resource_id(
        &self,
        params: &Map<String, Value>,
        subscription_id: Option<&str>,
    ) -> Result<String> {
        for placeholder in placeholders(&self.id_template) {
            let value = match params.get(&placeholder).and_then(scalar_to_string) {
                Some(value) => Some(value),
                None if placeholder == SUBSCRIPTION_PLACEHOLDER => {
                    subscription_id.map(str::to_string)
                }
                None => None,
            };
            if let Some(value) = value {
                check_id_segment(&placeholder, &value)?;
            }
        }

        expand_template(&self.id_template, |placeholder| {
            let provided = params.get(placeholder).and_then(scalar_to_string);
            match (placeholder, provided) {
                (_, Some(value)) => Some(value),
                (SUBSCRIPTION_PLACEHOLDER, None) => subscription_id.map(str::to_string),
                _ => None,
            }
        })
        .map_err(Error::MissingArgument)
    }
}

/// Identifying values must stay within one segment of the resource id.
fn check_id_segment(argument: &str, value: &str) -> Result<()> {
    if value == "." || value == ".." {
        return Err(Error::invalid_argument(
            argument,
            format!("'{}' is not a valid resource name", value),
        ));
    }
    if let Some(c) = value.chars().find(|c| matches!(c, '/' | '\\' | '?' | '#')) {
        return Err(Error::invalid_argument(
            argument,
            format!("'{}' must not contain '{}'", value, c),
        ));
    }
    Ok(())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// On-disk manifest format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub resource_types: Vec<ResourceType>,
}

/// Registered resource types, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    types: IndexMap<String, ResourceType>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The resource types shipped with armctl.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_MANIFEST, Path::new("<builtin>"))
    }

    /// Load a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&content, path)
    }

    /// Parse manifest YAML; `origin` is only used in error messages.
    pub fn from_yaml(content: &str, origin: &Path) -> Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| Error::Manifest {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut registry = Self::new();
        for resource_type in manifest.resource_types {
            registry.register(resource_type).map_err(|e| Error::Manifest {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;
        }
        Ok(registry)
    }

    /// Add a resource type, replacing any previous one of the same name.
    pub fn register(&mut self, resource_type: ResourceType) -> Result<()> {
        resource_type.validate()?;
        if self.types.contains_key(&resource_type.name) {
            debug!("Replacing resource type '{}'", resource_type.name);
        }
        self.types.insert(resource_type.name.clone(), resource_type);
        Ok(())
    }

    /// Add every type from `other`; later definitions win.
    pub fn merge(&mut self, other: Registry) {
        for (name, resource_type) in other.types {
            if self.types.contains_key(&name) {
                debug!("Manifest overrides resource type '{}'", name);
            }
            self.types.insert(name, resource_type);
        }
    }

    /// Look up a type by name or by module name (`azure_rm_<name>`).
    pub fn get(&self, name: &str) -> Result<&ResourceType> {
        let key = name.strip_prefix(MODULE_PREFIX).unwrap_or(name);
        self.types
            .get(key)
            .ok_or_else(|| Error::UnknownResourceType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    pub fn names(&self) -> Vec<&str> {
        self.types.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceType> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
