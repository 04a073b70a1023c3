//! Per-field comparison policy.
//!
//! Modifiers are derived from the argument schema and keyed by the field's
//! location in the body. List nesting is transparent: a modifier registered at
//! `/properties/rules/priority` applies to the `priority` of every rule.

use crate::error::SchemaError;
use crate::reconcile::path::{Disposition, FieldPath};
use crate::reconcile::schema::{ArgumentSchema, Comparison};
use serde::Serialize;
use std::collections::BTreeMap;

/// Comparison policy for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Modifier {
    pub comparison: Comparison,
    pub updatable: bool,
    pub no_log: bool,
}

impl Default for Modifier {
    fn default() -> Self {
        Self {
            comparison: Comparison::Default,
            updatable: true,
            no_log: false,
        }
    }
}

impl Modifier {
    pub fn ignore() -> Self {
        Self {
            comparison: Comparison::Ignore,
            ..Self::default()
        }
    }

    pub fn with_comparison(comparison: Comparison) -> Self {
        Self {
            comparison,
            ..Self::default()
        }
    }

    fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Modifiers keyed by field path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Modifiers {
    by_path: BTreeMap<FieldPath, Modifier>,
}

impl Modifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: FieldPath, modifier: Modifier) {
        self.by_path.insert(path, modifier);
    }

    /// Builder-style insertion.
    pub fn with(mut self, path: FieldPath, modifier: Modifier) -> Self {
        self.insert(path, modifier);
        self
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &Modifier)> {
        self.by_path.iter()
    }

    /// Effective modifier for `path`.
    ///
    /// An exact entry wins. Otherwise the nearest ancestor's entry applies, so
    /// an ignored or non-updatable dict covers everything below it.
    pub fn for_path(&self, path: &FieldPath) -> Modifier {
        if let Some(modifier) = self.by_path.get(path) {
            return *modifier;
        }
        path.ancestors_and_self()
            .filter_map(|ancestor| self.by_path.get(&ancestor))
            .last()
            .copied()
            .unwrap_or_default()
    }

    /// Whether `path` or one of its ancestors must not be logged.
    pub fn is_no_log(&self, path: &FieldPath) -> bool {
        path.ancestors_and_self()
            .filter_map(|ancestor| self.by_path.get(&ancestor))
            .any(|modifier| modifier.no_log)
    }

    /// Whether `path` or one of its ancestors is ignored.
    pub fn is_ignored(&self, path: &FieldPath) -> bool {
        path.ancestors_and_self()
            .filter_map(|ancestor| self.by_path.get(&ancestor))
            .any(|modifier| modifier.comparison == Comparison::Ignore)
    }
}

/// Derive comparison modifiers from `schema`.
///
/// Read-only fields are ignored; fields with a non-default comparison, that
/// cannot be updated, or that must not be logged get an entry. Top-level
/// arguments without a disposition are not part of the body and get none.
pub fn build_modifiers(schema: &ArgumentSchema) -> Result<Modifiers, SchemaError> {
    let mut modifiers = Modifiers::new();
    collect(schema, &FieldPath::root(), true, &mut modifiers)?;
    Ok(modifiers)
}

fn collect(
    schema: &ArgumentSchema,
    parent: &FieldPath,
    top_level: bool,
    out: &mut Modifiers,
) -> Result<(), SchemaError> {
    for (name, spec) in schema.iter() {
        let disposition = match spec.parsed_disposition(name)? {
            Some(disposition) => disposition,
            None if top_level => continue,
            None => Disposition::own_name(),
        };
        let path = disposition.resolve_under(parent, name);

        let modifier = Modifier {
            comparison: if spec.read_only {
                Comparison::Ignore
            } else {
                spec.comparison
            },
            updatable: spec.updatable,
            no_log: spec.no_log,
        };
        if !modifier.is_default() {
            out.insert(path.clone(), modifier);
        }

        if let Some(options) = &spec.options {
            collect(options, &path, false, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::schema::{ArgType, ArgumentSpec};

    fn path(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    fn schema() -> ArgumentSchema {
        ArgumentSchema::new()
            .with("name", ArgumentSpec::new(ArgType::Str).required())
            .with(
                "location",
                ArgumentSpec::new(ArgType::Str)
                    .disposition("/")
                    .comparison(Comparison::Location)
                    .not_updatable(),
            )
            .with("tags", ArgumentSpec::new(ArgType::Dict).disposition("/"))
            .with(
                "state",
                ArgumentSpec::new(ArgType::Str)
                    .disposition("/properties/*")
                    .comparison(Comparison::Insensitive),
            )
            .with(
                "provisioning_state",
                ArgumentSpec::new(ArgType::Str)
                    .disposition("/properties/provisioningState")
                    .read_only(),
            )
            .with(
                "rules",
                ArgumentSpec::new(ArgType::List)
                    .disposition("/properties/*")
                    .options(ArgumentSchema::new().with(
                        "action",
                        ArgumentSpec::new(ArgType::Str).comparison(Comparison::Insensitive),
                    )),
            )
    }

    #[test]
    fn test_build_modifiers_from_schema() {
        let modifiers = build_modifiers(&schema()).unwrap();
        assert_eq!(modifiers.len(), 4);

        let location = modifiers.for_path(&path("/location"));
        assert_eq!(location.comparison, Comparison::Location);
        assert!(!location.updatable);

        assert_eq!(
            modifiers.for_path(&path("/properties/state")).comparison,
            Comparison::Insensitive
        );
        assert_eq!(
            modifiers.for_path(&path("/properties/provisioningState")).comparison,
            Comparison::Ignore
        );
        assert_eq!(
            modifiers.for_path(&path("/properties/rules/action")).comparison,
            Comparison::Insensitive
        );
        assert_eq!(modifiers.for_path(&path("/tags/env")), Modifier::default());
    }

    #[test]
    fn test_identifying_arguments_have_no_modifiers() {
        let schema = ArgumentSchema::new().with(
            "name",
            ArgumentSpec::new(ArgType::Str).comparison(Comparison::Insensitive),
        );
        assert!(build_modifiers(&schema).unwrap().is_empty());
    }

    #[test]
    fn test_ancestor_modifier_applies_to_children() {
        let modifiers = Modifiers::new()
            .with(path("/properties/status"), Modifier::ignore())
            .with(
                path("/properties/status/code"),
                Modifier::with_comparison(Comparison::Insensitive),
            );

        assert!(modifiers.is_ignored(&path("/properties/status/detail")));
        assert!(modifiers.is_ignored(&path("/properties/status/code")));
        assert_eq!(
            modifiers.for_path(&path("/properties/status/detail")).comparison,
            Comparison::Ignore
        );
        assert_eq!(
            modifiers.for_path(&path("/properties/status/code")).comparison,
            Comparison::Insensitive
        );
        assert!(!modifiers.is_ignored(&path("/properties/other")));
    }

    #[test]
    fn test_malformed_disposition_fails() {
        let schema = ArgumentSchema::new().with(
            "sku",
            ArgumentSpec::new(ArgType::Str).disposition("sku name"),
        );
        assert!(build_modifiers(&schema).is_err());
    }
}
