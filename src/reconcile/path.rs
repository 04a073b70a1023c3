//! Field paths and argument dispositions.
//!
//! A [`FieldPath`] addresses a location inside a nested JSON body, written as a
//! `/`-delimited string such as `/properties/sku/name`. A [`Disposition`] is the
//! schema-side description of where a flat argument lands in the body; it is
//! resolved against the argument's name and its parent's location to yield a
//! concrete [`FieldPath`].

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `/`-delimited location within a nested mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// The root of the body (`/`).
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from already-validated segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a path such as `/properties/sku/name`.
    pub fn parse(path: &str) -> Result<Self, SchemaError> {
        let malformed = |reason: &str| SchemaError::MalformedPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if path == "/" {
            return Ok(Self::root());
        }
        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| malformed("must start with '/'"))?;

        let mut segments = Vec::new();
        for segment in rest.split('/') {
            validate_segment(segment).map_err(malformed)?;
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The last segment, if any.
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// A new path with one more segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// A new path with every segment of `relative` appended.
    pub fn join(&self, relative: &[String]) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(relative.iter().cloned());
        Self { segments }
    }

    /// The enclosing path, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Whether `self` equals `other` or lies below it.
    pub fn starts_with(&self, other: &FieldPath) -> bool {
        self.segments.starts_with(&other.segments)
    }

    /// Every proper ancestor from the root down, followed by the path itself.
    pub fn ancestors_and_self(&self) -> impl Iterator<Item = FieldPath> + '_ {
        (0..=self.segments.len()).map(move |n| FieldPath {
            segments: self.segments[..n].to_vec(),
        })
    }
}

fn validate_segment(segment: &str) -> Result<(), &'static str> {
    if segment.is_empty() {
        return Err("empty segment");
    }
    if segment.chars().any(char::is_whitespace) {
        return Err("segment contains whitespace");
    }
    Ok(())
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

/// One segment of a disposition: a literal key or the argument's own name.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DispositionSegment {
    Literal(String),
    OwnName,
}

/// Where an argument lands in the request body.
///
/// - `/` or `/*` places the argument at the top of its scope under its own name.
/// - `/properties/*` places it under `properties`, keyed by its name.
/// - `/properties/keyUri` renames it on the way in.
/// - `*`, `keyUri`, `properties/keyUri` are relative to the enclosing argument.
///
/// For nested options the leading `/` is accepted but means the same as the
/// relative form: a nested option can only land inside its parent's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    absolute: bool,
    segments: Vec<DispositionSegment>,
}

impl Disposition {
    /// The implicit disposition of a nested option without one (`*`).
    pub fn own_name() -> Self {
        Self {
            absolute: false,
            segments: vec![DispositionSegment::OwnName],
        }
    }

    /// Parse the disposition declared for `argument`.
    pub fn parse(argument: &str, disposition: &str) -> Result<Self, SchemaError> {
        let malformed = |reason: &str| SchemaError::MalformedDisposition {
            argument: argument.to_string(),
            disposition: disposition.to_string(),
            reason: reason.to_string(),
        };

        if disposition.is_empty() {
            return Err(malformed("empty disposition"));
        }
        if disposition == "/" {
            return Ok(Self {
                absolute: true,
                segments: vec![DispositionSegment::OwnName],
            });
        }

        let (absolute, rest) = match disposition.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, disposition),
        };

        let mut segments = Vec::new();
        for segment in rest.split('/') {
            validate_segment(segment).map_err(malformed)?;
            segments.push(match segment {
                "*" => DispositionSegment::OwnName,
                literal if literal.contains('*') => {
                    return Err(malformed("'*' must be a whole segment"));
                }
                literal => DispositionSegment::Literal(literal.to_string()),
            });
        }

        Ok(Self { absolute, segments })
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Concrete segments for an argument called `name`.
    pub fn resolve(&self, name: &str) -> Vec<String> {
        self.segments
            .iter()
            .map(|segment| match segment {
                DispositionSegment::Literal(literal) => literal.clone(),
                DispositionSegment::OwnName => name.to_string(),
            })
            .collect()
    }

    /// Concrete location of `name` below `parent`.
    pub fn resolve_under(&self, parent: &FieldPath, name: &str) -> FieldPath {
        parent.join(&self.resolve(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let path = FieldPath::parse("/properties/sku/name").unwrap();
        assert_eq!(path.segments(), &["properties", "sku", "name"]);
        assert_eq!(path.to_string(), "/properties/sku/name");
        assert_eq!(path.leaf(), Some("name"));

        let root = FieldPath::parse("/").unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "/");
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        assert!(FieldPath::parse("properties/sku").is_err());
        assert!(FieldPath::parse("/properties//sku").is_err());
        assert!(FieldPath::parse("/properties/").is_err());
        assert!(FieldPath::parse("/prop erties").is_err());
        assert!(FieldPath::parse("").is_err());
    }

    #[test]
    fn test_path_relations() {
        let path = FieldPath::parse("/properties/sku/name").unwrap();
        let parent = path.parent().unwrap();
        assert_eq!(parent.to_string(), "/properties/sku");
        assert!(path.starts_with(&parent));
        assert!(!parent.starts_with(&path));
        assert_eq!(parent.child("tier").to_string(), "/properties/sku/tier");

        let chain: Vec<String> = path.ancestors_and_self().map(|p| p.to_string()).collect();
        assert_eq!(
            chain,
            vec!["/", "/properties", "/properties/sku", "/properties/sku/name"]
        );
    }

    #[test]
    fn test_serde_roundtrip_uses_string_form() {
        let path = FieldPath::parse("/tags/env").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/tags/env\"");
        let back: FieldPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<FieldPath>("\"tags\"").is_err());
    }

    #[test]
    fn test_disposition_forms() {
        let root = FieldPath::root();

        let d = Disposition::parse("location", "/").unwrap();
        assert!(d.is_absolute());
        assert_eq!(d.resolve_under(&root, "location").to_string(), "/location");

        let d = Disposition::parse("enabled", "/properties/*").unwrap();
        assert_eq!(
            d.resolve_under(&root, "enabled").to_string(),
            "/properties/enabled"
        );

        let d = Disposition::parse("key_uri", "keyUri").unwrap();
        assert!(!d.is_absolute());
        let parent = FieldPath::parse("/properties/keyVaultProperties").unwrap();
        assert_eq!(
            d.resolve_under(&parent, "key_uri").to_string(),
            "/properties/keyVaultProperties/keyUri"
        );

        assert_eq!(Disposition::own_name().resolve("tier"), vec!["tier"]);
    }

    #[test]
    fn test_disposition_rejects_malformed() {
        for bad in ["", "//", "/properties/", "/prop*", "a//b", "/has space"] {
            let err = Disposition::parse("arg", bad).unwrap_err();
            assert!(
                matches!(err, SchemaError::MalformedDisposition { .. }),
                "expected malformed disposition for {bad:?}"
            );
        }
    }
}
