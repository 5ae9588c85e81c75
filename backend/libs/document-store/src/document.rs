//! Documents, field paths and scan filters.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Field map of a document.
pub type Fields = Map<String, Value>;

/// A document as returned by a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Key of the document inside its collection
    pub id: String,

    /// Top-level fields
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a document from a JSON object literal. Non-object values yield an empty field map.
    pub fn from_json(id: impl Into<String>, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(id, fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Resolve a nested field.
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        let mut current = self.fields.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

/// Result of a keyed lookup. Missing documents are reported with `exists = false`.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentLookup {
    pub id: String,
    pub exists: bool,
    pub fields: Fields,
}

impl DocumentLookup {
    pub fn found(document: Document) -> Self {
        Self {
            id: document.id,
            exists: true,
            fields: document.fields,
        }
    }

    pub fn missing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            exists: false,
            fields: Map::new(),
        }
    }
}

/// Path to a (possibly nested) field.
///
/// Segments are kept separately so map keys containing dots stay addressable;
/// `Display` renders the dotted form used in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(StoreError::InvalidPath(segments.join(".")));
        }
        Ok(Self(segments))
    }

    /// Parse a dotted path (`a.b.c`).
    pub fn parse(dotted: &str) -> StoreResult<Self> {
        Self::new(dotted.split('.'))
    }

    /// Single top-level field.
    pub fn field(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// Extend the path by one segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Scan filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field at `path` equals `value`
    Equals(FieldPath, Value),
}

impl Filter {
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::Equals(path, value) => document.get_path(path) == Some(value),
        }
    }
}
