//! Flat result rows

use crate::error::{GraphError, Result};
use entigraph_model::Value;
use indexmap::IndexMap;

/// One denormalized query row: dotted column path → scalar
///
/// Column order is kept; it decides the order in which values are applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: IndexMap<String, Value>,
}

impl Row {
    /// Create empty row
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    /// Set a column, returning the previous value
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.columns.insert(column.into(), value.into())
    }

    /// Value of a column
    #[inline]
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Any non-null column below `prefix`
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.columns.iter().any(|(column, value)| {
            !value.is_null()
                && column
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    /// Columns in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of columns
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// No columns
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Build from a JSON object
    ///
    /// Nested objects and arrays are flattened into dotted paths, array
    /// positions becoming numeric segments: `{"order": {"items": [{"sku":
    /// "A"}]}}` gives the column `order.items.0.sku`.
    ///
    /// # Errors
    /// Returns [`GraphError::InvalidArgument`] if `json` is not an object.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = json else {
            return Err(GraphError::invalid("row must be a JSON object"));
        };
        let mut row = Self::new();
        for (key, value) in map {
            flatten(&mut row, key.clone(), value);
        }
        Ok(row)
    }
}

fn flatten(row: &mut Row, path: String, json: &serde_json::Value) {
    match json {
        serde_json::Value::Object(map) => {
            for (key, value) in map {
                flatten(row, format!("{path}.{key}"), value);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, value) in items.iter().enumerate() {
                flatten(row, format!("{path}.{i}"), value);
            }
        }
        leaf => {
            if let Some(value) = Value::from_json(leaf) {
                row.insert(path, value);
            }
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Self::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}
