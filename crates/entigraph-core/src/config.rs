//! Mapper configuration

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};

/// Unit-of-work configuration
///
/// Reserved column names are matched against the last segment of a row
/// column, e.g. `order.items.$index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Reserved column carrying a list index
    pub index_column: String,
    /// Reserved column carrying a map key
    pub key_column: String,
    /// Reserved column carrying a narrowing type name
    pub type_column: String,
    /// Suffix marking an append to an open-document scalar list
    pub append_marker: String,
    /// Bound on natural-key nesting through entity references
    pub max_key_depth: usize,
    /// Evict and re-register natural keys found stale on lookup
    pub repair_stale_keys: bool,
}

impl MapperConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With natural-key nesting bound
    #[inline]
    #[must_use]
    pub fn with_max_key_depth(mut self, depth: usize) -> Self {
        self.max_key_depth = depth;
        self
    }

    /// With stale natural-key repair switched on or off
    #[inline]
    #[must_use]
    pub fn with_repair_stale_keys(mut self, repair: bool) -> Self {
        self.repair_stale_keys = repair;
        self
    }

    /// With custom reserved column names
    #[must_use]
    pub fn with_reserved_columns(
        mut self,
        index: impl Into<String>,
        key: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        self.index_column = index.into();
        self.key_column = key.into();
        self.type_column = type_name.into();
        self
    }

    /// Parse from TOML text, missing fields take their defaults
    ///
    /// # Errors
    /// Returns [`GraphError::Config`] on malformed TOML or invalid values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| GraphError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check reserved names are non-empty and distinct
    ///
    /// # Errors
    /// Returns [`GraphError::Config`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        let reserved = [
            ("index_column", &self.index_column),
            ("key_column", &self.key_column),
            ("type_column", &self.type_column),
            ("append_marker", &self.append_marker),
        ];
        for (name, value) in reserved {
            if value.trim().is_empty() {
                return Err(GraphError::Config(format!("{name} must not be empty")));
            }
            if value.contains('.') {
                return Err(GraphError::Config(format!("{name} must not contain '.'")));
            }
        }
        for (i, (a, va)) in reserved.iter().enumerate() {
            for (b, vb) in &reserved[i + 1..] {
                if va == vb {
                    return Err(GraphError::Config(format!("{a} and {b} are both '{va}'")));
                }
            }
        }
        if self.max_key_depth == 0 {
            return Err(GraphError::Config("max_key_depth must be at least 1".into()));
        }
        Ok(())
    }

    /// Whether a column segment is one of the reserved names
    #[must_use]
    pub fn is_reserved(&self, segment: &str) -> bool {
        segment == self.index_column || segment == self.key_column || segment == self.type_column
    }
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            index_column: "$index".into(),
            key_column: "$key".into(),
            type_column: "$type".into(),
            append_marker: "[]".into(),
            max_key_depth: 32,
            repair_stale_keys: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(MapperConfig::default().validate().is_ok());
        assert!(MapperConfig::default().is_reserved("$type"));
        assert!(!MapperConfig::default().is_reserved("type"));
    }

    #[test]
    fn toml_overrides_and_defaults() {
        let config = MapperConfig::from_toml_str(
            r#"
            index_column = "_idx"
            repair_stale_keys = false
            "#,
        )
        .unwrap();
        assert_eq!(config.index_column, "_idx");
        assert_eq!(config.key_column, "$key");
        assert!(!config.repair_stale_keys);
    }

    #[test]
    fn rejects_colliding_columns() {
        let config = MapperConfig::new().with_reserved_columns("$x", "$x", "$type");
        assert!(matches!(config.validate(), Err(GraphError::Config(_))));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            MapperConfig::from_toml_str("index_column = "),
            Err(GraphError::Config(_))
        ));
    }

    #[test]
    fn rejects_zero_depth() {
        let config = MapperConfig::new().with_max_key_depth(0);
        assert!(config.validate().is_err());
    }
}
