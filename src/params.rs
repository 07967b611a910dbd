//! Typed access to free-form parameter tables.
//!
//! Instrument records may carry extra keys beyond the recognized schema
//! (integration times, range hints, site-specific notes). Those land in a
//! plain [`toml::Value`] table; this module provides typed getters over it
//! with descriptive errors instead of panicking lookups.

use crate::error::{AppResult, ScanError};

/// A read-only view over a free-form TOML table.
#[derive(Debug, Clone, Default)]
pub struct ParamTable(Option<toml::Value>);

impl ParamTable {
    /// Wrap an optional TOML value (typically a table).
    pub fn new(value: Option<toml::Value>) -> Self {
        Self(value)
    }

    /// Whether a key is present at all.
    pub fn contains(&self, key: &str) -> bool {
        self.raw(key).is_some()
    }

    fn raw(&self, key: &str) -> Option<&toml::Value> {
        self.0.as_ref().and_then(|v| v.get(key))
    }

    fn fetch(&self, key: &str) -> AppResult<&toml::Value> {
        self.raw(key)
            .ok_or_else(|| ScanError::MissingParameter(key.to_string()))
    }

    /// Floating-point parameter; integers are widened.
    pub fn get_f64(&self, key: &str) -> AppResult<f64> {
        let value = self.fetch(key)?;
        value
            .as_float()
            .or_else(|| value.as_integer().map(|i| i as f64))
            .ok_or_else(|| ScanError::ParameterType {
                key: key.to_string(),
                expected: "float",
            })
    }

    /// Integer parameter.
    pub fn get_i64(&self, key: &str) -> AppResult<i64> {
        self.fetch(key)?
            .as_integer()
            .ok_or_else(|| ScanError::ParameterType {
                key: key.to_string(),
                expected: "integer",
            })
    }

    /// String parameter.
    pub fn get_str(&self, key: &str) -> AppResult<&str> {
        self.fetch(key)?
            .as_str()
            .ok_or_else(|| ScanError::ParameterType {
                key: key.to_string(),
                expected: "string",
            })
    }

    /// List-of-strings parameter.
    pub fn get_str_list(&self, key: &str) -> AppResult<Vec<String>> {
        let items = self
            .fetch(key)?
            .as_array()
            .ok_or_else(|| ScanError::ParameterType {
                key: key.to_string(),
                expected: "array of strings",
            })?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ScanError::ParameterType {
                        key: key.to_string(),
                        expected: "array of strings",
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ParamTable {
        let value: toml::Value = toml::from_str(
            r#"
            nplc = 1.0
            range = 2
            note = "guard ring floating"
            tags = ["hv", "dark"]
            "#,
        )
        .unwrap();
        ParamTable::new(Some(value))
    }

    #[test]
    fn typed_getters_return_values() {
        let params = table();
        assert_eq!(params.get_f64("nplc").unwrap(), 1.0);
        assert_eq!(params.get_i64("range").unwrap(), 2);
        assert_eq!(params.get_str("note").unwrap(), "guard ring floating");
        assert_eq!(params.get_str_list("tags").unwrap(), vec!["hv", "dark"]);
    }

    #[test]
    fn integers_widen_to_float() {
        assert_eq!(table().get_f64("range").unwrap(), 2.0);
    }

    #[test]
    fn missing_key_is_reported() {
        let err = table().get_f64("absent").unwrap_err();
        assert!(err.to_string().contains("absent"));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let err = table().get_i64("note").unwrap_err();
        assert!(err.to_string().contains("integer"));
    }

    #[test]
    fn empty_table_has_no_keys() {
        let params = ParamTable::default();
        assert!(!params.contains("anything"));
        assert!(params.get_str("anything").is_err());
    }
}
