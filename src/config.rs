//! Optional TOML configuration. Every value can be overridden on the command
//! line; anything left unset falls back to the built-in defaults.
//!
//! ```toml
//! [clustering]
//! clusters = 2
//! restarts = 20
//! seed = 1234
//!
//! [normalization]
//! strategy = "zscore"
//! # defaults to true for whiten, false for zscore
//! drop_zero_columns = false
//!
//! [residue_sets]
//! anticodon = [32, 33, 34, 35, 36, 37, 38]
//! ```
use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::normalize::Normalization;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub clustering: ClusteringSection,
    pub normalization: NormalizationSection,
    /// Named lists of 1-based residue numbers.
    pub residue_sets: BTreeMap<String, Vec<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusteringSection {
    pub clusters: Option<usize>,
    pub restarts: Option<usize>,
    pub tolerance: Option<f64>,
    pub max_iterations: Option<usize>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizationSection {
    pub strategy: Option<Normalization>,
    pub drop_zero_columns: Option<bool>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn residue_set(&self, name: &str) -> Result<&[i64]> {
        self.residue_sets
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                let known: Vec<&str> = self.residue_sets.keys().map(String::as_str).collect();
                Error::Selection(format!(
                    "unknown residue set {name:?} (known: {})",
                    known.join(", ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert!(config.clustering.clusters.is_none());
        assert!(config.normalization.strategy.is_none());
        assert!(config.residue_sets.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml_str(
            r#"
            [clustering]
            clusters = 4
            restarts = 5
            tolerance = 1e-6
            seed = 99

            [normalization]
            strategy = "whiten"
            drop_zero_columns = false

            [residue_sets]
            anticodon = [34, 35, 36]
            "#,
        )
        .unwrap();

        assert_eq!(config.clustering.clusters, Some(4));
        assert_eq!(config.clustering.restarts, Some(5));
        assert_eq!(config.clustering.tolerance, Some(1e-6));
        assert_eq!(config.clustering.seed, Some(99));
        assert_eq!(config.normalization.strategy, Some(Normalization::Whiten));
        assert_eq!(config.normalization.drop_zero_columns, Some(false));
        assert_eq!(config.residue_set("anticodon").unwrap(), &[34, 35, 36]);
    }

    #[test]
    fn test_unknown_residue_set() {
        let config = Config::from_toml_str("[residue_sets]\nstem = [1, 2]\n").unwrap();
        let err = config.residue_set("loop").unwrap_err();
        assert!(err.to_string().contains("stem"));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(Config::from_toml_str("[clustering]\nk = 2\n").is_err());
    }
}
