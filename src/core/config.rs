#[cfg(feature = "python")]
use pyo3::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::Result;

/// Settings of a root topology and the compound index it owns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "python", pyclass)]
#[serde(default)]
pub struct TopologyConfig {
    /// Environment edges wrap around.
    #[cfg_attr(feature = "python", pyo3(get, set))]
    pub torus: bool,
    /// Forwarded to per-category indexes; lets them refine candidates on rayon.
    #[cfg_attr(feature = "python", pyo3(get, set))]
    pub parallel: bool,
    /// Minimum candidate count before a parallel index actually goes parallel.
    #[cfg_attr(feature = "python", pyo3(get, set))]
    pub parallel_threshold: usize,
    /// Skip inserts for categories no query has touched yet; the index is
    /// filled with the whole population on first touch instead.
    #[cfg_attr(feature = "python", pyo3(get, set))]
    pub lazy_registration: bool,
    /// Seed of the simulation random source used for tie-breaking.
    #[cfg_attr(feature = "python", pyo3(get, set))]
    pub seed: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        TopologyConfig {
            torus: false,
            parallel: false,
            parallel_threshold: 1024,
            lazy_registration: false,
            seed: 42,
        }
    }
}

impl TopologyConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(feature = "python")]
#[pymethods]
impl TopologyConfig {
    #[new]
    #[pyo3(signature = (torus = false, parallel = false, lazy_registration = false, seed = 42))]
    pub fn py_new(torus: bool, parallel: bool, lazy_registration: bool, seed: u64) -> Self {
        TopologyConfig {
            torus,
            parallel,
            lazy_registration,
            seed,
            ..Self::default()
        }
    }

    #[staticmethod]
    #[pyo3(name = "from_json")]
    pub fn py_from_json(json: &str) -> PyResult<Self> {
        Ok(Self::from_json(json)?)
    }

    #[pyo3(name = "to_json")]
    pub fn py_to_json(&self) -> String {
        self.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::TopologyError;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = TopologyConfig::from_json(r#"{"torus": true, "seed": 7}"#).unwrap();
        assert!(cfg.torus);
        assert_eq!(cfg.seed, 7);
        assert!(!cfg.parallel);
        assert_eq!(cfg.parallel_threshold, 1024);
    }

    #[test]
    fn json_round_trip() {
        let cfg = TopologyConfig {
            parallel: true,
            ..TopologyConfig::default()
        };
        assert_eq!(TopologyConfig::from_json(&cfg.to_json()).unwrap(), cfg);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = TopologyConfig::from_json("{torus:").unwrap_err();
        assert!(matches!(err, TopologyError::Config(_)));
    }
}
