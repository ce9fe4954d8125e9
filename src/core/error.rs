use thiserror::Error;

/// Failures that mean the model itself is misconfigured. Everything else
/// (no match, stale removal, dead agent) is an ordinary empty result.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("the environment must be a 3D environment (e.g. shape <- cube(100)) for 3D locations")]
    MissingDepth,

    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),

    #[error("invalid topology configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TopologyError>;

#[cfg(feature = "python")]
impl From<TopologyError> for pyo3::PyErr {
    fn from(err: TopologyError) -> Self {
        match err {
            TopologyError::MissingDepth => {
                pyo3::exceptions::PyRuntimeError::new_err(err.to_string())
            }
            _ => pyo3::exceptions::PyValueError::new_err(err.to_string()),
        }
    }
}
