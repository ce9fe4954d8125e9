//! OpenRustSwarm Topology v3.1.0 - Spatial Core of the Swarm Runtime
//!
//! Maps agents of many categories onto the geometry of their environment and
//! answers proximity queries over them: nearest, k-nearest, farthest, within
//! a radius, and DE-9IM spatial relations. Environments may wrap around
//! (toroidal), in which case every distance honours the periodic seams.
//!
//! Each category gets its own R*-tree, created the first time a query or a
//! registration touches it. Ties between equidistant agents are broken with a
//! caller-supplied seeded random source so runs are reproducible.

pub mod core;
pub mod geometry;
pub mod spatial;
pub mod topology;

#[cfg(feature = "python")]
pub mod py_api;

#[cfg(feature = "python")]
use pyo3::prelude::*;

// Re-export key types for internal use
pub use crate::core::{
    AgentCatalog, AgentId, AgentSpawner, AgentStore, CategoryId, Filter, QuerySource, Result,
    TopologyConfig, TopologyError,
};
pub use geometry::{Envelope, Location, PreparedShape, Shape, SpatialRelation};
pub use spatial::{CompoundSpatialIndex, SpatialIndex};
pub use topology::{Environment, RootTopology, SharedRoot, ToroidalOffsets, Topology};

/// Install a `tracing` subscriber filtered at `level` (default "info").
/// Calling it again is harmless.
pub fn init_tracing(level: Option<&str>) {
    let filter = level.unwrap_or("info");
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .try_init();
}

/// Initialize tracing for the library.
#[cfg(feature = "python")]
#[pyfunction]
#[pyo3(signature = (level=None))]
pub fn setup_logging(level: Option<String>) {
    init_tracing(level.as_deref());
}

/// Python module initialization
#[cfg(feature = "python")]
#[pymodule]
fn openrustswarm_topology(_py: Python, m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Configuration
    m.add_class::<crate::core::TopologyConfig>()?;

    // Topology
    m.add_class::<py_api::PyTopology>()?;

    // Logging
    m.add_function(wrap_pyfunction!(setup_logging, m)?)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_init_is_idempotent() {
        init_tracing(Some("warn"));
        init_tracing(None);
        tracing::info!("[Topology] tracing ready");
    }
}
