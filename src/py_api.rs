use crate::core::{
    AgentCatalog, AgentId, AgentSpawner, AgentStore, CategoryId, Filter, QuerySource, TopologyConfig,
};
use crate::geometry::{Location, Shape, SpatialRelation};
use crate::topology::{Environment, Topology};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn filter_for(category: Option<u32>) -> Filter {
    category
        .map(|c| Filter::category(CategoryId(c)))
        .unwrap_or_default()
}

/// A rectangular world with its own population, driven from Python.
#[pyclass]
pub struct PyTopology {
    store: AgentStore,
    topology: Topology,
    rng: StdRng,
}

impl PyTopology {
    fn build(width: f64, height: f64, config: &TopologyConfig) -> PyResult<Self> {
        let environment = Environment::rect(width, height)?;
        Ok(Self {
            store: AgentStore::new(),
            topology: Topology::root(environment, config),
            rng: StdRng::seed_from_u64(config.seed),
        })
    }
}

#[pymethods]
impl PyTopology {
    #[new]
    #[pyo3(signature = (width=100.0, height=100.0, torus=false, parallel=false, seed=42))]
    pub fn new(width: f64, height: f64, torus: bool, parallel: bool, seed: u64) -> PyResult<Self> {
        let config = TopologyConfig {
            torus,
            parallel,
            seed,
            ..TopologyConfig::default()
        };
        Self::build(width, height, &config)
    }

    #[staticmethod]
    pub fn from_config(width: f64, height: f64, config: &TopologyConfig) -> PyResult<Self> {
        Self::build(width, height, config)
    }

    #[pyo3(signature = (name, parent=None))]
    pub fn add_category(&mut self, name: &str, parent: Option<u32>) -> u32 {
        self.store.add_category(name, parent.map(CategoryId)).0
    }

    pub fn category_id(&self, name: &str) -> Option<u32> {
        self.store.category_by_name(name).map(|c| c.0)
    }

    /// Create a point agent and index it.
    pub fn add_agent(&mut self, category: u32, x: f64, y: f64) -> u64 {
        let id = self.store.spawn(CategoryId(category), Shape::point(x, y));
        self.topology.insert_agent(id, &self.store);
        id.0
    }

    /// Create a polygon agent from its exterior ring.
    pub fn add_area(&mut self, category: u32, ring: Vec<(f64, f64)>) -> u64 {
        let id = self.store.spawn(CategoryId(category), Shape::polygon(ring));
        self.topology.insert_agent(id, &self.store);
        id.0
    }

    /// Teleport an agent's centroid to (x, y), keeping its outline.
    /// Returns false for unknown agents.
    pub fn move_agent(&mut self, agent: u64, x: f64, y: f64) -> bool {
        let id = AgentId(agent);
        let Some(previous) = self.store.move_agent_to(id, Location::new(x, y)) else {
            return false;
        };
        self.topology.on_agent_moved(Some(&previous), id, &self.store);
        true
    }

    pub fn kill_agent(&mut self, agent: u64) -> bool {
        let id = AgentId(agent);
        self.topology.remove_agent(id, &self.store);
        self.store.kill(id)
    }

    pub fn location_of(&self, agent: u64) -> Option<(f64, f64)> {
        self.store.shape(AgentId(agent)).map(|s| {
            let loc = s.location();
            (loc.x, loc.y)
        })
    }

    /// Outline of an agent: one pair for a point, the closed ring for an area.
    pub fn shape_of(&self, agent: u64) -> Option<Vec<(f64, f64)>> {
        self.store.shape(AgentId(agent)).map(Shape::coords)
    }

    #[pyo3(signature = (x, y, category=None))]
    pub fn nearest(&mut self, x: f64, y: f64, category: Option<u32>) -> Option<u64> {
        let probe = Shape::point(x, y);
        let src = QuerySource::from_shape(&probe);
        self.topology
            .nearest(&src, &filter_for(category), &self.store, &mut self.rng)
            .map(|a| a.0)
    }

    /// Closest other agent to `agent`.
    #[pyo3(signature = (agent, category=None))]
    pub fn nearest_to_agent(&mut self, agent: u64, category: Option<u32>) -> Option<u64> {
        let src = QuerySource::of_agent(AgentId(agent), &self.store)?;
        self.topology
            .nearest(&src, &filter_for(category), &self.store, &mut self.rng)
            .map(|a| a.0)
    }

    #[pyo3(signature = (x, y, k, category=None))]
    pub fn nearest_k(&mut self, x: f64, y: f64, k: usize, category: Option<u32>) -> Vec<u64> {
        let probe = Shape::point(x, y);
        let src = QuerySource::from_shape(&probe);
        self.topology
            .nearest_k(&src, &filter_for(category), k, &self.store, &mut self.rng)
            .into_iter()
            .map(|a| a.0)
            .collect()
    }

    #[pyo3(signature = (x, y, category=None))]
    pub fn farthest(&mut self, x: f64, y: f64, category: Option<u32>) -> Option<u64> {
        let probe = Shape::point(x, y);
        let src = QuerySource::from_shape(&probe);
        self.topology
            .farthest(&src, &filter_for(category), &self.store)
            .map(|a| a.0)
    }

    #[pyo3(signature = (x, y, radius, category=None))]
    pub fn within(&mut self, x: f64, y: f64, radius: f64, category: Option<u32>) -> Vec<u64> {
        let probe = Shape::point(x, y);
        let src = QuerySource::from_shape(&probe);
        self.topology
            .within(&src, radius, &filter_for(category), &self.store, &mut self.rng)
            .into_iter()
            .map(|a| a.0)
            .collect()
    }

    /// Agents in `relation` ("overlap", "inside", "cover", "touch", "cross",
    /// "partially_overlap") with the polygon `ring`.
    #[pyo3(signature = (ring, relation, category=None))]
    pub fn agents_in_relation(
        &mut self,
        ring: Vec<(f64, f64)>,
        relation: &str,
        category: Option<u32>,
    ) -> PyResult<Vec<u64>> {
        let relation = SpatialRelation::parse(relation)
            .ok_or_else(|| PyValueError::new_err(format!("unknown relation '{}'", relation)))?;
        let probe = Shape::polygon(ring);
        let src = QuerySource::from_shape(&probe);
        Ok(self
            .topology
            .agents_in_relation(Some(&src), &filter_for(category), relation, &self.store, &mut self.rng)
            .into_iter()
            .map(|a| a.0)
            .collect())
    }

    #[pyo3(signature = (x, y, null_if_outside=true))]
    pub fn normalize_location(&self, x: f64, y: f64, null_if_outside: bool) -> Option<(f64, f64)> {
        self.topology
            .normalize_location(Location::new(x, y), null_if_outside)
            .map(|p| (p.x, p.y))
    }

    #[pyo3(signature = (x, y, heading, distance, null_if_outside=true))]
    pub fn destination(
        &self,
        x: f64,
        y: f64,
        heading: f64,
        distance: f64,
        null_if_outside: bool,
    ) -> Option<(f64, f64)> {
        self.topology
            .destination(Location::new(x, y), heading, distance, null_if_outside)
            .map(|p| (p.x, p.y))
    }

    pub fn distance_between(&self, a: u64, b: u64) -> Option<f64> {
        let sa = self.store.shape(AgentId(a))?;
        let sb = self.store.shape(AgentId(b))?;
        Some(self.topology.distance_between(sa, sb))
    }

    pub fn direction_to(&self, a: u64, b: u64) -> Option<f64> {
        let sa = self.store.shape(AgentId(a))?;
        let sb = self.store.shape(AgentId(b))?;
        Some(self.topology.direction_in_degrees_to(sa, sb))
    }

    pub fn random_location(&mut self) -> (f64, f64) {
        let p = self.topology.random_location(&mut self.rng);
        (p.x, p.y)
    }

    pub fn is_torus(&self) -> bool {
        self.topology.is_torus()
    }

    pub fn width(&self) -> f64 {
        self.topology.width()
    }

    pub fn height(&self) -> f64 {
        self.topology.height()
    }

    /// Population and index counters.
    pub fn get_stats(&self) -> PyResult<PyObject> {
        Python::with_gil(|py| {
            let dict = PyDict::new_bound(py);
            let root = self.topology.root_handle();
            let root = root.read();
            let indexed: usize = root
                .index()
                .categories()
                .filter_map(|c| root.index().index(c))
                .map(|i| i.len())
                .sum();

            dict.set_item("agents", self.store.len())?;
            dict.set_item("categories", self.store.categories().count())?;
            dict.set_item("indexed_categories", root.index().categories().count())?;
            dict.set_item("indexed_agents", indexed)?;
            dict.set_item("torus", root.is_torus())?;

            Ok(dict.into())
        })
    }
}
