//! Topology
//!
//! The agent-facing query surface of one environment. A topology owns its
//! environment shape and delegates every index operation to a root topology,
//! which owns the compound index and decides whether space wraps around.
//! Sub-population topologies share their root through a [`SharedRoot`].
//!
//! Non-periodic queries go straight to the compound index. Periodic queries
//! replicate the source into its 9 images, take candidates from the index
//! without any radius stepping, and measure each candidate by the minimum
//! distance between the two image sets.

pub mod torus;

pub use torus::{images_distance, ToroidalOffsets};

use crate::core::{
    AgentCatalog, AgentId, AgentSpawner, CategoryId, Filter, QuerySource, Result, TopologyConfig,
    TopologyError,
};
use crate::geometry::{Envelope, Location, PreparedShape, Shape, SpatialRelation};
use crate::spatial::CompoundSpatialIndex;
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

// Attempts at drawing a random point inside a non-rectangular environment.
const RANDOM_LOCATION_ATTEMPTS: usize = 1000;

/// The space agents live in.
#[derive(Clone, Debug, PartialEq)]
pub struct Environment {
    shape: Shape,
    envelope: Envelope,
}

impl Environment {
    pub fn new(shape: Shape) -> Result<Self> {
        let envelope = shape.envelope();
        if envelope.is_null() {
            return Err(TopologyError::InvalidEnvironment(
                "environment shape has no extent".to_string(),
            ));
        }
        if shape.depth().is_some_and(|d| !(d >= 0.0)) {
            return Err(TopologyError::InvalidEnvironment(
                "environment depth must be non-negative".to_string(),
            ));
        }
        Ok(Environment { shape, envelope })
    }

    /// Rectangle `[0, width] x [0, height]`.
    pub fn rect(width: f64, height: f64) -> Result<Self> {
        Self::new(Shape::rect(0.0, 0.0, width, height))
    }

    /// Cube of `size` on every axis.
    pub fn cube(size: f64) -> Result<Self> {
        Self::new(Shape::cube(size))
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn envelope(&self) -> Envelope {
        self.envelope
    }

    pub fn width(&self) -> f64 {
        self.envelope.width()
    }

    pub fn height(&self) -> f64 {
        self.envelope.height()
    }

    /// Explicit depth of a 3-D environment.
    pub fn depth(&self) -> Option<f64> {
        self.shape.depth()
    }

    /// `loc` lies inside or on the boundary, z ignored.
    pub fn covers(&self, loc: &Location) -> bool {
        self.envelope.contains_xy(loc.x, loc.y) && self.shape.covers_location(loc)
    }
}

/// Owner of the compound index and the torus flag.
pub struct RootTopology {
    index: CompoundSpatialIndex,
    torus: bool,
}

impl RootTopology {
    pub fn new(environment: &Environment, config: &TopologyConfig) -> Self {
        RootTopology {
            index: CompoundSpatialIndex::new(environment.envelope(), config),
            torus: config.torus,
        }
    }

    pub fn index(&self) -> &CompoundSpatialIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut CompoundSpatialIndex {
        &mut self.index
    }

    pub fn is_torus(&self) -> bool {
        self.torus
    }

    pub fn dispose(&mut self) {
        self.index.dispose();
    }
}

/// Delegation link from a topology to its root. One logical writer at a time.
pub type SharedRoot = Arc<RwLock<RootTopology>>;

pub struct Topology {
    environment: Environment,
    root: SharedRoot,
    places: Vec<Shape>,
    can_create_agents: bool,
    owns_root: bool,
    offsets: OnceLock<ToroidalOffsets>,
}

impl Topology {
    /// A root topology: builds and owns the compound index for `environment`.
    pub fn root(environment: Environment, config: &TopologyConfig) -> Self {
        info!(
            "[Topology] root {:.1}x{:.1} (torus={}, parallel={}, lazy={})",
            environment.width(),
            environment.height(),
            config.torus,
            config.parallel,
            config.lazy_registration
        );
        let root = Arc::new(RwLock::new(RootTopology::new(&environment, config)));
        Topology {
            owns_root: true,
            ..Self::with_root(environment, root)
        }
    }

    /// A topology delegating its index to an existing root.
    pub fn with_root(environment: Environment, root: SharedRoot) -> Self {
        Topology {
            environment,
            root,
            places: Vec::new(),
            can_create_agents: false,
            owns_root: false,
            offsets: OnceLock::new(),
        }
    }

    /// Attach the places this topology is built from. With `can_create_agents`
    /// set, [`Topology::initialize`] spawns one agent per place.
    pub fn with_places(mut self, places: Vec<Shape>, can_create_agents: bool) -> Self {
        self.places = places;
        self.can_create_agents = can_create_agents;
        self
    }

    pub fn root_handle(&self) -> SharedRoot {
        Arc::clone(&self.root)
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn places(&self) -> &[Shape] {
        &self.places
    }

    pub fn width(&self) -> f64 {
        self.environment.width()
    }

    pub fn height(&self) -> f64 {
        self.environment.height()
    }

    pub fn is_torus(&self) -> bool {
        self.root.read().is_torus()
    }

    /// Periodic offsets, computed on first use.
    pub fn offsets(&self) -> &ToroidalOffsets {
        self.offsets
            .get_or_init(|| ToroidalOffsets::new(self.width(), self.height()))
    }

    pub fn reset_offsets(&mut self) {
        self.offsets.take();
    }

    /// Replace the environment. The root index is rebuilt against the new
    /// bounds only when this topology built that root; delegating topologies
    /// just pick up new wrap offsets.
    pub fn set_environment<C: AgentCatalog + ?Sized>(&mut self, environment: Environment, catalog: &C) {
        self.environment = environment;
        self.reset_offsets();
        if !self.owns_root {
            debug!("[Topology] environment swapped on a delegating topology; shared index kept");
            return;
        }
        let mut root = self.root.write();
        let parallel = root.index.is_parallel();
        root.index.update(self.environment.envelope(), parallel, catalog);
    }

    /// Rebuild the root index with a new parallel setting, keeping the bounds.
    pub fn set_parallel<C: AgentCatalog + ?Sized>(&self, parallel: bool, catalog: &C) {
        let mut root = self.root.write();
        let bounds = root.index.bounds();
        root.index.update(bounds, parallel, catalog);
    }

    /// Move every index of `other`'s root into ours. `other`'s root is left
    /// disposed. Topologies sharing one root are left alone.
    pub fn absorb(&self, other: &Topology) {
        if Arc::ptr_eq(&self.root, &other.root) {
            warn!("[Topology] absorb skipped: both topologies share one root");
            return;
        }
        let mut theirs = other.root.write();
        self.root.write().index.merge(&mut theirs.index);
    }

    // ── Lifecycle ──

    /// Spawn one agent per place when this topology builds its own population.
    pub fn initialize<S>(&self, population: &mut S, category: CategoryId) -> Vec<AgentId>
    where
        S: AgentSpawner + AgentCatalog,
    {
        if !self.can_create_agents {
            return Vec::new();
        }
        let spawned: Vec<AgentId> = self
            .places
            .iter()
            .map(|place| population.spawn(category, place.clone()))
            .collect();
        let mut root = self.root.write();
        for agent in &spawned {
            root.index.insert(*agent, &*population);
        }
        info!("[Topology] {} agents created from places", spawned.len());
        spawned
    }

    /// Register a newly created agent.
    pub fn insert_agent<C: AgentCatalog + ?Sized>(&self, agent: AgentId, catalog: &C) {
        self.root.write().index.insert(agent, catalog);
    }

    /// Re-key `agent` after a move. `previous` is the box it was indexed
    /// under, absent for a first placement.
    pub fn on_agent_moved<C: AgentCatalog + ?Sized>(
        &self,
        previous: Option<&Envelope>,
        agent: AgentId,
        catalog: &C,
    ) {
        let mut root = self.root.write();
        if let Some(previous) = previous.filter(|p| !p.is_null()) {
            root.index.remove(previous, agent, catalog);
        }
        root.index.insert(agent, catalog);
    }

    pub fn remove_agent<C: AgentCatalog + ?Sized>(&self, agent: AgentId, catalog: &C) -> bool {
        self.root.write().index.remove_agent(agent, catalog)
    }

    /// Forget a destroyed category's index.
    pub fn remove_category(&self, category: CategoryId) -> bool {
        self.root.write().index.remove_category(category)
    }

    /// Drops nothing from the root; the index outlives any one topology.
    pub fn dispose(&mut self) {
        self.offsets.take();
        debug!("[Topology] disposed");
    }

    // ── Queries ──

    /// Candidates passing `filter` with their wrapped distance to `source`.
    fn toroidal_candidates<C: AgentCatalog + ?Sized>(
        &self,
        source: &QuerySource<'_>,
        filter: &Filter,
        catalog: &C,
    ) -> Vec<(AgentId, f64)> {
        let offsets = *self.offsets();
        let images = offsets.replicate(source.shape);
        let members = self.root.write().index.members(source, filter, catalog);
        members
            .into_iter()
            .filter_map(|agent| {
                let shape = catalog.shape(agent)?;
                Some((agent, images_distance(&images, &offsets.replicate(shape))))
            })
            .collect()
    }

    pub fn nearest<C, R>(
        &self,
        source: &QuerySource<'_>,
        filter: &Filter,
        catalog: &C,
        rng: &mut R,
    ) -> Option<AgentId>
    where
        C: AgentCatalog + ?Sized,
        R: Rng + ?Sized,
    {
        if !self.is_torus() {
            return self
                .root
                .write()
                .index
                .first_at_distance(source, filter, catalog, rng);
        }
        let mut candidates = self.toroidal_candidates(source, filter, catalog);
        candidates.shuffle(rng);
        let mut best: Option<(AgentId, f64)> = None;
        for (agent, d) in candidates {
            if best.map_or(true, |(_, b)| d < b) {
                best = Some((agent, d));
            }
        }
        best.map(|(a, _)| a)
    }

    /// The `k` closest agents, closest first when wrapping.
    pub fn nearest_k<C, R>(
        &self,
        source: &QuerySource<'_>,
        filter: &Filter,
        k: usize,
        catalog: &C,
        rng: &mut R,
    ) -> Vec<AgentId>
    where
        C: AgentCatalog + ?Sized,
        R: Rng + ?Sized,
    {
        if !self.is_torus() {
            return self
                .root
                .write()
                .index
                .first_n_at_distance(source, filter, k, &[], catalog, rng);
        }
        let mut candidates = self.toroidal_candidates(source, filter, catalog);
        if candidates.len() <= k {
            return candidates.into_iter().map(|(a, _)| a).collect();
        }
        candidates.shuffle(rng);
        candidates.sort_by_key(|(_, d)| OrderedFloat(*d));
        candidates.truncate(k);
        candidates.into_iter().map(|(a, _)| a).collect()
    }

    pub fn farthest<C: AgentCatalog + ?Sized>(
        &self,
        source: &QuerySource<'_>,
        filter: &Filter,
        catalog: &C,
    ) -> Option<AgentId> {
        let measured: Vec<(AgentId, f64)> = if self.is_torus() {
            self.toroidal_candidates(source, filter, catalog)
        } else {
            let members = self.root.write().index.members(source, filter, catalog);
            members
                .into_iter()
                .filter_map(|a| catalog.shape(a).map(|s| (a, source.shape.distance(s))))
                .collect()
        };
        let mut best: Option<(AgentId, f64)> = None;
        for (agent, d) in measured {
            if best.map_or(true, |(_, b)| d > b) {
                best = Some((agent, d));
            }
        }
        best.map(|(a, _)| a)
    }

    /// Every agent within `radius` of the source.
    pub fn within<C, R>(
        &self,
        source: &QuerySource<'_>,
        radius: f64,
        filter: &Filter,
        catalog: &C,
        rng: &mut R,
    ) -> Vec<AgentId>
    where
        C: AgentCatalog + ?Sized,
        R: Rng + ?Sized,
    {
        if !self.is_torus() {
            return self
                .root
                .write()
                .index
                .all_at_distance(source, radius, filter, catalog, rng);
        }
        self.toroidal_candidates(source, filter, catalog)
            .into_iter()
            .filter(|(_, d)| *d <= radius)
            .map(|(a, _)| a)
            .collect()
    }

    /// Agents standing in `relation` to the source, read "source relation agent".
    pub fn agents_in_relation<C, R>(
        &self,
        source: Option<&QuerySource<'_>>,
        filter: &Filter,
        relation: SpatialRelation,
        catalog: &C,
        rng: &mut R,
    ) -> Vec<AgentId>
    where
        C: AgentCatalog + ?Sized,
        R: Rng + ?Sized,
    {
        let Some(source) = source else {
            return Vec::new();
        };
        let accepts = |prepared: &PreparedShape, agent: AgentId| {
            !catalog.is_dead(agent)
                && catalog
                    .shape(agent)
                    .is_some_and(|shape| prepared.accepts(shape, relation))
        };
        if !self.is_torus() {
            let Some(envelope) = source
                .shape
                .envelope()
                .intersection(&self.environment.envelope())
            else {
                return Vec::new();
            };
            let contained = relation == SpatialRelation::Inside;
            let mut agents = self.root.write().index.all_in_envelope(
                source, &envelope, filter, contained, catalog, rng,
            );
            let prepared = PreparedShape::new(source.shape);
            agents.retain(|a| accepts(&prepared, *a));
            return agents;
        }
        let prepared = PreparedShape::from_parts(&self.offsets().replicate(source.shape));
        let members = self.root.write().index.members(source, filter, catalog);
        members
            .into_iter()
            .filter(|a| accepts(&prepared, *a))
            .collect()
    }

    // ── Locations ──

    /// `p` itself when the environment covers it; otherwise, on a torus, the
    /// first periodic image (compass order) that lands inside.
    pub fn normalize_location(&self, p: Location, null_if_outside: bool) -> Option<Location> {
        if self.environment.covers(&p) {
            return Some(p);
        }
        if self.is_torus() {
            for (dx, dy) in self.offsets().vectors() {
                let image = p.plus(*dx, *dy, 0.0);
                if self.environment.covers(&image) {
                    return Some(image);
                }
            }
        }
        if null_if_outside {
            None
        } else {
            Some(p)
        }
    }

    /// [`Topology::normalize_location`] plus the vertical bound. Asking this
    /// of an environment without depth is a modelling error.
    pub fn normalize_location_3d(&self, p: Location, null_if_outside: bool) -> Result<Option<Location>> {
        let depth = self.environment.depth().ok_or(TopologyError::MissingDepth)?;
        let Some(normalized) = self.normalize_location(p, null_if_outside) else {
            return Ok(None);
        };
        if normalized.z < 0.0 || normalized.z > depth {
            return Ok(None);
        }
        Ok(Some(normalized))
    }

    /// Project `source` by `distance` along `heading` (degrees, counter-clockwise
    /// from +x) and normalise the result.
    pub fn destination(
        &self,
        source: Location,
        heading: f64,
        distance: f64,
        null_if_outside: bool,
    ) -> Option<Location> {
        let (sin, cos) = heading.to_radians().sin_cos();
        self.normalize_location(source.plus(distance * cos, distance * sin, 0.0), null_if_outside)
    }

    /// Spherical projection; `pitch` is the elevation in degrees.
    pub fn destination_3d(
        &self,
        source: Location,
        heading: f64,
        pitch: f64,
        distance: f64,
        null_if_outside: bool,
    ) -> Result<Option<Location>> {
        let (sin_h, cos_h) = heading.to_radians().sin_cos();
        let (sin_p, cos_p) = pitch.to_radians().sin_cos();
        let target = source.plus(
            distance * cos_p * cos_h,
            distance * cos_p * sin_h,
            distance * sin_p,
        );
        self.normalize_location_3d(target, null_if_outside)
    }

    /// Shape-to-shape distance, across the seams on a torus.
    pub fn distance_between(&self, a: &Shape, b: &Shape) -> f64 {
        if self.is_torus() {
            self.offsets().wrapped_distance(a, b)
        } else {
            a.distance(b)
        }
    }

    /// Heading in degrees `[0, 360)` from `a`'s location towards `b`'s,
    /// through the shortest seam on a torus.
    pub fn direction_in_degrees_to(&self, a: &Shape, b: &Shape) -> f64 {
        let from = a.location();
        let mut to = b.location();
        if self.is_torus() {
            to = self.offsets().nearest_image(&from, &to);
        }
        (to.y - from.y).atan2(to.x - from.x).to_degrees().rem_euclid(360.0)
    }

    pub fn is_valid_location(&self, p: &Location) -> bool {
        self.environment.covers(p)
    }

    pub fn is_valid_geometry(&self, shape: &Shape) -> bool {
        self.environment
            .shape()
            .relates_to(shape, SpatialRelation::Overlap)
    }

    /// Uniform draw inside the environment. Falls back to the environment
    /// centroid when rejection sampling keeps missing a thin shape.
    pub fn random_location<R: Rng + ?Sized>(&self, rng: &mut R) -> Location {
        let env = self.environment.envelope();
        for _ in 0..RANDOM_LOCATION_ATTEMPTS {
            let p = Location::new(
                rng.gen_range(env.min_x..=env.max_x),
                rng.gen_range(env.min_y..=env.max_y),
            );
            if self.environment.covers(&p) {
                return p;
            }
        }
        warn!("[Topology] random location fell back to the environment centroid");
        self.environment.shape().location()
    }
}
