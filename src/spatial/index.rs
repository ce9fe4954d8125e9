//! Single-category spatial index
//!
//! One R*-tree per category, keyed by each agent's bounding box. The tree is
//! only a coarse filter: every answer is refined with exact shape distances
//! read through the [`AgentCatalog`].

use crate::core::{AgentCatalog, AgentId, Filter, QuerySource};
use crate::geometry::Envelope;
use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

/// Tree entry: the agent and the box it was inserted under.
#[derive(Clone, Debug, PartialEq)]
struct IndexedAgent {
    id: AgentId,
    envelope: Envelope,
}

impl RTreeObject for IndexedAgent {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope.to_aabb()
    }
}

impl PointDistance for IndexedAgent {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        rstar::Envelope::distance_2(&self.envelope.to_aabb(), point)
    }
}

/// Spatial index over the agents of one category.
pub struct SpatialIndex {
    tree: RTree<IndexedAgent>,
    // agent -> box currently stored in the tree
    members: IndexMap<AgentId, Envelope>,
    parallel: bool,
    parallel_threshold: usize,
}

impl SpatialIndex {
    pub fn new(parallel: bool, parallel_threshold: usize) -> Self {
        SpatialIndex {
            tree: RTree::new(),
            members: IndexMap::new(),
            parallel,
            parallel_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, agent: AgentId) -> bool {
        self.members.contains_key(&agent)
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Tracked agents in insertion order.
    pub fn members(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.members.keys().copied()
    }

    pub fn clear(&mut self) {
        self.tree = RTree::new();
        self.members.clear();
    }

    /// Add `agent` under its current box, or move it there if already tracked.
    pub fn insert<C: AgentCatalog + ?Sized>(&mut self, agent: AgentId, catalog: &C) {
        let Some(envelope) = catalog.envelope(agent) else {
            return;
        };
        if envelope.is_null() {
            return;
        }
        if let Some(stored) = self.members.get(&agent).copied() {
            if stored == envelope {
                return;
            }
            self.tree.remove(&IndexedAgent {
                id: agent,
                envelope: stored,
            });
        }
        self.tree.insert(IndexedAgent { id: agent, envelope });
        self.members.insert(agent, envelope);
    }

    /// Remove `agent` if it is stored under `previous`. A box that does not
    /// match what was stored leaves the index untouched.
    pub fn remove(&mut self, previous: &Envelope, agent: AgentId) -> bool {
        match self.members.get(&agent) {
            Some(stored) if stored == previous => {}
            _ => return false,
        }
        self.tree.remove(&IndexedAgent {
            id: agent,
            envelope: *previous,
        });
        self.members.shift_remove(&agent);
        true
    }

    /// Remove `agent` whatever box it is stored under.
    pub fn remove_agent(&mut self, agent: AgentId) -> bool {
        match self.members.get(&agent).copied() {
            Some(stored) => self.remove(&stored, agent),
            None => false,
        }
    }

    fn eligible<C: AgentCatalog + ?Sized>(
        agent: AgentId,
        source: &QuerySource<'_>,
        filter: &Filter,
        catalog: &C,
    ) -> bool {
        !source.is_self(agent) && !catalog.is_dead(agent) && filter.accepts(agent, catalog)
    }

    /// Agents whose box meets `source`'s box grown by `radius`.
    fn candidates<C: AgentCatalog + ?Sized>(
        &self,
        source: &QuerySource<'_>,
        radius: f64,
        filter: &Filter,
        catalog: &C,
    ) -> Vec<AgentId> {
        let query = source.shape.envelope().expanded_by(radius).to_aabb();
        self.tree
            .locate_in_envelope_intersecting(&query)
            .map(|entry| entry.id)
            .filter(|id| Self::eligible(*id, source, filter, catalog))
            .collect()
    }

    fn all_eligible<C: AgentCatalog + ?Sized>(
        &self,
        source: &QuerySource<'_>,
        filter: &Filter,
        catalog: &C,
    ) -> Vec<AgentId> {
        self.members
            .keys()
            .copied()
            .filter(|id| Self::eligible(*id, source, filter, catalog))
            .collect()
    }

    /// Exact distances from the source to each candidate. Large batches go
    /// through rayon when the index was built parallel.
    fn measure<C: AgentCatalog + ?Sized>(
        &self,
        candidates: &[AgentId],
        source: &QuerySource<'_>,
        catalog: &C,
    ) -> Vec<(AgentId, f64)> {
        let shape = source.shape;
        let distance = |id: &AgentId| catalog.shape(*id).map(|s| (*id, shape.distance(s)));
        if self.parallel && candidates.len() >= self.parallel_threshold {
            candidates.par_iter().filter_map(distance).collect()
        } else {
            candidates.iter().filter_map(distance).collect()
        }
    }

    /// Closest eligible agent within `radius`; `radius == 0` searches without bound.
    pub fn first_at_distance<C: AgentCatalog + ?Sized>(
        &self,
        source: &QuerySource<'_>,
        radius: f64,
        filter: &Filter,
        catalog: &C,
    ) -> Option<AgentId> {
        if radius <= 0.0 {
            return self.nearest_unbounded(source, filter, catalog);
        }
        let candidates = self.candidates(source, radius, filter, catalog);
        self.measure(&candidates, source, catalog)
            .into_iter()
            .filter(|(_, d)| *d <= radius)
            .min_by_key(|(_, d)| OrderedFloat(*d))
            .map(|(id, _)| id)
    }

    /// Incremental search: walk boxes outward from the source centre and stop
    /// once no remaining box can beat the best exact distance found so far.
    fn nearest_unbounded<C: AgentCatalog + ?Sized>(
        &self,
        source: &QuerySource<'_>,
        filter: &Filter,
        catalog: &C,
    ) -> Option<AgentId> {
        let env = source.shape.envelope();
        let (cx, cy) = env.center();
        // Farthest the source outline reaches from its centre.
        let reach = env.width().hypot(env.height()) / 2.0;
        let mut best: Option<(AgentId, f64)> = None;
        for (entry, d2) in self.tree.nearest_neighbor_iter_with_distance_2(&[cx, cy]) {
            if let Some((_, best_d)) = best {
                if d2.sqrt() - reach > best_d {
                    break;
                }
            }
            if !Self::eligible(entry.id, source, filter, catalog) {
                continue;
            }
            let Some(shape) = catalog.shape(entry.id) else {
                continue;
            };
            let d = source.shape.distance(shape);
            if best.map_or(true, |(_, b)| d < b) {
                best = Some((entry.id, d));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Up to `count` closest eligible agents within `radius` (`0` = unbounded)
    /// that are not in `excluded`, closest first.
    pub fn first_n_at_distance<C: AgentCatalog + ?Sized>(
        &self,
        source: &QuerySource<'_>,
        radius: f64,
        filter: &Filter,
        count: usize,
        excluded: &[AgentId],
        catalog: &C,
    ) -> Vec<AgentId> {
        if count == 0 {
            return Vec::new();
        }
        let mut candidates = if radius <= 0.0 {
            self.all_eligible(source, filter, catalog)
        } else {
            self.candidates(source, radius, filter, catalog)
        };
        candidates.retain(|id| !excluded.contains(id));
        let mut measured: Vec<(AgentId, f64)> = self
            .measure(&candidates, source, catalog)
            .into_iter()
            .filter(|(_, d)| radius <= 0.0 || *d <= radius)
            .collect();
        measured.sort_by_key(|(_, d)| OrderedFloat(*d));
        measured.truncate(count);
        measured.into_iter().map(|(id, _)| id).collect()
    }

    /// Every eligible agent within `radius` of the source.
    pub fn all_at_distance<C: AgentCatalog + ?Sized>(
        &self,
        source: &QuerySource<'_>,
        radius: f64,
        filter: &Filter,
        catalog: &C,
    ) -> Vec<AgentId> {
        let candidates = self.candidates(source, radius.max(0.0), filter, catalog);
        self.measure(&candidates, source, catalog)
            .into_iter()
            .filter(|(_, d)| *d <= radius)
            .map(|(id, _)| id)
            .collect()
    }

    /// Every eligible agent whose box meets `envelope`, or lies fully inside
    /// it when `contained` is set.
    pub fn all_in_envelope<C: AgentCatalog + ?Sized>(
        &self,
        source: &QuerySource<'_>,
        envelope: &Envelope,
        filter: &Filter,
        contained: bool,
        catalog: &C,
    ) -> Vec<AgentId> {
        let query = envelope.to_aabb();
        let hits: Box<dyn Iterator<Item = &IndexedAgent> + '_> = if contained {
            Box::new(self.tree.locate_in_envelope(&query))
        } else {
            Box::new(self.tree.locate_in_envelope_intersecting(&query))
        };
        hits.map(|entry| entry.id)
            .filter(|id| Self::eligible(*id, source, filter, catalog))
            .collect()
    }
}
