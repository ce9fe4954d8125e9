//! Compound Spatial Index
//!
//! One [`SpatialIndex`] per category behind a single-index API. Indexes are
//! created the first time a query or a registration touches their category.
//! Nearest searches step through a fixed ladder of radii derived from the
//! environment size; the ladder is a coarse accelerator and the final pick is
//! always made on exact distances.

use super::index::SpatialIndex;
use crate::core::{AgentCatalog, AgentId, CategoryId, Filter, QuerySource, TopologyConfig};
use crate::geometry::Envelope;
use indexmap::{IndexMap, IndexSet};
use ordered_float::OrderedFloat;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

/// Search radii for an environment box: `d/100, d/50, d/20, d/10, d/2, d, d·√2`
/// with `d` the larger side.
pub fn search_steps(bounds: &Envelope) -> [f64; 7] {
    let d = bounds.width().max(bounds.height());
    [
        d / 100.0,
        d / 50.0,
        d / 20.0,
        d / 10.0,
        d / 2.0,
        d,
        d * std::f64::consts::SQRT_2,
    ]
}

fn exact_distance<C: AgentCatalog + ?Sized>(
    source: &QuerySource<'_>,
    agent: AgentId,
    catalog: &C,
) -> f64 {
    catalog
        .shape(agent)
        .map_or(f64::INFINITY, |s| source.shape.distance(s))
}

pub struct CompoundSpatialIndex {
    indexes: IndexMap<CategoryId, SpatialIndex>,
    // category -> itself and its sub-categories, as last resolved
    resolved: IndexMap<CategoryId, Vec<CategoryId>>,
    resolved_version: u64,
    bounds: Envelope,
    parallel: bool,
    parallel_threshold: usize,
    lazy_registration: bool,
    steps: [f64; 7],
    disposed: bool,
}

impl CompoundSpatialIndex {
    pub fn new(bounds: Envelope, config: &TopologyConfig) -> Self {
        CompoundSpatialIndex {
            indexes: IndexMap::new(),
            resolved: IndexMap::new(),
            resolved_version: 0,
            bounds,
            parallel: config.parallel,
            parallel_threshold: config.parallel_threshold,
            lazy_registration: config.lazy_registration,
            steps: search_steps(&bounds),
            disposed: false,
        }
    }

    pub fn bounds(&self) -> Envelope {
        self.bounds
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn steps(&self) -> &[f64; 7] {
        &self.steps
    }

    /// Categories that currently own an index, in creation order.
    pub fn categories(&self) -> impl Iterator<Item = CategoryId> + '_ {
        self.indexes.keys().copied()
    }

    pub fn index(&self, category: CategoryId) -> Option<&SpatialIndex> {
        self.indexes.get(&category)
    }

    /// Drop every cached category resolution. Needed after the category tree
    /// changes when the catalog does not report a hierarchy version.
    pub fn invalidate_hierarchy(&mut self) {
        self.resolved.clear();
    }

    fn materialize<C: AgentCatalog + ?Sized>(
        &mut self,
        category: CategoryId,
        insert_members: bool,
        catalog: &C,
    ) {
        if self.indexes.contains_key(&category) {
            return;
        }
        let mut index = SpatialIndex::new(self.parallel, self.parallel_threshold);
        if insert_members {
            for agent in catalog.members(category) {
                index.insert(agent, catalog);
            }
        }
        debug!(
            "[CompoundIndex] index for {} created ({} agents)",
            category,
            index.len()
        );
        self.indexes.insert(category, index);
    }

    /// Categories whose indexes a query with `filter` must visit, creating the
    /// missing ones. The wildcard only sees categories that already have an index.
    pub fn resolve_categories<C: AgentCatalog + ?Sized>(
        &mut self,
        filter: &Filter,
        catalog: &C,
    ) -> Vec<CategoryId> {
        if self.disposed {
            return Vec::new();
        }
        let version = catalog.hierarchy_version();
        if version != self.resolved_version {
            self.resolved.clear();
            self.resolved_version = version;
        }
        match filter {
            Filter::PopulationSet(categories) => {
                let unique: IndexSet<CategoryId> = categories.iter().copied().collect();
                for category in &unique {
                    self.materialize(*category, true, catalog);
                }
                unique.into_iter().collect()
            }
            Filter::Category(category) => {
                if let Some(cached) = self.resolved.get(category) {
                    return cached.clone();
                }
                let mut lineage = vec![*category];
                lineage.extend(catalog.sub_categories(*category));
                for c in &lineage {
                    self.materialize(*c, true, catalog);
                }
                self.resolved.insert(*category, lineage.clone());
                lineage
            }
            Filter::AgentList(agents) => {
                let categories: IndexSet<CategoryId> =
                    agents.iter().filter_map(|a| catalog.category(*a)).collect();
                for category in &categories {
                    self.materialize(*category, true, catalog);
                }
                categories.into_iter().collect()
            }
            Filter::Any => self.indexes.keys().copied().collect(),
        }
    }

    /// Register `agent` under its current box. Creates the category's index
    /// unless lazy registration defers that to the first query.
    pub fn insert<C: AgentCatalog + ?Sized>(&mut self, agent: AgentId, catalog: &C) {
        if self.disposed {
            return;
        }
        let Some(category) = catalog.category(agent) else {
            return;
        };
        if !self.indexes.contains_key(&category) {
            if self.lazy_registration {
                return;
            }
            self.materialize(category, false, catalog);
        }
        if let Some(index) = self.indexes.get_mut(&category) {
            index.insert(agent, catalog);
        }
    }

    /// Remove `agent` if its category index holds it under `previous`.
    pub fn remove<C: AgentCatalog + ?Sized>(
        &mut self,
        previous: &Envelope,
        agent: AgentId,
        catalog: &C,
    ) -> bool {
        if self.disposed {
            return false;
        }
        let Some(category) = catalog.category(agent) else {
            return false;
        };
        self.indexes
            .get_mut(&category)
            .is_some_and(|index| index.remove(previous, agent))
    }

    /// Remove `agent` whatever box it was stored under.
    pub fn remove_agent<C: AgentCatalog + ?Sized>(&mut self, agent: AgentId, catalog: &C) -> bool {
        if self.disposed {
            return false;
        }
        let Some(category) = catalog.category(agent) else {
            return false;
        };
        self.indexes
            .get_mut(&category)
            .is_some_and(|index| index.remove_agent(agent))
    }

    /// Closest agent passing `filter`, searched with the radius ladder.
    pub fn first_at_distance<C, R>(
        &mut self,
        source: &QuerySource<'_>,
        filter: &Filter,
        catalog: &C,
        rng: &mut R,
    ) -> Option<AgentId>
    where
        C: AgentCatalog + ?Sized,
        R: Rng + ?Sized,
    {
        let categories = self.resolve_categories(filter, catalog);
        let mut found: Vec<AgentId> = Vec::new();
        for step in self.steps {
            for category in &categories {
                let Some(index) = self.indexes.get(category) else {
                    continue;
                };
                if let Some(first) = index.first_at_distance(source, step, filter, catalog) {
                    found.push(first);
                }
            }
            if !found.is_empty() {
                break;
            }
        }
        match found.len() {
            0 => None,
            1 => Some(found[0]),
            _ => {
                found.shuffle(rng);
                let mut best: Option<(AgentId, f64)> = None;
                for agent in found {
                    let d = exact_distance(source, agent, catalog);
                    if best.map_or(true, |(_, b)| d < b) {
                        best = Some((agent, d));
                    }
                }
                best.map(|(a, _)| a)
            }
        }
    }

    /// Up to `count` closest agents. `already_chosen` seeds the selection and
    /// is part of the result, so repeated calls extend a running pick.
    pub fn first_n_at_distance<C, R>(
        &mut self,
        source: &QuerySource<'_>,
        filter: &Filter,
        count: usize,
        already_chosen: &[AgentId],
        catalog: &C,
        rng: &mut R,
    ) -> Vec<AgentId>
    where
        C: AgentCatalog + ?Sized,
        R: Rng + ?Sized,
    {
        let categories = self.resolve_categories(filter, catalog);
        if self.disposed {
            return Vec::new();
        }
        let mut chosen: Vec<AgentId> = already_chosen.to_vec();
        for step in self.steps {
            for category in &categories {
                let Some(index) = self.indexes.get(category) else {
                    continue;
                };
                let firsts = index.first_n_at_distance(source, step, filter, count, &chosen, catalog);
                chosen.extend(firsts);
            }
            if chosen.len() >= count {
                break;
            }
        }
        if chosen.len() <= count {
            return chosen;
        }
        chosen.shuffle(rng);
        // stable sort: equidistant agents keep their shuffled order
        chosen.sort_by_cached_key(|a| OrderedFloat(exact_distance(source, *a, catalog)));
        chosen.truncate(count);
        chosen
    }

    /// Agents whose box meets (or lies in, when `contained`) `envelope`.
    pub fn all_in_envelope<C, R>(
        &mut self,
        source: &QuerySource<'_>,
        envelope: &Envelope,
        filter: &Filter,
        contained: bool,
        catalog: &C,
        rng: &mut R,
    ) -> Vec<AgentId>
    where
        C: AgentCatalog + ?Sized,
        R: Rng + ?Sized,
    {
        let categories = self.resolve_categories(filter, catalog);
        let mut agents: IndexSet<AgentId> = IndexSet::new();
        for category in &categories {
            if let Some(index) = self.indexes.get(category) {
                agents.extend(index.all_in_envelope(source, envelope, filter, contained, catalog));
            }
        }
        let mut agents: Vec<AgentId> = agents.into_iter().collect();
        agents.shuffle(rng);
        agents
    }

    /// Every agent within `radius` of the source.
    pub fn all_at_distance<C, R>(
        &mut self,
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
        let categories = self.resolve_categories(filter, catalog);
        let mut agents: IndexSet<AgentId> = IndexSet::new();
        for category in &categories {
            if let Some(index) = self.indexes.get(category) {
                agents.extend(index.all_at_distance(source, radius, filter, catalog));
            }
        }
        let mut agents: Vec<AgentId> = agents.into_iter().collect();
        agents.shuffle(rng);
        agents
    }

    /// Live agents of the resolved indexes that pass `filter`, in index order.
    /// The source agent, when there is one, is left out.
    pub fn members<C: AgentCatalog + ?Sized>(
        &mut self,
        source: &QuerySource<'_>,
        filter: &Filter,
        catalog: &C,
    ) -> Vec<AgentId> {
        let categories = self.resolve_categories(filter, catalog);
        let mut agents: IndexSet<AgentId> = IndexSet::new();
        for category in &categories {
            if let Some(index) = self.indexes.get(category) {
                agents.extend(index.members().filter(|a| {
                    !source.is_self(*a) && !catalog.is_dead(*a) && filter.accepts(*a, catalog)
                }));
            }
        }
        agents.into_iter().collect()
    }

    /// Drop a category's index, e.g. when the category is destroyed.
    pub fn remove_category(&mut self, category: CategoryId) -> bool {
        let removed = self.indexes.shift_remove(&category).is_some();
        if removed {
            self.resolved.clear();
            debug!("[CompoundIndex] index for {} dropped", category);
        }
        removed
    }

    /// Swap bounds and parallelism, then rebuild every existing index from the
    /// current membership of its category.
    pub fn update<C: AgentCatalog + ?Sized>(&mut self, bounds: Envelope, parallel: bool, catalog: &C) {
        if self.disposed {
            return;
        }
        self.bounds = bounds;
        self.parallel = parallel;
        self.steps = search_steps(&bounds);
        let categories: Vec<CategoryId> = self.indexes.keys().copied().collect();
        for category in &categories {
            self.indexes.shift_remove(category);
            self.materialize(*category, true, catalog);
        }
        self.resolved.clear();
        info!(
            "[CompoundIndex] rebuilt {} indexes (bounds {:.1}x{:.1}, parallel={})",
            categories.len(),
            bounds.width(),
            bounds.height(),
            parallel
        );
    }

    /// Take over every index of `other` (replacing ours on collision) and
    /// dispose it.
    pub fn merge(&mut self, other: &mut CompoundSpatialIndex) {
        if self.disposed || other.disposed {
            return;
        }
        let absorbed = other.indexes.len();
        for (category, index) in other.indexes.drain(..) {
            self.indexes.insert(category, index);
        }
        self.resolved.clear();
        other.dispose();
        info!("[CompoundIndex] merged {} indexes", absorbed);
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.indexes.clear();
        self.resolved.clear();
        debug!("[CompoundIndex] disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AgentSpawner, AgentStore};
    use crate::geometry::Shape;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn bounds() -> Envelope {
        Envelope::new(0.0, 0.0, 100.0, 100.0)
    }

    fn index_all(index: &mut CompoundSpatialIndex, store: &AgentStore) {
        let ids: Vec<AgentId> = store.agents().map(|r| r.id).collect();
        for id in ids {
            index.insert(id, store);
        }
    }

    #[test]
    fn steps_follow_the_larger_side() {
        let steps = search_steps(&Envelope::new(0.0, 0.0, 200.0, 50.0));
        assert_eq!(steps[0], 2.0);
        assert_eq!(steps[4], 100.0);
        assert_eq!(steps[5], 200.0);
        assert!((steps[6] - 200.0 * 2f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn wildcard_never_creates_untouched_indexes() {
        let mut store = AgentStore::new();
        let wolf = store.add_category("wolf", None);
        let w = store.spawn(wolf, Shape::point(10.0, 10.0));
        let config = TopologyConfig {
            lazy_registration: true,
            ..TopologyConfig::default()
        };
        let mut index = CompoundSpatialIndex::new(bounds(), &config);
        index.insert(w, &store);
        assert_eq!(index.categories().count(), 0);

        let mut rng = StdRng::seed_from_u64(1);
        let probe = Shape::point(0.0, 0.0);
        let src = QuerySource::from_shape(&probe);
        assert_eq!(index.first_at_distance(&src, &Filter::Any, &store, &mut rng), None);
        assert_eq!(index.categories().count(), 0);

        // touching the category materialises it with its members
        assert_eq!(
            index.first_at_distance(&src, &Filter::category(wolf), &store, &mut rng),
            Some(w)
        );
        assert_eq!(index.first_at_distance(&src, &Filter::Any, &store, &mut rng), Some(w));
    }

    #[test]
    fn category_resolution_covers_sub_categories_and_is_cached() {
        let mut store = AgentStore::new();
        let animal = store.add_category("animal", None);
        let wolf = store.add_category("wolf", Some(animal));
        let sheep = store.add_category("sheep", Some(animal));
        let mut index = CompoundSpatialIndex::new(bounds(), &TopologyConfig::default());

        let resolved = index.resolve_categories(&Filter::category(animal), &store);
        assert_eq!(resolved, vec![animal, wolf, sheep]);
        assert_eq!(index.categories().count(), 3);

        // a new sub-category is only seen once the hierarchy changed
        let lamb = store.add_category("lamb", Some(sheep));
        let resolved = index.resolve_categories(&Filter::category(animal), &store);
        assert_eq!(resolved, vec![animal, wolf, sheep, lamb]);
    }

    #[test]
    fn population_set_fills_new_indexes_with_members() {
        let mut store = AgentStore::new();
        let grass = store.add_category("grass", None);
        let g1 = store.spawn(grass, Shape::point(5.0, 5.0));
        let g2 = store.spawn(grass, Shape::point(6.0, 5.0));
        let mut index = CompoundSpatialIndex::new(bounds(), &TopologyConfig::default());
        let mut rng = StdRng::seed_from_u64(3);

        let probe = Shape::point(5.5, 5.0);
        let src = QuerySource::from_shape(&probe);
        let mut got = index.all_at_distance(&src, 1.0, &Filter::populations([grass]), &store, &mut rng);
        got.sort();
        assert_eq!(got, vec![g1, g2]);
    }

    #[test]
    fn nearest_is_exact_across_categories() {
        let mut store = AgentStore::new();
        let a = store.add_category("a", None);
        let b = store.add_category("b", None);
        // both inside the first radius step (1.0); b's agent is strictly closer
        let far = store.spawn(a, Shape::point(50.9, 50.0));
        let near = store.spawn(b, Shape::point(50.3, 50.0));
        let mut index = CompoundSpatialIndex::new(bounds(), &TopologyConfig::default());
        index_all(&mut index, &store);

        let probe = Shape::point(50.0, 50.0);
        let src = QuerySource::from_shape(&probe);
        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            assert_eq!(index.first_at_distance(&src, &Filter::Any, &store, &mut rng), Some(near));
        }
        let _ = far;
    }

    #[test]
    fn nearest_falls_through_to_the_widest_step() {
        let mut store = AgentStore::new();
        let a = store.add_category("a", None);
        let corner = store.spawn(a, Shape::point(100.0, 100.0));
        let mut index = CompoundSpatialIndex::new(bounds(), &TopologyConfig::default());
        index_all(&mut index, &store);

        let probe = Shape::point(0.0, 0.0);
        let src = QuerySource::from_shape(&probe);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(index.first_at_distance(&src, &Filter::Any, &store, &mut rng), Some(corner));
    }

    #[test]
    fn first_n_keeps_the_closest_and_seeds_with_already_chosen() {
        let mut store = AgentStore::new();
        let a = store.add_category("a", None);
        let ids: Vec<AgentId> = (1..=6)
            .map(|i| store.spawn(a, Shape::point(i as f64 * 3.0, 0.0)))
            .collect();
        let mut index = CompoundSpatialIndex::new(bounds(), &TopologyConfig::default());
        index_all(&mut index, &store);
        let probe = Shape::point(0.0, 0.0);
        let src = QuerySource::from_shape(&probe);
        let mut rng = StdRng::seed_from_u64(9);

        let mut got = index.first_n_at_distance(&src, &Filter::Any, 3, &[], &store, &mut rng);
        got.sort();
        assert_eq!(got, ids[..3].to_vec());

        let extended = index.first_n_at_distance(&src, &Filter::Any, 4, &got, &store, &mut rng);
        assert_eq!(extended.len(), 4);
        for id in &got {
            assert!(extended.contains(id));
        }
        assert!(extended.contains(&ids[3]));
    }

    #[test]
    fn update_rebuilds_with_same_membership() {
        let mut store = AgentStore::new();
        let a = store.add_category("a", None);
        for i in 0..10 {
            store.spawn(a, Shape::point(i as f64 * 10.0, 5.0));
        }
        let mut index = CompoundSpatialIndex::new(bounds(), &TopologyConfig::default());
        index_all(&mut index, &store);
        let probe = Shape::point(50.0, 5.0);
        let src = QuerySource::from_shape(&probe);
        let mut rng = StdRng::seed_from_u64(5);

        let mut before = index.all_at_distance(&src, 500.0, &Filter::category(a), &store, &mut rng);
        index.update(Envelope::new(0.0, 0.0, 400.0, 400.0), false, &store);
        let mut after = index.all_at_distance(&src, 500.0, &Filter::category(a), &store, &mut rng);
        before.sort();
        after.sort();
        assert_eq!(before, after);
        assert_eq!(index.steps()[5], 400.0);
    }

    #[test]
    fn merge_overwrites_and_disposes_the_other() {
        let mut store = AgentStore::new();
        let x = store.add_category("x", None);
        let mine = store.spawn(x, Shape::point(1.0, 1.0));
        let theirs = store.spawn(x, Shape::point(2.0, 2.0));

        let mut index = CompoundSpatialIndex::new(bounds(), &TopologyConfig::default());
        index.insert(mine, &store);
        let mut other = CompoundSpatialIndex::new(bounds(), &TopologyConfig::default());
        other.insert(theirs, &store);

        index.merge(&mut other);
        assert!(other.is_disposed());
        let x_index = index.index(x).unwrap();
        assert!(x_index.contains(theirs));
        assert!(!x_index.contains(mine));

        let probe = Shape::point(0.0, 0.0);
        let src = QuerySource::from_shape(&probe);
        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(other.first_at_distance(&src, &Filter::Any, &store, &mut rng), None);
        other.insert(mine, &store);
        assert_eq!(other.categories().count(), 0);
    }

    #[test]
    fn disposed_index_answers_nothing() {
        let mut store = AgentStore::new();
        let a = store.add_category("a", None);
        let id = store.spawn(a, Shape::point(1.0, 1.0));
        let mut index = CompoundSpatialIndex::new(bounds(), &TopologyConfig::default());
        index.insert(id, &store);
        index.dispose();

        let probe = Shape::point(1.0, 1.0);
        let src = QuerySource::from_shape(&probe);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(index
            .all_at_distance(&src, 10.0, &Filter::category(a), &store, &mut rng)
            .is_empty());
        assert!(index
            .first_n_at_distance(&src, &Filter::Any, 3, &[], &store, &mut rng)
            .is_empty());
        assert!(!index.remove(&Envelope::from_point(1.0, 1.0), id, &store));
    }

    #[test]
    fn parallel_flag_reaches_every_leaf() {
        let mut store = AgentStore::new();
        let a = store.add_category("a", None);
        let b = store.add_category("b", None);
        let id = store.spawn(a, Shape::point(1.0, 1.0));
        store.spawn(b, Shape::point(2.0, 2.0));

        let config = TopologyConfig {
            parallel: true,
            ..TopologyConfig::default()
        };
        let mut index = CompoundSpatialIndex::new(bounds(), &config);
        index.insert(id, &store);
        assert!(index.index(a).unwrap().is_parallel());

        index.update(bounds(), false, &store);
        assert!(!index.is_parallel());
        assert!(!index.index(a).unwrap().is_parallel());

        index.update(bounds(), true, &store);
        assert!(index.index(a).unwrap().is_parallel());
        index.resolve_categories(&Filter::category(b), &store);
        assert!(index.index(b).unwrap().is_parallel());
        assert_eq!(index.index(b).unwrap().len(), 1);
    }

    /// Catalog that never reports hierarchy changes.
    struct Unversioned<'a>(&'a AgentStore);

    impl AgentCatalog for Unversioned<'_> {
        fn shape(&self, agent: AgentId) -> Option<&Shape> {
            self.0.shape(agent)
        }

        fn category(&self, agent: AgentId) -> Option<CategoryId> {
            self.0.category(agent)
        }

        fn is_dead(&self, agent: AgentId) -> bool {
            self.0.is_dead(agent)
        }

        fn members(&self, category: CategoryId) -> Vec<AgentId> {
            self.0.members(category)
        }

        fn parent(&self, category: CategoryId) -> Option<CategoryId> {
            self.0.parent(category)
        }

        fn sub_categories(&self, category: CategoryId) -> Vec<CategoryId> {
            self.0.sub_categories(category)
        }
    }

    #[test]
    fn cached_lineage_needs_explicit_invalidation() {
        let mut store = AgentStore::new();
        let animal = store.add_category("animal", None);
        let mut index = CompoundSpatialIndex::new(bounds(), &TopologyConfig::default());
        let filter = Filter::category(animal);

        assert_eq!(index.resolve_categories(&filter, &Unversioned(&store)), vec![animal]);
        let wolf = store.add_category("wolf", Some(animal));
        assert_eq!(index.resolve_categories(&filter, &Unversioned(&store)), vec![animal]);

        index.invalidate_hierarchy();
        assert_eq!(
            index.resolve_categories(&filter, &Unversioned(&store)),
            vec![animal, wolf]
        );
        assert!(index.index(wolf).is_some());
    }

    #[test]
    fn removed_category_is_forgotten() {
        let mut store = AgentStore::new();
        let a = store.add_category("a", None);
        let id = store.spawn(a, Shape::point(1.0, 1.0));
        let mut index = CompoundSpatialIndex::new(bounds(), &TopologyConfig::default());
        index.insert(id, &store);
        assert!(index.remove_category(a));
        assert!(!index.remove_category(a));
        assert!(index.index(a).is_none());
    }
}
