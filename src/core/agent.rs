//! Agents and categories as the spatial layer sees them.
//!
//! The index never owns agents. It reads their shape, category and liveness
//! through [`AgentCatalog`], which the simulation's population manager
//! implements. [`AgentStore`] is the runtime's own implementation.

use crate::geometry::{Envelope, Location, Shape};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Stable agent handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u64);

/// Stable category (species) handle. Each category owns at most one spatial index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryId(pub u32);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "category#{}", self.0)
    }
}

/// Read access to the agent population.
///
/// Only location, envelope, category and liveness are ever asked for.
pub trait AgentCatalog: Sync {
    fn shape(&self, agent: AgentId) -> Option<&Shape>;

    fn category(&self, agent: AgentId) -> Option<CategoryId>;

    fn is_dead(&self, agent: AgentId) -> bool;

    /// Live members of exactly this category (sub-categories excluded).
    fn members(&self, category: CategoryId) -> Vec<AgentId>;

    fn parent(&self, category: CategoryId) -> Option<CategoryId>;

    /// Live descendants of `category`, transitively, parents before children.
    fn sub_categories(&self, category: CategoryId) -> Vec<CategoryId>;

    /// Bumped whenever the category tree changes so cached resolutions can be dropped.
    fn hierarchy_version(&self) -> u64 {
        0
    }

    fn envelope(&self, agent: AgentId) -> Option<Envelope> {
        self.shape(agent).map(Shape::envelope)
    }

    /// `category` is `ancestor` or one of its descendants.
    fn is_kind_of(&self, category: CategoryId, ancestor: CategoryId) -> bool {
        let mut current = Some(category);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.parent(c);
        }
        false
    }
}

/// Creates agents, used when a topology populates itself from its places.
pub trait AgentSpawner {
    fn spawn(&mut self, category: CategoryId, shape: Shape) -> AgentId;
}

/// The geometry a query is issued from: a bare shape, or an agent's own shape.
/// When it is an agent, that agent never shows up in the results.
#[derive(Clone, Copy, Debug)]
pub struct QuerySource<'a> {
    pub shape: &'a Shape,
    pub agent: Option<AgentId>,
}

impl<'a> QuerySource<'a> {
    pub fn from_shape(shape: &'a Shape) -> Self {
        QuerySource { shape, agent: None }
    }

    /// `None` when the agent is unknown to the catalog.
    pub fn of_agent<C: AgentCatalog + ?Sized>(agent: AgentId, catalog: &'a C) -> Option<Self> {
        catalog.shape(agent).map(|shape| QuerySource {
            shape,
            agent: Some(agent),
        })
    }

    pub fn is_self(&self, agent: AgentId) -> bool {
        self.agent == Some(agent)
    }
}

#[derive(Clone, Debug)]
pub struct AgentRecord {
    pub id: AgentId,
    pub category: CategoryId,
    pub shape: Shape,
    pub dead: bool,
}

#[derive(Clone, Debug)]
pub struct CategoryRecord {
    pub id: CategoryId,
    pub name: String,
    pub parent: Option<CategoryId>,
    members: IndexSet<AgentId>,
}

/// In-memory population manager: categories (with their hierarchy) and agents.
#[derive(Debug, Default)]
pub struct AgentStore {
    agents: IndexMap<AgentId, AgentRecord>,
    categories: IndexMap<CategoryId, CategoryRecord>,
    next_agent: u64,
    next_category: u32,
    hierarchy_version: u64,
}

impl AgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a category, optionally as a sub-category of `parent`.
    pub fn add_category(&mut self, name: &str, parent: Option<CategoryId>) -> CategoryId {
        let id = CategoryId(self.next_category);
        self.next_category += 1;
        let parent = parent.filter(|p| self.categories.contains_key(p));
        self.categories.insert(
            id,
            CategoryRecord {
                id,
                name: name.to_string(),
                parent,
                members: IndexSet::new(),
            },
        );
        self.hierarchy_version += 1;
        debug!("[AgentStore] category {} '{}' registered", id, name);
        id
    }

    pub fn category_by_name(&self, name: &str) -> Option<CategoryId> {
        self.categories
            .values()
            .find(|c| c.name == name)
            .map(|c| c.id)
    }

    pub fn categories(&self) -> impl Iterator<Item = CategoryId> + '_ {
        self.categories.keys().copied()
    }

    /// Drop a category and every agent in it. Sub-categories are re-parented
    /// to the removed category's parent. Returns the removed agents.
    pub fn remove_category(&mut self, category: CategoryId) -> Vec<AgentId> {
        let Some(record) = self.categories.shift_remove(&category) else {
            return Vec::new();
        };
        for child in self.categories.values_mut() {
            if child.parent == Some(category) {
                child.parent = record.parent;
            }
        }
        let removed: Vec<AgentId> = record.members.into_iter().collect();
        for id in &removed {
            self.agents.shift_remove(id);
        }
        self.hierarchy_version += 1;
        removed
    }

    pub fn get(&self, agent: AgentId) -> Option<&AgentRecord> {
        self.agents.get(&agent)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentRecord> + '_ {
        self.agents.values()
    }

    /// Replace an agent's shape. Returns the envelope it had before the move,
    /// which is what the topology must be told about.
    pub fn move_agent(&mut self, agent: AgentId, shape: Shape) -> Option<Envelope> {
        let record = self.agents.get_mut(&agent)?;
        let previous = record.shape.envelope();
        record.shape = shape;
        Some(previous)
    }

    /// Move an agent so its centroid lands on `target`, keeping its outline.
    /// Returns the envelope it had before the move.
    pub fn move_agent_to(&mut self, agent: AgentId, target: Location) -> Option<Envelope> {
        let shape = &self.agents.get(&agent)?.shape;
        let current = shape.location();
        let moved = shape.translated(target.x - current.x, target.y - current.y);
        self.move_agent(agent, moved)
    }

    /// Mark an agent dead. It stays resolvable (queries skip it) until purged.
    pub fn kill(&mut self, agent: AgentId) -> bool {
        let Some(record) = self.agents.get_mut(&agent) else {
            return false;
        };
        record.dead = true;
        if let Some(cat) = self.categories.get_mut(&record.category) {
            cat.members.shift_remove(&agent);
        }
        true
    }

    /// Forget dead agents entirely.
    pub fn purge_dead(&mut self) -> usize {
        let before = self.agents.len();
        self.agents.retain(|_, r| !r.dead);
        before - self.agents.len()
    }
}

impl AgentSpawner for AgentStore {
    fn spawn(&mut self, category: CategoryId, shape: Shape) -> AgentId {
        let id = AgentId(self.next_agent);
        self.next_agent += 1;
        if let Some(cat) = self.categories.get_mut(&category) {
            cat.members.insert(id);
        }
        self.agents.insert(
            id,
            AgentRecord {
                id,
                category,
                shape,
                dead: false,
            },
        );
        id
    }
}

impl AgentCatalog for AgentStore {
    fn shape(&self, agent: AgentId) -> Option<&Shape> {
        self.agents.get(&agent).map(|r| &r.shape)
    }

    fn category(&self, agent: AgentId) -> Option<CategoryId> {
        self.agents.get(&agent).map(|r| r.category)
    }

    fn is_dead(&self, agent: AgentId) -> bool {
        self.agents.get(&agent).map_or(true, |r| r.dead)
    }

    fn members(&self, category: CategoryId) -> Vec<AgentId> {
        self.categories
            .get(&category)
            .map(|c| c.members.iter().copied().collect())
            .unwrap_or_default()
    }

    fn parent(&self, category: CategoryId) -> Option<CategoryId> {
        self.categories.get(&category).and_then(|c| c.parent)
    }

    fn sub_categories(&self, category: CategoryId) -> Vec<CategoryId> {
        let mut found = Vec::new();
        let mut frontier = vec![category];
        while let Some(current) = frontier.pop() {
            for child in self.categories.values() {
                if child.parent == Some(current) && !found.contains(&child.id) {
                    found.push(child.id);
                    frontier.push(child.id);
                }
            }
        }
        found
    }

    fn hierarchy_version(&self) -> u64 {
        self.hierarchy_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_categories_are_transitive() {
        let mut store = AgentStore::new();
        let animal = store.add_category("animal", None);
        let wolf = store.add_category("wolf", Some(animal));
        let alpha = store.add_category("alpha_wolf", Some(wolf));
        let plant = store.add_category("plant", None);

        let subs = store.sub_categories(animal);
        assert_eq!(subs, vec![wolf, alpha]);
        assert!(store.sub_categories(plant).is_empty());
        assert!(store.is_kind_of(alpha, animal));
        assert!(!store.is_kind_of(plant, animal));
    }

    #[test]
    fn move_returns_previous_envelope() {
        let mut store = AgentStore::new();
        let c = store.add_category("boid", None);
        let a = store.spawn(c, Shape::point(1.0, 2.0));
        let prev = store.move_agent(a, Shape::point(5.0, 5.0)).unwrap();
        assert_eq!(prev, Envelope::from_point(1.0, 2.0));
        assert_eq!(store.envelope(a), Some(Envelope::from_point(5.0, 5.0)));
    }

    #[test]
    fn move_to_keeps_the_outline() {
        let mut store = AgentStore::new();
        let c = store.add_category("pond", None);
        let a = store.spawn(c, Shape::rect(0.0, 0.0, 4.0, 2.0));
        let prev = store.move_agent_to(a, Location::new(10.0, 10.0)).unwrap();
        assert_eq!(prev, Envelope::new(0.0, 0.0, 4.0, 2.0));
        let env = store.envelope(a).unwrap();
        assert!((env.min_x - 8.0).abs() < 1e-9 && (env.max_x - 12.0).abs() < 1e-9);
        assert!((env.min_y - 9.0).abs() < 1e-9 && (env.max_y - 11.0).abs() < 1e-9);
        assert_eq!(store.shape(a).unwrap().dimension(), 2);
        assert!(store.move_agent_to(AgentId(99), Location::new(0.0, 0.0)).is_none());
    }

    #[test]
    fn category_lookup_by_name() {
        let mut store = AgentStore::new();
        let wolf = store.add_category("wolf", None);
        assert_eq!(store.category_by_name("wolf"), Some(wolf));
        assert_eq!(store.category_by_name("sheep"), None);
    }

    #[test]
    fn killed_agents_leave_membership() {
        let mut store = AgentStore::new();
        let c = store.add_category("boid", None);
        let a = store.spawn(c, Shape::point(0.0, 0.0));
        let b = store.spawn(c, Shape::point(1.0, 0.0));
        assert!(store.kill(a));
        assert!(store.is_dead(a));
        assert_eq!(store.members(c), vec![b]);
        assert_eq!(store.purge_dead(), 1);
        assert!(store.get(a).is_none());
    }

    #[test]
    fn removing_category_bumps_hierarchy_and_reparents() {
        let mut store = AgentStore::new();
        let root = store.add_category("root", None);
        let mid = store.add_category("mid", Some(root));
        let leaf = store.add_category("leaf", Some(mid));
        let a = store.spawn(mid, Shape::point(0.0, 0.0));
        let version = store.hierarchy_version();

        assert_eq!(store.remove_category(mid), vec![a]);
        assert!(store.hierarchy_version() > version);
        assert_eq!(store.parent(leaf), Some(root));
        assert!(store.get(a).is_none());
    }
}
