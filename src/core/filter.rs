//! Query filters
//!
//! Which agents a spatial query may return. The shape of the filter also
//! decides which per-category indexes the compound index has to visit.

use super::agent::{AgentCatalog, AgentId, CategoryId};
use indexmap::IndexSet;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Filter {
    /// Exactly these agents.
    AgentList(IndexSet<AgentId>),
    /// Agents of this category or any of its sub-categories.
    Category(CategoryId),
    /// Agents of exactly these populations.
    PopulationSet(Vec<CategoryId>),
    /// Any agent of an already indexed category.
    #[default]
    Any,
}

impl Filter {
    pub fn agents<I: IntoIterator<Item = AgentId>>(agents: I) -> Self {
        Filter::AgentList(agents.into_iter().collect())
    }

    pub fn category(category: CategoryId) -> Self {
        Filter::Category(category)
    }

    pub fn populations<I: IntoIterator<Item = CategoryId>>(categories: I) -> Self {
        Filter::PopulationSet(categories.into_iter().collect())
    }

    pub fn has_agent_list(&self) -> bool {
        matches!(self, Filter::AgentList(_))
    }

    pub fn accepts<C: AgentCatalog + ?Sized>(&self, agent: AgentId, catalog: &C) -> bool {
        match self {
            Filter::AgentList(list) => list.contains(&agent),
            Filter::Category(category) => catalog
                .category(agent)
                .is_some_and(|c| catalog.is_kind_of(c, *category)),
            Filter::PopulationSet(categories) => catalog
                .category(agent)
                .is_some_and(|c| categories.contains(&c)),
            Filter::Any => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::{AgentSpawner, AgentStore};
    use crate::geometry::Shape;

    #[test]
    fn category_filter_accepts_sub_categories() {
        let mut store = AgentStore::new();
        let animal = store.add_category("animal", None);
        let wolf = store.add_category("wolf", Some(animal));
        let plant = store.add_category("plant", None);
        let w = store.spawn(wolf, Shape::point(0.0, 0.0));
        let p = store.spawn(plant, Shape::point(0.0, 0.0));

        let f = Filter::category(animal);
        assert!(f.accepts(w, &store));
        assert!(!f.accepts(p, &store));

        let pops = Filter::populations([animal]);
        assert!(!pops.accepts(w, &store));
        assert!(Filter::populations([wolf]).accepts(w, &store));
    }

    #[test]
    fn agent_list_is_exact() {
        let store = AgentStore::new();
        let f = Filter::agents([AgentId(3), AgentId(7)]);
        assert!(f.has_agent_list());
        assert!(f.accepts(AgentId(7), &store));
        assert!(!f.accepts(AgentId(4), &store));
        assert!(Filter::Any.accepts(AgentId(4), &store));
    }
}
