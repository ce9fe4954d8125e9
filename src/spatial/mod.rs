//! Spatial indexing: one R*-tree per category, grouped behind a compound index.

pub mod compound;
pub mod index;

pub use compound::{search_steps, CompoundSpatialIndex};
pub use index::SpatialIndex;
