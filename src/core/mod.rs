//! Core types shared by every spatial component: agent handles and the
//! catalog trait, query filters, configuration and errors.

pub mod agent;
pub mod config;
pub mod error;
pub mod filter;

pub use agent::{AgentCatalog, AgentId, AgentSpawner, AgentStore, CategoryId, QuerySource};
pub use config::TopologyConfig;
pub use error::{Result, TopologyError};
pub use filter::Filter;
