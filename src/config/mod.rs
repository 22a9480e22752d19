//! Configuration document schema and its persistence collaborator.

pub mod schema;
pub mod store;

pub use schema::AgentConfig;
pub use store::ConfigStore;
