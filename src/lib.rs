//! evod: autonomous configuration self-management.
//!
//! A background daemon that repairs, evolves, and replicates an agent's
//! runtime configuration: a rule-based diagnostic/repair engine, a
//! genetic optimizer over configuration documents, a bounded clone
//! lifecycle, and one scheduler coordinating all three behind a
//! single-instance process lock.

pub mod commands;
pub mod config;
pub mod daemon;
pub mod evolution;
pub mod metrics;
pub mod repair;
pub mod replication;
