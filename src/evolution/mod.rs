//! Population-based optimizer over configuration documents.

pub mod engine;
pub mod fitness;
pub mod operators;

pub use engine::{EvolutionParams, EvolutionaryEngine, GenerationStats, Individual};
pub use fitness::{fitness, FitnessInput};
pub use operators::MutationKind;
