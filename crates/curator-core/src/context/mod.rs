//! Task-scoped context indexes: building, per-turn curation, change
//! propagation and rendering.

pub mod builder;
pub mod curator;
pub mod index;
pub mod propagator;
pub mod render;
