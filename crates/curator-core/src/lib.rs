//! Curator core: the context curation engine behind the agent governance
//! toolkit.
//!
//! A project tree is parsed into structural elements, linked into a
//! dependency graph, and distilled into per-task context indexes that are
//! re-curated every agent turn and kept current as the project changes.
//! With the `python` feature the crate also builds as the `_curator_core`
//! extension module.

pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod indexer;
pub mod models;
pub mod query;
pub mod store;

#[cfg(feature = "python")]
pub mod python;

pub use config::EngineConfig;
pub use engine::ContextEngine;
pub use errors::{CuratorError, CuratorResult};

#[cfg(feature = "python")]
use pyo3::prelude::*;

// ---------------------------------------------------------------------------
// Top-level Python module: _curator_core
// ---------------------------------------------------------------------------

#[cfg(feature = "python")]
#[pymodule]
fn _curator_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::ContextCurator>()?;

    m.add("REMOVAL_THRESHOLD", query::guards::REMOVAL_THRESHOLD)?;
    m.add("MAX_RELATED_DEPTH", query::guards::MAX_RELATED_DEPTH)?;
    m.add("MAX_PROPAGATION_DEPTH", query::guards::MAX_PROPAGATION_DEPTH)?;
    m.add("MAX_CONTEXT_ITEMS", query::guards::MAX_CONTEXT_ITEMS)?;
    m.add("MAX_GRAPH_VISITED", query::guards::MAX_GRAPH_VISITED)?;

    m.add_function(wrap_pyfunction!(python::detect_language, m)?)?;
    m.add_function(wrap_pyfunction!(python::compute_content_hash, m)?)?;
    Ok(())
}
