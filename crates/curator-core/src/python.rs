//! PyO3 bindings for the governance toolkit.
//!
//! Structured results cross the boundary as JSON and are decoded with
//! Python's `json` module, so callers get plain dicts and lists.

use std::path::PathBuf;

use pyo3::prelude::*;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::context::builder::BuildRequest;
use crate::context::curator::TurnRequest;
use crate::context::propagator::ChangeType;
use crate::engine::ContextEngine;
use crate::errors::CuratorError;

fn to_py<T: Serialize + ?Sized>(py: Python<'_>, value: &T) -> PyResult<PyObject> {
    let text = serde_json::to_string(value).map_err(CuratorError::from)?;
    let json = py.import("json")?;
    Ok(json.call_method1("loads", (text,))?.unbind())
}

#[pyclass]
pub struct ContextCurator {
    engine: ContextEngine,
}

#[pymethods]
impl ContextCurator {
    /// Scan `project_root`; configuration comes from `CURATOR_*` variables.
    #[new]
    #[pyo3(signature = (project_root, db_path=None))]
    fn new(project_root: PathBuf, db_path: Option<PathBuf>) -> PyResult<Self> {
        let config = EngineConfig::from_env();
        let engine = match db_path {
            Some(db_path) => ContextEngine::with_store(project_root, config, db_path)?,
            None => ContextEngine::new(project_root, config)?,
        };
        Ok(Self { engine })
    }

    #[pyo3(signature = (target_name, max_depth=2))]
    fn find_related_code(&self, py: Python<'_>, target_name: &str, max_depth: usize) -> PyResult<PyObject> {
        to_py(py, &self.engine.find_related_code(target_name, max_depth))
    }

    #[pyo3(signature = (task_id, focus_areas, decisions=None, specs=None, assumptions=None, active_file=None))]
    fn build_context_index(
        &mut self,
        py: Python<'_>,
        task_id: &str,
        focus_areas: Vec<String>,
        decisions: Option<Vec<String>>,
        specs: Option<Vec<String>>,
        assumptions: Option<Vec<String>>,
        active_file: Option<String>,
    ) -> PyResult<PyObject> {
        let mut request = BuildRequest::new(task_id, &focus_areas)
            .with_decisions(&decisions.unwrap_or_default())
            .with_specs(&specs.unwrap_or_default())
            .with_assumptions(&assumptions.unwrap_or_default());
        request.active_file = active_file;
        let index = self.engine.build_context_index_with(&request)?;
        to_py(py, index)
    }

    fn get_context(&self, py: Python<'_>, ctx_id: &str) -> PyResult<Option<PyObject>> {
        self.engine
            .get_context(ctx_id)
            .map(|index| to_py(py, index))
            .transpose()
    }

    fn list_contexts(&self) -> Vec<String> {
        self.engine.list_contexts()
    }

    fn slice_code(&self, py: Python<'_>, file_path: &str, element_names: Vec<String>) -> PyResult<PyObject> {
        to_py(py, &self.engine.slice_code(file_path, &element_names)?)
    }

    fn get_project_structure(&self, py: Python<'_>) -> PyResult<PyObject> {
        to_py(py, &self.engine.get_project_structure())
    }

    #[pyo3(signature = (path=".", include_signatures=true))]
    fn structure_map(&self, path: &str, include_signatures: bool) -> String {
        self.engine.structure_map(path, include_signatures)
    }

    #[pyo3(signature = (ctx_id, focus=None, requested=None, active_file=None))]
    fn evaluate_context_on_turn(
        &mut self,
        py: Python<'_>,
        ctx_id: &str,
        focus: Option<Vec<String>>,
        requested: Option<Vec<String>>,
        active_file: Option<String>,
    ) -> PyResult<PyObject> {
        let request = TurnRequest {
            focus,
            requested: requested.unwrap_or_default(),
            active_file,
        };
        let report = self.engine.run_turn(ctx_id, &request)?;
        to_py(py, &report.items)
    }

    #[pyo3(signature = (ctx_id, change_type, description, affected_items=Vec::new()))]
    fn update_context_on_change(
        &mut self,
        ctx_id: &str,
        change_type: &str,
        description: &str,
        affected_items: Vec<String>,
    ) -> PyResult<bool> {
        let change_type: ChangeType = change_type.parse()?;
        Ok(self
            .engine
            .update_context_on_change(ctx_id, change_type, description, &affected_items))
    }

    fn render_context(&self, ctx_id: &str) -> Option<String> {
        self.engine.render_context(ctx_id)
    }

    fn archive_context(&mut self, ctx_id: &str) -> bool {
        self.engine.archive_context(ctx_id)
    }
}

#[pyfunction]
pub fn detect_language(path: &str) -> Option<String> {
    crate::indexer::filesystem::detect_language(path)
}

#[pyfunction]
pub fn compute_content_hash(data: &[u8]) -> String {
    crate::indexer::filesystem::compute_content_hash(data)
}
