//! Shared guardrails for traversal depth, item budgets and score bounds.

// Traversal guards
pub const MAX_RELATED_DEPTH: usize = 6;
pub const MAX_PROPAGATION_DEPTH: usize = 6;
pub const MAX_SCORING_DEPTH: usize = 6;
pub const MAX_GRAPH_VISITED: usize = 5000;
pub const MAX_AMBIGUOUS_TARGETS: usize = 8;

// Context index guards
pub const MIN_CONTEXT_ITEMS: usize = 1;
pub const MAX_CONTEXT_ITEMS: usize = 512;
pub const DEFAULT_CONTEXT_ITEMS: usize = 64;
pub const MAX_FOCUS_AREAS: usize = 32;
pub const MAX_FOCUS_LENGTH: usize = 256;

/// Items scoring below this after evaluation never survive a turn.
pub const REMOVAL_THRESHOLD: f64 = 0.2;

/// Minimum length for a case-insensitive substring match on element names.
pub const MIN_SUBSTRING_MATCH: usize = 3;

pub const MAX_WORKERS: usize = 64;

pub fn clamp_int(value: usize, minimum: usize, maximum: usize) -> usize {
    value.max(minimum).min(maximum)
}

/// Depth 0 is meaningful (the node itself), so only the upper bound applies.
pub fn clamp_depth(value: usize, maximum: usize) -> usize {
    value.min(maximum)
}

pub fn clamp_budget(value: usize) -> usize {
    clamp_int(value, MIN_CONTEXT_ITEMS, MAX_CONTEXT_ITEMS)
}

pub fn clamp_workers(value: usize) -> usize {
    clamp_int(value, 1, MAX_WORKERS)
}

/// Force a relevance score into `[0, 1]`; NaN collapses to 0.
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Trim a focus area and bound its length on a char boundary.
pub fn truncate_focus(focus: &str) -> String {
    let stripped = focus.trim();
    if stripped.len() <= MAX_FOCUS_LENGTH {
        return stripped.to_string();
    }
    let mut end = MAX_FOCUS_LENGTH;
    while !stripped.is_char_boundary(end) {
        end -= 1;
    }
    stripped[..end].to_string()
}
