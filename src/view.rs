/// Per-view chart state: zoom history per nucleus and the assignment slots
///
/// Everything here belongs to one `SpectraView`; two views never share zoom
/// stacks or activations.

use std::collections::HashMap;

use crate::assignment::{ActivationMode, AssignmentState};

/// Stack of previous horizontal windows for one nucleus
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoomHistory {
    stack: Vec<(f64, f64)>,
}

impl ZoomHistory {
    /// Record a new window (stored as `(min, max)`)
    pub fn push(&mut self, from: f64, to: f64) {
        let window = (from.min(to), from.max(to));
        if self.stack.last() != Some(&window) {
            self.stack.push(window);
        }
    }

    /// Drop the current window and return the one before it
    pub fn pop(&mut self) -> Option<(f64, f64)> {
        self.stack.pop();
        self.stack.last().copied()
    }

    pub fn current(&self) -> Option<(f64, f64)> {
        self.stack.last().copied()
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// Default ppm window for a nucleus
pub fn default_ppm_range(nucleus: &str) -> Option<(f64, f64)> {
    match nucleus {
        "1H" => Some((-1.0, 14.0)),
        "13C" => Some((-10.0, 230.0)),
        "19F" => Some((-230.0, 30.0)),
        "31P" => Some((-50.0, 100.0)),
        "15N" => Some((0.0, 350.0)),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpectraView {
    assignment: AssignmentState,
    zoom: HashMap<String, ZoomHistory>,
}

impl SpectraView {
    pub fn new(mode: ActivationMode) -> Self {
        Self {
            assignment: AssignmentState::new(mode),
            zoom: HashMap::new(),
        }
    }

    pub fn assignment(&self) -> &AssignmentState {
        &self.assignment
    }

    pub fn assignment_mut(&mut self) -> &mut AssignmentState {
        &mut self.assignment
    }

    pub fn zoom_history(&mut self, nucleus: &str) -> &mut ZoomHistory {
        self.zoom.entry(nucleus.to_string()).or_default()
    }

    pub fn zoom_in(&mut self, nucleus: &str, from: f64, to: f64) {
        self.zoom_history(nucleus).push(from, to);
    }

    /// Previous window for `nucleus`, falling back to the nucleus default
    pub fn zoom_out(&mut self, nucleus: &str) -> Option<(f64, f64)> {
        self.zoom_history(nucleus)
            .pop()
            .or_else(|| default_ppm_range(nucleus))
    }

    /// Current window for `nucleus`, or its default
    pub fn window(&self, nucleus: &str) -> Option<(f64, f64)> {
        self.zoom
            .get(nucleus)
            .and_then(ZoomHistory::current)
            .or_else(|| default_ppm_range(nucleus))
    }

    pub fn reset_zoom(&mut self, nucleus: &str) {
        if let Some(history) = self.zoom.get_mut(nucleus) {
            history.clear();
        }
    }
}
