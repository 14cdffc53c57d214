/// Filter history of one spectrum
///
/// The pipeline keeps the raw buffer, the ordered filter entries, and the
/// buffer obtained by replaying the active entries. Repeated once-filters are
/// merged into their first entry and the chain replayed; repeated marker
/// filters are dropped. Every change pushes a snapshot for undo/redo.

use serde::{Deserialize, Serialize};

use crate::data::spectrum::SpectrumBuffer;
use crate::log::reproducibility::ReproLog;
use super::error::ProcessingError;
use super::filters::{self, FilterKind, FilterOptions};
use super::jobs::JobTicket;

/// One applied filter as stored in the spectrum document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterEntry {
    pub id: String,
    #[serde(flatten)]
    pub options: FilterOptions,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

fn enabled_default() -> bool {
    true
}

impl FilterEntry {
    pub fn new(options: FilterOptions) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            options,
            enabled: true,
            is_deleted: false,
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.options.kind()
    }

    /// Takes part in replay
    pub fn is_active(&self) -> bool {
        self.enabled && !self.is_deleted
    }
}

/// Replay the active entries, in order, starting from `original`
pub fn replay(original: &SpectrumBuffer, entries: &[FilterEntry]) -> Result<SpectrumBuffer, ProcessingError> {
    let mut buffer = original.clone();
    for entry in entries.iter().filter(|e| e.is_active()) {
        let options = filters::resolve(&buffer, &entry.options)?;
        buffer = filters::apply_filter(&buffer, &options)?;
    }
    Ok(buffer)
}

/// Collapse the active entries with the reduce rules: once-filters keep one
/// merged entry at their first position, repeated markers are dropped.
pub fn compress(entries: &[FilterEntry]) -> Vec<FilterEntry> {
    let mut out: Vec<FilterEntry> = Vec::new();
    for entry in entries.iter().filter(|e| e.is_active()) {
        match out.iter().position(|e| e.kind() == entry.kind()) {
            Some(pos) => {
                if let Some(merged) = filters::reduce(&out[pos].options, &entry.options).reduce {
                    out[pos].options = merged;
                }
            }
            None => out.push(entry.clone()),
        }
    }
    out
}

/// What a history step did, shown when undoing
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryOp {
    Apply(FilterKind),
    Merge(FilterKind),
    Enable(FilterKind, bool),
    Delete(FilterKind),
    Reset,
}

impl std::fmt::Display for HistoryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryOp::Apply(k) => write!(f, "apply {}", k),
            HistoryOp::Merge(k) => write!(f, "update {}", k),
            HistoryOp::Enable(k, true) => write!(f, "enable {}", k),
            HistoryOp::Enable(k, false) => write!(f, "disable {}", k),
            HistoryOp::Delete(k) => write!(f, "delete {}", k),
            HistoryOp::Reset => write!(f, "reset filters"),
        }
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    entries: Vec<FilterEntry>,
    buffer: SpectrumBuffer,
}

#[derive(Debug, Clone)]
struct HistoryStep {
    op: HistoryOp,
    snapshot: Snapshot,
    /// Sequence of the log entry the step wrote
    log_sequence: Option<usize>,
}

/// Outcome of `FilterPipeline::apply`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Appended,
    Merged,
    /// Marker filter already in the chain
    Redundant,
}

#[derive(Debug, Clone)]
pub struct FilterPipeline {
    spectrum_id: String,
    original: SpectrumBuffer,
    current: SpectrumBuffer,
    entries: Vec<FilterEntry>,
    undo_stack: Vec<HistoryStep>,
    redo_stack: Vec<HistoryStep>,
}

impl FilterPipeline {
    pub fn new(spectrum_id: &str, original: SpectrumBuffer) -> Self {
        Self {
            spectrum_id: spectrum_id.to_string(),
            current: original.clone(),
            original,
            entries: Vec::new(),
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        }
    }

    /// Rebuild a pipeline from stored entries by replaying them
    pub fn with_entries(
        spectrum_id: &str,
        original: SpectrumBuffer,
        entries: Vec<FilterEntry>,
    ) -> Result<Self, ProcessingError> {
        let current = replay(&original, &entries)?;
        Ok(Self {
            spectrum_id: spectrum_id.to_string(),
            original,
            current,
            entries,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        })
    }

    pub fn spectrum_id(&self) -> &str {
        &self.spectrum_id
    }

    pub fn original(&self) -> &SpectrumBuffer {
        &self.original
    }

    pub fn current(&self) -> &SpectrumBuffer {
        &self.current
    }

    pub fn entries(&self) -> &[FilterEntry] {
        &self.entries
    }

    pub fn compressed_entries(&self) -> Vec<FilterEntry> {
        compress(&self.entries)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    fn active_position(&self, kind: FilterKind) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.is_active() && e.kind() == kind)
    }

    fn find(&self, id: &str) -> Result<usize, ProcessingError> {
        self.entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| ProcessingError::FilterNotFound(id.to_string()))
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            entries: self.entries.clone(),
            buffer: self.current.clone(),
        }
    }

    /// Commit a new state; the previous one goes on the undo stack
    fn commit(&mut self, op: HistoryOp, entries: Vec<FilterEntry>, buffer: SpectrumBuffer, log: &mut ReproLog, command: &str, description: &str) {
        let snapshot = self.snapshot();
        self.entries = entries;
        self.current = buffer;
        log.add_spectrum_entry(&self.spectrum_id, &op.to_string(), description, command);
        self.undo_stack.push(HistoryStep {
            op,
            snapshot,
            log_sequence: Some(log.len()),
        });
        self.redo_stack.clear();
    }

    /// Apply a filter to the current buffer.
    ///
    /// On error the pipeline is left exactly as it was.
    pub fn apply(&mut self, options: FilterOptions, log: &mut ReproLog) -> Result<ApplyOutcome, ProcessingError> {
        let options = filters::resolve(&self.current, &options)?;
        let kind = options.kind();

        if let Some(pos) = self.active_position(kind) {
            let reduction = filters::reduce(&self.entries[pos].options, &options);
            let merged = match reduction.reduce {
                Some(merged) if reduction.once => merged,
                _ => {
                    log::debug!("{} already applied to {}, ignored", kind, self.spectrum_id);
                    return Ok(ApplyOutcome::Redundant);
                }
            };
            let mut entries = self.entries.clone();
            entries[pos].options = merged.clone();
            let buffer = replay(&self.original, &entries)?;
            self.commit(
                HistoryOp::Merge(kind),
                entries,
                buffer,
                log,
                &merged.nmrpipe_command(),
                &merged.describe(),
            );
            return Ok(ApplyOutcome::Merged);
        }

        let buffer = filters::apply_filter(&self.current, &options)?;
        let mut entries = self.entries.clone();
        let command = options.nmrpipe_command();
        let description = options.describe();
        entries.push(FilterEntry::new(options));
        self.commit(HistoryOp::Apply(kind), entries, buffer, log, &command, &description);
        Ok(ApplyOutcome::Appended)
    }

    /// Enable or disable an entry and replay the chain
    pub fn set_enabled(&mut self, id: &str, enabled: bool, log: &mut ReproLog) -> Result<(), ProcessingError> {
        let pos = self.find(id)?;
        if self.entries[pos].enabled == enabled {
            return Ok(());
        }
        let mut entries = self.entries.clone();
        entries[pos].enabled = enabled;
        let buffer = replay(&self.original, &entries)?;
        let kind = entries[pos].kind();
        self.commit(HistoryOp::Enable(kind, enabled), entries, buffer, log, "", &format!("filter {}", id));
        Ok(())
    }

    /// Mark an entry deleted and replay the chain
    pub fn delete(&mut self, id: &str, log: &mut ReproLog) -> Result<(), ProcessingError> {
        let pos = self.find(id)?;
        if self.entries[pos].is_deleted {
            return Ok(());
        }
        let mut entries = self.entries.clone();
        entries[pos].is_deleted = true;
        let buffer = replay(&self.original, &entries)?;
        let kind = entries[pos].kind();
        self.commit(HistoryOp::Delete(kind), entries, buffer, log, "", &format!("filter {}", id));
        Ok(())
    }

    /// Drop every filter and go back to the raw buffer
    pub fn reset(&mut self, log: &mut ReproLog) {
        if self.entries.is_empty() {
            return;
        }
        let original = self.original.clone();
        self.commit(HistoryOp::Reset, Vec::new(), original, log, "", "all filters removed");
    }

    /// Undo the last change; returns what was undone
    pub fn undo(&mut self, log: &mut ReproLog) -> Option<HistoryOp> {
        let step = self.undo_stack.pop()?;
        let current = self.snapshot();
        self.entries = step.snapshot.entries;
        self.current = step.snapshot.buffer;
        // Only drop the log line if nothing was logged after it
        if step.log_sequence.is_some() && step.log_sequence == log.entries.last().map(|e| e.sequence) {
            log.pop_entry();
        } else {
            log.add_spectrum_entry(&self.spectrum_id, "undo", &step.op.to_string(), "");
        }
        self.redo_stack.push(HistoryStep {
            op: step.op.clone(),
            snapshot: current,
            log_sequence: None,
        });
        Some(step.op)
    }

    /// Redo the last undone change
    pub fn redo(&mut self, log: &mut ReproLog) -> Option<HistoryOp> {
        let step = self.redo_stack.pop()?;
        let current = self.snapshot();
        self.entries = step.snapshot.entries;
        self.current = step.snapshot.buffer;
        log.add_spectrum_entry(&self.spectrum_id, "redo", &step.op.to_string(), "");
        self.undo_stack.push(HistoryStep {
            op: step.op.clone(),
            snapshot: current,
            log_sequence: Some(log.len()),
        });
        Some(step.op)
    }

    /// Swap in a buffer computed elsewhere (background replay) for `entries`.
    ///
    /// Refused with `Superseded` once a newer request was issued for this
    /// spectrum, even if the stale job already finished.
    pub fn accept_replay(
        &mut self,
        ticket: &JobTicket,
        entries: Vec<FilterEntry>,
        buffer: SpectrumBuffer,
        log: &mut ReproLog,
    ) -> Result<(), ProcessingError> {
        if ticket.spectrum_id() != self.spectrum_id {
            return Err(ProcessingError::Superseded(ticket.spectrum_id().to_string()));
        }
        ticket.ensure_current()?;
        self.commit(HistoryOp::Reset, entries, buffer, log, "", "filters replayed in background");
        Ok(())
    }
}
