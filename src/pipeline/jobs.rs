/// Background replay with last-writer-wins per spectrum
///
/// Each request for a spectrum takes a new generation ticket. A running
/// replay checks its ticket between filters and stops as soon as a newer
/// request exists; finished results are only handed back while the ticket is
/// still current.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::data::spectrum::SpectrumBuffer;
use super::error::ProcessingError;
use super::filters;
use super::history::FilterEntry;

/// Generation ticket for one request on one spectrum
#[derive(Debug, Clone)]
pub struct JobTicket {
    spectrum_id: String,
    generation: u64,
    latest: Arc<AtomicU64>,
}

impl JobTicket {
    pub fn spectrum_id(&self) -> &str {
        &self.spectrum_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.latest.load(Ordering::Acquire) == self.generation
    }

    pub fn ensure_current(&self) -> Result<(), ProcessingError> {
        if self.is_current() {
            Ok(())
        } else {
            Err(ProcessingError::Superseded(self.spectrum_id.clone()))
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct JobTracker {
    generations: Arc<Mutex<HashMap<String, Arc<AtomicU64>>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new request for `spectrum_id`, superseding any earlier one
    pub fn ticket(&self, spectrum_id: &str) -> JobTicket {
        let latest = {
            let mut map = match self.generations.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            map.entry(spectrum_id.to_string())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                .clone()
        };
        let generation = latest.fetch_add(1, Ordering::AcqRel) + 1;
        JobTicket {
            spectrum_id: spectrum_id.to_string(),
            generation,
            latest,
        }
    }

    /// Replay `entries` on a worker thread under a fresh ticket.
    ///
    /// The ticket comes back with the handle; pass it to
    /// `FilterPipeline::accept_replay` so a result that lost the race is refused.
    pub fn spawn_replay(
        &self,
        spectrum_id: &str,
        original: SpectrumBuffer,
        entries: Vec<FilterEntry>,
    ) -> (JobTicket, JoinHandle<Result<SpectrumBuffer, ProcessingError>>) {
        let ticket = self.ticket(spectrum_id);
        let worker_ticket = ticket.clone();
        let handle = thread::spawn(move || replay_job(&worker_ticket, &original, &entries));
        (ticket, handle)
    }
}

/// Replay the active entries, giving up once `ticket` is superseded
pub fn replay_job(
    ticket: &JobTicket,
    original: &SpectrumBuffer,
    entries: &[FilterEntry],
) -> Result<SpectrumBuffer, ProcessingError> {
    let mut buffer = original.clone();
    for entry in entries.iter().filter(|e| e.is_active()) {
        ticket.ensure_current()?;
        let options = filters::resolve(&buffer, &entry.options)?;
        buffer = filters::apply_filter(&buffer, &options)?;
    }
    ticket.ensure_current()?;
    log::debug!(
        "Replay of {} (generation {}) finished",
        ticket.spectrum_id,
        ticket.generation
    );
    Ok(buffer)
}
