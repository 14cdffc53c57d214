/// Reproducibility log
///
/// Every filter applied to a spectrum and every detection pass is recorded
/// with a timestamp, a description, and the equivalent NMRPipe command where
/// one exists. Soft failures (for example a multiplet that could not be
/// analysed) are recorded as warnings so they stay visible after the run.
///
/// The log can be exported as human-readable text, JSON, or a shell script
/// replaying the filter steps with NMRPipe.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryLevel {
    Operation,
    Warning,
}

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Sequential number (1-based)
    pub sequence: usize,
    pub timestamp: DateTime<Local>,
    pub level: EntryLevel,
    /// Spectrum the entry refers to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectrum_id: Option<String>,
    pub operation: String,
    pub description: String,
    /// Equivalent NMRPipe command; empty when there is none
    #[serde(default)]
    pub nmrpipe_command: String,
}

impl LogEntry {
    pub fn to_text(&self) -> String {
        let tag = match self.level {
            EntryLevel::Operation => "",
            EntryLevel::Warning => "WARNING ",
        };
        let spectrum = self
            .spectrum_id
            .as_deref()
            .map(|id| format!(" [{}]", id))
            .unwrap_or_default();
        format!(
            "[{:03}] {} | {}{}{} | {}\n      Command: {}",
            self.sequence,
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            tag,
            self.operation,
            spectrum,
            self.description,
            if self.nmrpipe_command.is_empty() {
                "(n/a)"
            } else {
                &self.nmrpipe_command
            }
        )
    }

    pub fn to_shell_line(&self) -> String {
        let header = format!("# Step {}: {}: {}", self.sequence, self.operation, self.description);
        if self.level == EntryLevel::Warning
            || self.nmrpipe_command.is_empty()
            || self.nmrpipe_command.starts_with('#')
        {
            header
        } else {
            format!("{}\n{}", header, self.nmrpipe_command)
        }
    }
}

/// Ordered record of everything done in one processing session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReproLog {
    pub session_id: String,
    pub session_start: DateTime<Local>,
    pub source_file: String,
    pub software_version: String,
    pub entries: Vec<LogEntry>,
}

impl ReproLog {
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            session_start: Local::now(),
            source_file: String::new(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            entries: Vec::new(),
        }
    }

    pub fn set_source(&mut self, source: &str) {
        self.source_file = source.to_string();
    }

    /// Record an operation
    pub fn add_entry(&mut self, operation: &str, description: &str, nmrpipe_command: &str) {
        self.push(EntryLevel::Operation, None, operation, description, nmrpipe_command);
        log::info!("[LOG {:03}] {}: {}", self.entries.len(), operation, description);
    }

    /// Record an operation on a given spectrum
    pub fn add_spectrum_entry(
        &mut self,
        spectrum_id: &str,
        operation: &str,
        description: &str,
        nmrpipe_command: &str,
    ) {
        self.push(
            EntryLevel::Operation,
            Some(spectrum_id),
            operation,
            description,
            nmrpipe_command,
        );
        log::info!(
            "[LOG {:03}] {} on {}: {}",
            self.entries.len(),
            operation,
            spectrum_id,
            description
        );
    }

    /// Record a soft failure
    pub fn add_warning(&mut self, operation: &str, description: &str) {
        self.push(EntryLevel::Warning, None, operation, description, "");
        log::warn!("[LOG {:03}] {}: {}", self.entries.len(), operation, description);
    }

    fn push(
        &mut self,
        level: EntryLevel,
        spectrum_id: Option<&str>,
        operation: &str,
        description: &str,
        nmrpipe_command: &str,
    ) {
        let sequence = self.entries.len() + 1;
        self.entries.push(LogEntry {
            sequence,
            timestamp: Local::now(),
            level,
            spectrum_id: spectrum_id.map(str::to_string),
            operation: operation.to_string(),
            description: description.to_string(),
            nmrpipe_command: nmrpipe_command.to_string(),
        });
    }

    /// Remove the last entry (undo)
    pub fn pop_entry(&mut self) -> Option<LogEntry> {
        self.entries.pop()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.level == EntryLevel::Warning)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("═══════════════════════════════════════════════════════════════\n");
        out.push_str("  NMR Processing Reproducibility Log\n");
        out.push_str("═══════════════════════════════════════════════════════════════\n");
        out.push_str(&format!("  Session ID:  {}\n", self.session_id));
        out.push_str(&format!(
            "  Started:     {}\n",
            self.session_start.format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str(&format!("  Source:      {}\n", self.source_file));
        out.push_str(&format!("  Software:    nmr-process v{}\n", self.software_version));
        out.push_str(&format!("  Operations:  {}\n", self.entries.len()));
        out.push_str(&format!("  Warnings:    {}\n", self.warnings().count()));
        out.push_str("───────────────────────────────────────────────────────────────\n\n");

        for entry in &self.entries {
            out.push_str(&entry.to_text());
            out.push_str("\n\n");
        }
        out
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("JSON error: {}", e))
    }

    /// Shell script replaying the filter steps with NMRPipe
    pub fn to_shell_script(&self) -> String {
        let mut out = String::new();
        out.push_str("#!/bin/bash\n");
        out.push_str("#\n");
        out.push_str("# NMR Processing Reproducibility Script\n");
        out.push_str(&format!("# Generated by nmr-process v{}\n", self.software_version));
        out.push_str(&format!(
            "# Session: {} ({})\n",
            self.session_id,
            self.session_start.format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str(&format!("# Source: {}\n", self.source_file));
        out.push_str("# Requirements: NMRPipe must be installed and in PATH.\n");
        out.push_str("#\n");
        out.push_str("set -euo pipefail\n\n");

        for entry in &self.entries {
            out.push_str(&entry.to_shell_line());
            out.push_str("\n\n");
        }

        out.push_str("echo \"Processing complete.\"\n");
        out
    }

    pub fn save_text(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_text())
    }

    pub fn save_json(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_json())
    }

    pub fn save_script(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_shell_script())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }
}

impl Default for ReproLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_numbers() {
        let mut log = ReproLog::new();
        assert!(log.is_empty());
        log.add_spectrum_entry("s1", "fft", "Fourier transform", "nmrPipe -fn FT -auto");
        log.add_warning("createRange", "multiplet analysis failed");
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries[1].sequence, 2);
        assert_eq!(log.warnings().count(), 1);
    }

    #[test]
    fn test_undo_pops_last() {
        let mut log = ReproLog::new();
        log.add_entry("Op1", "desc1", "cmd1");
        log.add_entry("Op2", "desc2", "cmd2");
        let popped = log.pop_entry().unwrap();
        assert_eq!(popped.operation, "Op2");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_text_export_marks_warnings() {
        let mut log = ReproLog::new();
        log.set_source("sample.json");
        log.add_entry("fft", "Fourier transform", "nmrPipe -fn FT -auto");
        log.add_warning("createRange", "no multiplet");
        let text = log.to_text();
        assert!(text.contains("nmrPipe -fn FT -auto"));
        assert!(text.contains("WARNING createRange"));
        assert!(text.contains("sample.json"));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut log = ReproLog::new();
        log.add_spectrum_entry("s1", "shiftX", "shift 0.1 ppm", "");
        let parsed: ReproLog = serde_json::from_str(&log.to_json()).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].spectrum_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_shell_script_skips_warnings() {
        let mut log = ReproLog::new();
        log.add_entry("fft", "FFT", "nmrPipe -fn FT -auto");
        log.add_warning("createRange", "nmrPipe -fn SHOULD_NOT_RUN");
        let script = log.to_shell_script();
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("\nnmrPipe -fn FT -auto"));
        assert!(!script.contains("\nnmrPipe -fn SHOULD_NOT_RUN"));
    }
}
