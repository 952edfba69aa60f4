// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded, severity-tagged error aggregation.
//!
//! Compilation workers fail independently; their failures are collected
//! here instead of cancelling siblings, and the enclosing processor decides
//! at the phase boundary whether the aggregate constitutes overall failure.

use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default cap on retained errors.
const DEFAULT_MAX_ERRORS: usize = 100;

/// How much stderr to include when formatting a single error.
const STDERR_PREVIEW_LEN: usize = 500;

/// Severity of one build error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Build phase an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Download,
    Compile,
    Link,
    Image,
    Upload,
    Monitor,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Download => write!(f, "download"),
            Phase::Compile => write!(f, "compile"),
            Phase::Link => write!(f, "link"),
            Phase::Image => write!(f, "image"),
            Phase::Upload => write!(f, "upload"),
            Phase::Monitor => write!(f, "monitor"),
        }
    }
}

/// One collected build error.
#[derive(Debug, Clone)]
pub struct BuildError {
    pub severity: Severity,
    pub phase: Phase,
    pub file_path: Option<PathBuf>,
    pub message: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Epoch seconds when collected
    pub timestamp: u64,
}

impl BuildError {
    pub fn new(severity: Severity, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            severity,
            phase,
            file_path: None,
            message: message.into(),
            stdout: None,
            stderr: None,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = Some(stderr.into());
        self
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }

    /// Human-readable one-error block.
    pub fn format(&self) -> String {
        let mut lines = vec![format!("[{}] {}: {}", self.severity, self.phase, self.message)];

        if let Some(path) = &self.file_path {
            lines.push(format!("  File: {}", path.display()));
        }

        if let Some(stderr) = &self.stderr {
            let mut preview: String = stderr.chars().take(STDERR_PREVIEW_LEN).collect();
            if stderr.chars().count() > STDERR_PREVIEW_LEN {
                preview.push_str("... (truncated)");
            }
            lines.push(format!("  stderr: {}", preview));
        }

        lines.join("\n")
    }
}

/// Error counts by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorCounts {
    pub warnings: usize,
    pub errors: usize,
    pub fatal: usize,
    pub total: usize,
}

/// Collects errors across parallel build work.
#[derive(Default)]
pub struct ErrorCollector {
    errors: Mutex<Vec<BuildError>>,
    max_errors: usize,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ERRORS)
    }

    pub fn with_capacity(max_errors: usize) -> Self {
        Self {
            errors: Mutex::new(Vec::new()),
            max_errors,
        }
    }

    /// Add an error, dropping the oldest when full.
    pub fn add(&self, error: BuildError) {
        let mut errors = self.errors.lock();
        if errors.len() >= self.max_errors {
            errors.remove(0);
        }
        errors.push(error);
    }

    /// All errors, optionally filtered by severity.
    pub fn get_errors(&self, severity: Option<Severity>) -> Vec<BuildError> {
        let errors = self.errors.lock();
        match severity {
            Some(s) => errors.iter().filter(|e| e.severity == s).cloned().collect(),
            None => errors.clone(),
        }
    }

    pub fn get_errors_by_phase(&self, phase: Phase) -> Vec<BuildError> {
        self.errors
            .lock()
            .iter()
            .filter(|e| e.phase == phase)
            .cloned()
            .collect()
    }

    pub fn has_fatal(&self) -> bool {
        self.errors
            .lock()
            .iter()
            .any(|e| e.severity == Severity::Fatal)
    }

    /// Any Error or Fatal entries (warnings don't count).
    pub fn has_errors(&self) -> bool {
        self.errors
            .lock()
            .iter()
            .any(|e| e.severity >= Severity::Error)
    }

    pub fn first_fatal(&self) -> Option<BuildError> {
        self.errors
            .lock()
            .iter()
            .find(|e| e.severity == Severity::Fatal)
            .cloned()
    }

    pub fn error_counts(&self) -> ErrorCounts {
        let errors = self.errors.lock();
        ErrorCounts {
            warnings: errors.iter().filter(|e| e.severity == Severity::Warning).count(),
            errors: errors.iter().filter(|e| e.severity == Severity::Error).count(),
            fatal: errors.iter().filter(|e| e.severity == Severity::Fatal).count(),
            total: errors.len(),
        }
    }

    /// Full human-readable report, optionally capped at `max` entries.
    pub fn format_errors(&self, max: Option<usize>) -> String {
        let errors = self.errors.lock();
        if errors.is_empty() {
            return "No errors".to_string();
        }

        let shown = max.unwrap_or(errors.len()).min(errors.len());
        let mut blocks: Vec<String> = errors.iter().take(shown).map(BuildError::format).collect();

        if shown < errors.len() {
            blocks.push(format!("... and {} more errors", errors.len() - shown));
        }

        drop(errors);
        let counts = self.error_counts();
        blocks.push(format!(
            "Summary: {} fatal, {} errors, {} warnings",
            counts.fatal, counts.errors, counts.warnings
        ));

        blocks.join("\n\n")
    }

    /// Brief severity summary, e.g. `1 fatal, 2 errors`.
    pub fn format_summary(&self) -> String {
        let counts = self.error_counts();
        if counts.total == 0 {
            return "No errors".to_string();
        }

        let mut parts = Vec::new();
        if counts.fatal > 0 {
            parts.push(format!("{} fatal", counts.fatal));
        }
        if counts.errors > 0 {
            parts.push(format!("{} errors", counts.errors));
        }
        if counts.warnings > 0 {
            parts.push(format!("{} warnings", counts.warnings));
        }
        parts.join(", ")
    }

    pub fn clear(&self) {
        self.errors.lock().clear();
    }
}

#[cfg(test)]
#[path = "error_collector_tests.rs"]
mod tests;
