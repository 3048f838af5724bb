//! Command history tracking for debugging and diagnostics.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::action::ActionKind;
use crate::outcome::Outcome;

/// A recorded command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// External action id, e.g. "Color Set".
    pub action: String,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Seconds since history creation
    pub timestamp: f64,
}

/// Tracks the most recent commands and their outcomes.
#[derive(Debug, Clone)]
pub struct CommandHistory {
    counts: BTreeMap<String, usize>,
    last_error: Option<String>,
    start_time: Instant,
    entries: Vec<HistoryEntry>,
    max_entries: usize,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandHistory {
    pub const DEFAULT_MAX_ENTRIES: usize = 100;

    pub fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
            last_error: None,
            start_time: Instant::now(),
            entries: Vec::new(),
            max_entries: Self::DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::new()
        }
    }

    pub fn record(&mut self, kind: ActionKind, outcome: &Outcome) {
        let action = kind.id().to_string();
        *self.counts.entry(action.clone()).or_default() += 1;

        if let Some(failure) = outcome.failures.last() {
            self.last_error = Some(failure.to_string());
        } else if let Some(error) = &outcome.discovery_error {
            self.last_error = Some(error.to_string());
        }

        self.entries.push(HistoryEntry {
            action,
            requested: outcome.requested,
            succeeded: outcome.succeeded.len(),
            failed: outcome.failures.len(),
            timestamp: self.start_time.elapsed().as_secs_f64(),
        });

        if self.entries.len() > self.max_entries {
            self.entries.remove(0);
        }
    }

    pub fn record_error(&mut self, error: &str) {
        self.last_error = Some(error.to_string());
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
        self.entries.clear();
        self.last_error = None;
    }

    pub fn summary(&self) -> HistorySummary {
        HistorySummary {
            commands: self.counts.clone(),
            total_entries: self.entries.len(),
            failed_devices: self.entries.iter().map(|e| e.failed).sum(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Summary of command history for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySummary {
    /// Commands run per action id since creation or the last clear.
    pub commands: BTreeMap<String, usize>,
    pub total_entries: usize,
    /// Device failures across the retained entries.
    pub failed_devices: usize,
    pub last_error: Option<String>,
}
