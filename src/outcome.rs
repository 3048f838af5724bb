//! Per-device results of a command.

use std::fmt;

use crate::errors::Error;

/// A device that a command could not be applied to.
#[derive(Debug)]
pub struct Failure {
    /// Requested name, or bulb label / gateway address.
    pub name: String,
    pub error: Error,
}

impl Failure {
    pub fn new(name: impl Into<String>, error: Error) -> Self {
        Failure {
            name: name.into(),
            error,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.error)
    }
}

/// Best-effort summary of a command applied to several devices.
///
/// Per-device problems (not found, unreachable) are collected here instead of
/// aborting the command.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Number of devices the command was meant for.
    pub requested: usize,
    pub succeeded: Vec<String>,
    pub failures: Vec<Failure>,
    /// Set when the discovery listener could not be opened for this command.
    pub discovery_error: Option<Error>,
}

impl Outcome {
    pub fn new(requested: usize) -> Self {
        Outcome {
            requested,
            ..Default::default()
        }
    }

    pub fn success(&mut self, name: impl Into<String>) {
        self.succeeded.push(name.into());
    }

    pub fn failure(&mut self, name: impl Into<String>, error: Error) {
        self.failures.push(Failure::new(name, error));
    }

    pub fn extend_failures(&mut self, failures: impl IntoIterator<Item = Failure>) {
        self.failures.extend(failures);
    }

    /// `true` when every requested device succeeded.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.succeeded.len() == self.requested
    }

    /// Failures caused by a name that never resolved.
    pub fn not_found(&self) -> impl Iterator<Item = &str> {
        self.failures
            .iter()
            .filter(|f| matches!(f.error, Error::NameNotFound(_)))
            .map(|f| f.name.as_str())
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} devices succeeded",
            self.succeeded.len(),
            self.requested
        )
    }
}
