//! Transfer lifecycle events
//!
//! Events are produced in-order by the transfer engine and rendered
//! synchronously as they arrive; nothing is buffered or stored.

use crate::logging::Logger;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    Resolving,
    Resolved,
    Downloading,
    Downloaded,
    Committing,
    Complete,
}

impl fmt::Display for ProgressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProgressKind::Resolving => "resolving",
            ProgressKind::Resolved => "resolved",
            ProgressKind::Downloading => "downloading",
            ProgressKind::Downloaded => "downloaded",
            ProgressKind::Committing => "committing",
            ProgressKind::Complete => "complete",
        };
        write!(f, "{}", name)
    }
}

/// One lifecycle event: what happened, and to which subject
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub name: String,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Consumer of transfer lifecycle events
pub trait ProgressSink: Send + Sync {
    fn handle(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn handle(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Renders each event as a `"{kind} {name}"` line as it arrives
pub struct LogReporter {
    output: Logger,
}

impl LogReporter {
    pub fn new(output: Logger) -> Self {
        Self { output }
    }
}

impl ProgressSink for LogReporter {
    fn handle(&self, event: &ProgressEvent) {
        self.output
            .progress(&format!("{} {}", event.kind, event.name));
    }
}
