use crate::MediaKind;
use serde::Serialize;
use std::path::PathBuf;

/// Observations emitted by the pipeline as work progresses.
///
/// Consumers receive these through an [`EventSink`]; the engine never blocks
/// on a sink, so implementations must be cheap and non-panicking.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexEvent {
    /// A file matched a type pattern during traversal.
    Scanned {
        kind: MediaKind,
        /// Running per-scan file counter at emission time.
        index: u64,
        path: PathBuf,
    },
    /// A conversion completed and a fresh record was inserted.
    Indexed {
        kind: MediaKind,
        id: String,
        path: PathBuf,
    },
    /// An occurrence was merged into an existing record.
    Duplicate {
        kind: MediaKind,
        id: String,
        path: PathBuf,
    },
    /// A previously indexed file was skipped outright.
    Skipped { kind: MediaKind, path: PathBuf },
}

/// Observer interface for [`IndexEvent`]s.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &IndexEvent);
}

/// Sink that drops every event; the default when no observer is attached.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &IndexEvent) {}
}
