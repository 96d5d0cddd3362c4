//! Core data model shared across medex crates.
//!
//! Everything in here is plain data: fingerprints, catalog records,
//! file-system occurrences, pipeline events and the end-of-run tally.
//! The engine lives in `medex-core`; this crate has no I/O.

pub mod events;
pub mod fingerprint;
pub mod kind;
pub mod record;
pub mod stats;

pub use events::{EventSink, IndexEvent, NullSink};
pub use fingerprint::Fingerprint;
pub use kind::MediaKind;
pub use record::{Occurrence, Record, RecordMetadata, SoundInfo};
pub use stats::StatsSnapshot;
