use crate::{Fingerprint, MediaKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// One file-system observation of a work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    /// Fingerprint of the observed source bytes.
    pub id: Fingerprint,
    /// Absolute path of the observed file.
    pub file: PathBuf,
    /// Parent directory of `file`.
    pub path: PathBuf,
    pub name: String,
    pub extension: String,
    pub size: u64,
    /// Source mtime in milliseconds since the epoch.
    pub timestamp: i64,
}

impl Occurrence {
    /// Derive an occurrence from a path plus the stat data the caller
    /// already holds. `name` is the stem, `extension` the lowercased suffix.
    pub fn from_path(id: Fingerprint, file: &Path, size: u64, timestamp: i64) -> Self {
        let name = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = file
            .extension()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        Occurrence {
            id,
            file: file.to_path_buf(),
            path: file.parent().map(Path::to_path_buf).unwrap_or_default(),
            name,
            extension,
            size,
            timestamp,
        }
    }
}

/// Loudness measurement of a video's audio track, in dB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoundInfo {
    pub silent: bool,
    pub mean: f64,
    pub max: f64,
}

impl SoundInfo {
    /// Sentinel used when detection is disabled or its output is unparsable.
    pub const fn silent() -> Self {
        SoundInfo {
            silent: true,
            mean: -91.0,
            max: -91.0,
        }
    }
}

impl Default for SoundInfo {
    fn default() -> Self {
        SoundInfo::silent()
    }
}

/// Mutable bookkeeping attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Source mtime (ms) of the first occurrence.
    pub created: i64,
    pub added: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub occurrences: Vec<Occurrence>,
    pub series: Option<String>,
    pub views: u64,
    pub stars: u64,
    pub favorited: bool,
    pub reviewed: bool,
    pub private: bool,
    pub tags: Vec<String>,
}

impl RecordMetadata {
    pub fn new(created: i64) -> Self {
        let now = Utc::now();
        RecordMetadata {
            created,
            added: now,
            updated: now,
            occurrences: Vec::new(),
            series: None,
            views: 0,
            stars: 0,
            favorited: false,
            reviewed: false,
            private: false,
            tags: Vec::new(),
        }
    }
}

/// The canonical catalog entity for one unique work.
///
/// `id` fingerprints the original source bytes, `hash` the canonical
/// converted output; they coincide for images and text. `sources` is the
/// monotonically growing set of fingerprints under which the record may be
/// found, and it always contains `id`, `hash` and every occurrence id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Fingerprint,
    pub object: MediaKind,
    pub version: String,
    pub name: String,
    pub description: String,
    pub hash: Fingerprint,
    pub sources: BTreeSet<Fingerprint>,
    /// Canonical artifact path relative to the save root.
    pub relative: String,
    pub thumbnail: Option<String>,
    pub preview: Option<String>,
    pub subtitles: Option<String>,
    /// Size in bytes of the canonical artifact.
    pub size: u64,
    pub duration: Option<f64>,
    pub aspect: Option<f64>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub sound: Option<SoundInfo>,
    /// Compression applied to the canonical text artifact.
    pub compression: Option<String>,
    pub metadata: RecordMetadata,
    pub deleted: bool,
}

impl Record {
    /// Start a record from its first occurrence. `sources` is seeded with
    /// `id` and `hash`; further occurrences go through [`Record::absorb`].
    pub fn new(
        id: Fingerprint,
        hash: Fingerprint,
        object: MediaKind,
        version: String,
        first: Occurrence,
    ) -> Self {
        let mut sources = BTreeSet::new();
        sources.insert(id.clone());
        sources.insert(hash.clone());
        sources.insert(first.id.clone());
        let mut metadata = RecordMetadata::new(first.timestamp);
        let name = first.name.clone();
        metadata.occurrences.push(first);
        Record {
            id,
            object,
            version,
            name,
            description: String::new(),
            hash,
            sources,
            relative: String::new(),
            thumbnail: None,
            preview: None,
            subtitles: None,
            size: 0,
            duration: None,
            aspect: None,
            width: None,
            height: None,
            sound: None,
            compression: None,
            metadata,
            deleted: false,
        }
    }

    /// Merge a new occurrence into the record. Occurrences are keyed by
    /// `file`: a path seen before is not appended twice. Returns whether the
    /// occurrence was actually added.
    pub fn absorb(&mut self, occurrence: Occurrence) -> bool {
        let known = self
            .metadata
            .occurrences
            .iter()
            .any(|o| o.file == occurrence.file);
        if !known {
            self.metadata.occurrences.push(occurrence);
        }
        self.rebuild_sources();
        !known
    }

    /// Recompute `sources` as `{id, hash} ∪ {occurrence ids}`. The set only
    /// ever grows because occurrences are never removed.
    pub fn rebuild_sources(&mut self) {
        let mut sources = BTreeSet::new();
        sources.insert(self.id.clone());
        sources.insert(self.hash.clone());
        for occurrence in &self.metadata.occurrences {
            sources.insert(occurrence.id.clone());
        }
        self.sources = sources;
    }

    /// Whether any of id, hash or sources matches `key`.
    pub fn matches(&self, key: &Fingerprint) -> bool {
        self.id == *key || self.hash == *key || self.sources.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occurrence(id: &str, file: &str) -> Occurrence {
        Occurrence::from_path(Fingerprint::new(id), Path::new(file), 10, 1_000)
    }

    #[test]
    fn new_record_satisfies_source_invariants() {
        let record = Record::new(
            Fingerprint::new("aa11"),
            Fingerprint::new("bb22"),
            MediaKind::Video,
            "0.4.0".into(),
            occurrence("aa11", "/in/a.mp4"),
        );
        assert!(record.sources.contains(&Fingerprint::new("aa11")));
        assert!(record.sources.contains(&Fingerprint::new("bb22")));
        assert_eq!(record.name, "a");
        assert_eq!(record.metadata.occurrences.len(), 1);
    }

    #[test]
    fn absorb_is_idempotent_per_file() {
        let mut record = Record::new(
            Fingerprint::new("aa11"),
            Fingerprint::new("aa11"),
            MediaKind::Image,
            "0.4.0".into(),
            occurrence("aa11", "/in/a.png"),
        );
        assert!(record.absorb(occurrence("cc33", "/in/b.png")));
        assert!(!record.absorb(occurrence("cc33", "/in/b.png")));
        assert_eq!(record.metadata.occurrences.len(), 2);
        assert!(record.sources.contains(&Fingerprint::new("cc33")));
        for o in &record.metadata.occurrences {
            assert!(record.sources.contains(&o.id));
        }
    }
}
