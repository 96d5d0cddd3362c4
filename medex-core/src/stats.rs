use medex_model::{MediaKind, StatsSnapshot};
use std::sync::atomic::{AtomicU64, Ordering};

/// Run counters. Pipelines increment concurrently from many tasks, so every
/// counter is atomic and only ever grows within a run.
#[derive(Debug, Default)]
pub struct RunStats {
    directories: AtomicU64,
    files: AtomicU64,
    converted: AtomicU64,
    duplicates: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    images: AtomicU64,
    texts: AtomicU64,
    videos: AtomicU64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_directory(&self) {
        self.directories.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the new file count, used as the `index` of scanned events.
    pub fn add_file(&self) -> u64 {
        self.files.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_converted(&self, kind: MediaKind) {
        self.converted.fetch_add(1, Ordering::Relaxed);
        match kind {
            MediaKind::Image => self.images.fetch_add(1, Ordering::Relaxed),
            MediaKind::Text => self.texts.fetch_add(1, Ordering::Relaxed),
            MediaKind::Video => self.videos.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn add_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            directories: self.directories.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            converted: self.converted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            images: self.images.load(Ordering::Relaxed),
            texts: self.texts.load(Ordering::Relaxed),
            videos: self.videos.load(Ordering::Relaxed),
        }
    }

    /// Reset every counter; used between passes in persistent mode.
    pub fn clear(&self) {
        for counter in [
            &self.directories,
            &self.files,
            &self.converted,
            &self.duplicates,
            &self.skipped,
            &self.failed,
            &self.images,
            &self.texts,
            &self.videos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
