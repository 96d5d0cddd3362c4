//! The per-type conversion pipelines and the policy they share.
//!
//! Each pipeline is a state machine from a scanned source file to a
//! persisted record plus canonical artifacts. The shared half (skip
//! checks, the duplicate-merge protocol, tagging, catalog access, artifact
//! bookkeeping) lives on [`PipelineContext`]; the type-specific halves are
//! the `image`, `text` and `video` modules.

pub mod identify;
pub mod image;
pub mod subtitles;
pub mod text;
pub mod video;

use crate::catalog::Catalog;
use crate::config::{Hooks, Resolved, TypeCommon};
use crate::error::{IndexError, Result};
use crate::exec::Exec;
use crate::hasher::Hasher;
use crate::search::SearchIndex;
use crate::slots::SlotPool;
use crate::stats::RunStats;
use crate::ui::SlotUi;
use chrono::Utc;
use medex_model::{EventSink, Fingerprint, IndexEvent, MediaKind, Occurrence, Record};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Everything a pipeline task needs, shared across all slots.
pub struct PipelineContext {
    pub exec: Arc<dyn Exec>,
    pub catalog: Arc<dyn Catalog>,
    pub search: Option<Arc<dyn SearchIndex>>,
    pub events: Arc<dyn EventSink>,
    pub ui: Arc<dyn SlotUi>,
    pub stats: Arc<RunStats>,
    pub slots: Arc<SlotPool>,
    pub hooks: Hooks,
    pub options: Arc<Resolved>,
    /// Absolute paths already indexed, persisted across runs.
    pub indexed: Arc<Mutex<HashSet<PathBuf>>>,
}

impl PipelineContext {
    pub fn common(&self, kind: MediaKind) -> &TypeCommon {
        match kind {
            MediaKind::Image => &self.options.image.common,
            MediaKind::Text => &self.options.text.common,
            MediaKind::Video => &self.options.video.common,
        }
    }

    pub fn hasher(&self, kind: MediaKind) -> Hasher {
        Hasher::new(self.exec.clone(), self.common(kind).shasum.clone())
    }

    /// The skip check: a file we will not delete and have already indexed
    /// needs no work at all.
    pub async fn skip(&self, kind: MediaKind, file: &Path) -> Result<bool> {
        let common = self.common(kind);
        if !common.can_skip || common.delete.applies(file) {
            return Ok(false);
        }
        let cached = self.indexed.lock().unwrap().contains(file);
        let hit = cached || self.catalog.find_by_source_file(file).await?.is_some();
        if hit {
            debug!("skipping {}", file.display());
            self.stats.add_skipped();
            self.events.publish(&IndexEvent::Skipped {
                kind,
                path: file.to_path_buf(),
            });
        }
        Ok(hit)
    }

    /// Size and mtime (ms) of a path.
    pub async fn stat(&self, path: &Path) -> Result<(u64, i64)> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|source| IndexError::io("stat", path, source))?;
        let timestamp = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Ok((metadata.len(), timestamp))
    }

    pub async fn occurrence(&self, id: Fingerprint, file: &Path) -> Result<Occurrence> {
        let (size, timestamp) = self.stat(file).await?;
        Ok(Occurrence::from_path(id, file, size, timestamp))
    }

    /// The duplicate-merge protocol: extend an existing record with new
    /// occurrences, refresh its tags and replace it in the catalog. Usually
    /// there is exactly one occurrence; there are more when sibling slots
    /// adopted into this one before the catalog hit was known.
    ///
    /// Counting and the `duplicate` event stay with the caller: every
    /// scanned file settles exactly once, and adopted occurrences were
    /// already accounted for by the worker that handed them over.
    pub async fn duplicate(
        &self,
        kind: MediaKind,
        model: &mut Record,
        occurrences: Vec<Occurrence>,
    ) -> Result<()> {
        for occurrence in &occurrences {
            model.absorb(occurrence.clone());
        }
        self.tag(kind, model).await?;
        self.catalog.replace(model).await?;
        for occurrence in occurrences {
            let file = occurrence.file;
            self.delete_source(kind, &file).await;
            debug!("merged {} into {}", file.display(), model.id);
            self.mark_indexed([file]);
        }
        Ok(())
    }

    /// Run the tagger hook (when configured) and stamp the update time.
    pub async fn tag(&self, kind: MediaKind, record: &mut Record) -> Result<()> {
        if self.common(kind).drop_tags {
            record.metadata.tags.clear();
        }
        if let Some(tagger) = &self.hooks.tagger {
            tagger
                .tag(record)
                .await
                .map_err(|err| IndexError::ConvertFailed {
                    path: PathBuf::from(record.id.to_string()),
                    reason: format!("tagger: {err}"),
                })?;
        }
        record.metadata.updated = Utc::now();
        Ok(())
    }

    pub async fn insert(&self, record: &Record) -> Result<()> {
        Ok(self.catalog.insert(record).await?)
    }

    pub async fn lookup(&self, key: &Fingerprint) -> Result<Option<Record>> {
        Ok(self.catalog.lookup(key).await?)
    }

    /// Remove a source file when the type's delete policy says so.
    /// Removal failures are logged, never fatal.
    pub async fn delete_source(&self, kind: MediaKind, file: &Path) {
        if !self.common(kind).delete.applies(file) {
            return;
        }
        if let Err(err) = tokio::fs::remove_file(file).await {
            warn!("cannot delete {}: {err}", file.display());
        }
    }

    pub fn mark_indexed<I: IntoIterator<Item = PathBuf>>(&self, files: I) {
        let mut indexed = self.indexed.lock().unwrap();
        indexed.extend(files);
    }

    /// Merge occurrences adopted into the slot after the record was built
    /// but before it landed in the catalog. Retires the slot's fingerprint
    /// as a side effect, so later siblings resolve through the catalog.
    pub async fn merge_latecomers(
        &self,
        kind: MediaKind,
        slot: usize,
        record: &mut Record,
    ) -> Result<()> {
        let late = self.slots.finish(slot);
        if late.is_empty() {
            return Ok(());
        }
        self.duplicate(kind, record, late).await
    }

    /// Fold every occurrence accumulated on the slot into a fresh record.
    pub fn collect_record(
        &self,
        slot: usize,
        id: Fingerprint,
        hash: Fingerprint,
        kind: MediaKind,
    ) -> Result<Record> {
        let mut occurrences = self.slots.drain_occurrences(slot).into_iter();
        let first = occurrences.next().ok_or_else(|| IndexError::ConvertFailed {
            path: PathBuf::from(id.to_string()),
            reason: "slot lost its occurrences".into(),
        })?;
        let mut record = Record::new(id, hash, kind, self.options.version.clone(), first);
        for occurrence in occurrences {
            record.absorb(occurrence);
        }
        Ok(record)
    }

    /// Artifact path relative to the type's save root.
    pub fn relative(&self, kind: MediaKind, path: &Path) -> String {
        path.strip_prefix(&self.common(kind).save)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    pub async fn ensure_dir(&self, directory: &Path) -> Result<()> {
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|source| IndexError::io("mkdir", directory, source))
    }

    pub async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        tokio::fs::copy(from, to)
            .await
            .map(|_| ())
            .map_err(|source| IndexError::io("copy", to, source))
    }

    /// Apply the configured octal mode to an artifact.
    #[cfg(unix)]
    pub async fn set_mode(&self, kind: MediaKind, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(self.common(kind).mode);
        tokio::fs::set_permissions(path, permissions)
            .await
            .map_err(|source| IndexError::io("chmod", path, source))
    }

    #[cfg(not(unix))]
    pub async fn set_mode(&self, _kind: MediaKind, _path: &Path) -> Result<()> {
        Ok(())
    }

    /// Best-effort artifact removal on failure paths.
    pub async fn discard(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("discarded {}", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("cannot discard {}: {err}", path.display()),
        }
    }

    /// Best-effort removal of a (supposedly empty) shard directory.
    pub async fn discard_dir(&self, directory: &Path) {
        if let Err(err) = tokio::fs::remove_dir(directory).await {
            debug!("leaving {}: {err}", directory.display());
        }
    }

    /// Write `body` to the search index when one is configured.
    pub async fn index_document(
        &self,
        index: &Option<String>,
        doc_id: &str,
        body: Value,
    ) -> Result<()> {
        if let (Some(search), Some(idx)) = (&self.search, index) {
            search.index(idx, doc_id, body).await?;
        }
        Ok(())
    }

    pub async fn refresh_index(&self, index: &Option<String>) -> Result<()> {
        if let (Some(search), Some(idx)) = (&self.search, index) {
            search.refresh(idx).await?;
        }
        Ok(())
    }
}

/// Dispatch a scanned item to its type pipeline.
pub async fn convert(
    ctx: &PipelineContext,
    slot: usize,
    kind: MediaKind,
    file: &Path,
) -> Result<()> {
    match kind {
        MediaKind::Image => image::convert(ctx, slot, file).await,
        MediaKind::Text => text::convert(ctx, slot, file).await,
        MediaKind::Video => video::convert(ctx, slot, file).await,
    }
}
