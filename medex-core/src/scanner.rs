//! Bounded-concurrency directory traversal.
//!
//! Directories flow through a work channel serviced by a small pool of
//! workers; the channel's sender is dropped by whichever worker finishes
//! the last pending directory, which is what ends the scan. Every path is
//! canonicalised before use and recorded in a `seen` set, which both
//! deduplicates symlink aliases and guarantees termination on symlink
//! loops. Matched files are classified by the first type whose pattern
//! accepts them and handed to the conversion queue.

use crate::config::Resolved;
use crate::error::{IndexError, Result};
use crate::stats::RunStats;
use globset::{Glob, GlobMatcher};
use medex_model::{EventSink, IndexEvent, MediaKind};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One scanner emission: a classified file awaiting conversion.
#[derive(Debug, Clone)]
pub struct ScanItem {
    pub kind: MediaKind,
    pub path: PathBuf,
}

/// A glob that matches against the file name when it carries no path
/// separator, and against the full path otherwise.
#[derive(Debug, Clone)]
pub struct PathPattern {
    matcher: GlobMatcher,
    on_name: bool,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let matcher = Glob::new(pattern)
            .map_err(|err| IndexError::Fatal(format!("invalid glob {pattern:?}: {err}")))?
            .compile_matcher();
        Ok(PathPattern {
            matcher,
            on_name: !pattern.contains('/'),
        })
    }

    pub fn matches(&self, path: &Path) -> bool {
        if self.on_name {
            match path.file_name() {
                Some(name) => self.matcher.is_match(Path::new(name)),
                None => false,
            }
        } else {
            self.matcher.is_match(path)
        }
    }
}

#[derive(Debug)]
struct TypeMatcher {
    kind: MediaKind,
    enabled: bool,
    pattern: PathPattern,
    exclude: Option<PathPattern>,
}

impl TypeMatcher {
    fn accepts(&self, path: &Path) -> bool {
        if !self.enabled || !self.pattern.matches(path) {
            return false;
        }
        match &self.exclude {
            Some(exclude) => !exclude.matches(path),
            None => true,
        }
    }
}

type DirItem = (PathBuf, usize);

/// Per-run channel plumbing shared by the workers.
struct RunState {
    /// Present while directories are outstanding; dropping it closes the
    /// channel and releases every worker.
    dir_tx: Mutex<Option<mpsc::UnboundedSender<DirItem>>>,
    dir_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<DirItem>>,
    sink: mpsc::Sender<ScanItem>,
    events: Arc<dyn EventSink>,
    stats: Arc<RunStats>,
}

#[derive(Debug)]
pub struct Scanner {
    concurrency: usize,
    recursive: bool,
    dotfiles: bool,
    sort: bool,
    max_depth: Option<usize>,
    follow_symlinks: bool,
    exclude: Vec<PathPattern>,
    matchers: Vec<TypeMatcher>,
    seen: Mutex<HashSet<PathBuf>>,
    /// Roots accumulated by [`Scanner::add`], picked up by the next run.
    queue: Mutex<VecDeque<DirItem>>,
    /// Directories queued or in flight; zero means drained.
    pending: AtomicUsize,
}

impl Scanner {
    pub fn new(options: &Resolved) -> Result<Self> {
        let scanner = &options.scanner;
        let exclude = scanner
            .exclude
            .iter()
            .map(|p| PathPattern::new(p))
            .collect::<Result<Vec<_>>>()?;

        let mut matchers = Vec::new();
        for (kind, enabled, pattern, type_exclude) in [
            (
                MediaKind::Image,
                options.image.common.enabled,
                &options.image.common.pattern,
                &options.image.common.exclude,
            ),
            (
                MediaKind::Text,
                options.text.common.enabled,
                &options.text.common.pattern,
                &options.text.common.exclude,
            ),
            (
                MediaKind::Video,
                options.video.common.enabled,
                &options.video.common.pattern,
                &options.video.common.exclude,
            ),
        ] {
            matchers.push(TypeMatcher {
                kind,
                enabled,
                pattern: PathPattern::new(pattern)?,
                exclude: type_exclude.as_deref().map(PathPattern::new).transpose()?,
            });
        }

        Ok(Scanner {
            concurrency: scanner.concurrency,
            recursive: scanner.recursive,
            dotfiles: scanner.dotfiles,
            sort: scanner.sort,
            max_depth: scanner.max_depth,
            follow_symlinks: scanner.follow_symlinks,
            exclude,
            matchers,
            seen: Mutex::new(HashSet::new()),
            queue: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
        })
    }

    /// Enqueue roots for the next run. Each is resolved to its real path
    /// first; roots that do not resolve are logged and dropped.
    pub async fn add(&self, paths: &[PathBuf], depth: usize) {
        for path in paths {
            match tokio::fs::canonicalize(path).await {
                Ok(real) => {
                    self.queue.lock().unwrap().push_back((real, depth));
                    self.pending.fetch_add(1, Ordering::SeqCst);
                }
                Err(err) => warn!("cannot resolve scan root {}: {err}", path.display()),
            }
        }
    }

    /// Drop all queued work and forget every seen path.
    pub fn clear(&self) {
        self.queue.lock().unwrap().clear();
        self.seen.lock().unwrap().clear();
        self.pending.store(0, Ordering::SeqCst);
    }

    /// Whether the directory queue is fully drained.
    pub fn idle(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }

    /// Drive the traversal to completion with the configured worker count,
    /// emitting matched files into `sink`.
    pub async fn run(
        self: &Arc<Self>,
        sink: mpsc::Sender<ScanItem>,
        events: Arc<dyn EventSink>,
        stats: Arc<RunStats>,
    ) {
        let (dir_tx, dir_rx) = mpsc::unbounded_channel();
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.is_empty() {
                return;
            }
            for item in queue.drain(..) {
                let _ = dir_tx.send(item);
            }
        }
        let state = Arc::new(RunState {
            dir_tx: Mutex::new(Some(dir_tx)),
            dir_rx: tokio::sync::Mutex::new(dir_rx),
            sink,
            events,
            stats,
        });

        let mut workers = Vec::with_capacity(self.concurrency);
        for worker in 0..self.concurrency {
            let scanner = Arc::clone(self);
            let state = Arc::clone(&state);
            workers.push(tokio::spawn(async move {
                scanner.worker(worker, state).await;
            }));
        }
        for worker in workers {
            let _ = worker.await;
        }
    }

    async fn worker(&self, worker: usize, state: Arc<RunState>) {
        debug!(worker, "scan worker started");
        loop {
            let item = { state.dir_rx.lock().await.recv().await };
            let Some((directory, depth)) = item else {
                break;
            };
            if let Err(err) = self.process_directory(&directory, depth, &state).await {
                warn!("{err}");
            }
            if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                // Last outstanding directory: close the channel so every
                // worker drains out.
                state.dir_tx.lock().unwrap().take();
            }
        }
        debug!(worker, "scan worker finished");
    }

    fn enqueue_child(&self, state: &RunState, directory: PathBuf, depth: usize) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let guard = state.dir_tx.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send((directory, depth));
        }
    }

    async fn process_directory(
        &self,
        directory: &Path,
        depth: usize,
        state: &RunState,
    ) -> Result<()> {
        if !self.seen.lock().unwrap().insert(directory.to_path_buf()) {
            return Ok(());
        }
        state.stats.add_directory();

        let descend = self.max_depth.map_or(true, |max| depth < max);

        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(directory)
            .await
            .map_err(|err| IndexError::Scan {
                path: directory.to_path_buf(),
                reason: err.to_string(),
            })?;
        loop {
            match read_dir.next_entry().await {
                Ok(Some(entry)) => {
                    let file_type = match entry.file_type().await {
                        Ok(file_type) => file_type,
                        Err(err) => {
                            warn!("cannot stat {}: {err}", entry.path().display());
                            continue;
                        }
                    };
                    entries.push((entry.file_name(), entry.path(), file_type));
                }
                Ok(None) => break,
                Err(err) => {
                    return Err(IndexError::Scan {
                        path: directory.to_path_buf(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        if self.sort {
            entries.sort_by(|a, b| a.0.cmp(&b.0));
        }

        for (file_name, path, file_type) in entries {
            if !self.dotfiles && file_name.to_string_lossy().starts_with('.') {
                continue;
            }

            let is_symlink = file_type.is_symlink();
            let is_dir = if is_symlink {
                match tokio::fs::metadata(&path).await {
                    Ok(metadata) => metadata.is_dir(),
                    Err(err) => {
                        debug!("dangling link {}: {err}", path.display());
                        continue;
                    }
                }
            } else {
                file_type.is_dir()
            };

            if is_dir && !self.recursive {
                continue;
            }
            if is_dir && is_symlink && !self.follow_symlinks {
                continue;
            }

            let real = match tokio::fs::canonicalize(&path).await {
                Ok(real) => real,
                Err(err) => {
                    warn!("cannot resolve {}: {err}", path.display());
                    continue;
                }
            };
            if self.seen.lock().unwrap().contains(&real) {
                continue;
            }

            if is_dir {
                if self.exclude.iter().any(|p| p.matches(&real)) {
                    debug!("excluded {}", real.display());
                    continue;
                }
                if !descend {
                    warn!(
                        depth,
                        "max depth reached at {}, not descending",
                        directory.display()
                    );
                    continue;
                }
                self.enqueue_child(state, real, depth + 1);
                continue;
            }

            let Some(kind) = self.classify(&real) else {
                continue;
            };
            if !self.seen.lock().unwrap().insert(real.clone()) {
                continue;
            }
            let index = state.stats.add_file();
            state.events.publish(&IndexEvent::Scanned {
                kind,
                index,
                path: real.clone(),
            });
            if state.sink.send(ScanItem { kind, path: real }).await.is_err() {
                // Conversion side went away; stop feeding it.
                return Ok(());
            }
        }

        Ok(())
    }

    fn classify(&self, path: &Path) -> Option<MediaKind> {
        self.matchers
            .iter()
            .find(|matcher| matcher.accepts(path))
            .map(|matcher| matcher.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_patterns_ignore_parent_directories() {
        let pattern = PathPattern::new("*.{jpg,png}").unwrap();
        assert!(pattern.matches(Path::new("/any/where/photo.jpg")));
        assert!(pattern.matches(Path::new("photo.png")));
        assert!(!pattern.matches(Path::new("/any/where/notes.txt")));
    }

    #[test]
    fn path_patterns_match_the_whole_path() {
        let pattern = PathPattern::new("**/cache/**").unwrap();
        assert!(pattern.matches(Path::new("/srv/cache/img.png")));
        assert!(!pattern.matches(Path::new("/srv/media/img.png")));
    }
}
