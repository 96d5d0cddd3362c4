//! The orchestrator: owns configuration, statistics, the indexed-path
//! cache and the lifecycle of scanner, slot pool, catalog and search index.

use crate::catalog::Catalog;
use crate::config::{Hooks, Options, Resolved};
use crate::error::{IndexError, Result};
use crate::exec::{Exec, SystemExec};
use crate::pipeline::{self, PipelineContext};
use crate::scanner::{ScanItem, Scanner};
use crate::search::SearchIndex;
use crate::slots::SlotPool;
use crate::stats::RunStats;
use crate::ui::{NullUi, SlotUi};
use medex_model::{EventSink, NullSink, StatsSnapshot};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Pluggable collaborators. Only the catalog is mandatory; everything else
/// defaults to the real system executor and silent sinks.
pub struct Backends {
    pub catalog: Arc<dyn Catalog>,
    pub search: Option<Arc<dyn SearchIndex>>,
    pub exec: Arc<dyn Exec>,
    pub events: Arc<dyn EventSink>,
    pub ui: Arc<dyn SlotUi>,
    pub hooks: Hooks,
}

impl Backends {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Backends {
            catalog,
            search: None,
            exec: Arc::new(SystemExec),
            events: Arc::new(NullSink),
            ui: Arc::new(NullUi),
            hooks: Hooks::default(),
        }
    }

    pub fn with_search(mut self, search: Arc<dyn SearchIndex>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_exec(mut self, exec: Arc<dyn Exec>) -> Self {
        self.exec = exec;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_ui(mut self, ui: Arc<dyn SlotUi>) -> Self {
        self.ui = ui;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }
}

pub struct Indexer {
    ctx: Arc<PipelineContext>,
    scanner: Arc<Scanner>,
    options: Arc<Resolved>,
}

impl Indexer {
    /// Resolve options and wire the engine together. Configuration errors
    /// surface here as [`IndexError::Fatal`].
    pub fn new(options: Options, version: impl Into<String>, backends: Backends) -> Result<Self> {
        let options = Arc::new(options.resolve(version, &backends.hooks)?);
        let scanner = Arc::new(Scanner::new(&options)?);
        let ctx = Arc::new(PipelineContext {
            exec: backends.exec,
            catalog: backends.catalog,
            search: backends.search,
            events: backends.events,
            ui: backends.ui,
            stats: Arc::new(RunStats::new()),
            slots: Arc::new(SlotPool::new(options.concurrency)),
            hooks: backends.hooks,
            options: Arc::clone(&options),
            indexed: Arc::new(Mutex::new(HashSet::new())),
        });
        Ok(Indexer {
            ctx,
            scanner,
            options,
        })
    }

    pub fn options(&self) -> &Resolved {
        &self.options
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Load the indexed-path cache. A missing cache file is a fresh start;
    /// a corrupt one is discarded with a warning.
    pub async fn start(&self) -> Result<()> {
        let Some(cache) = &self.options.cache else {
            return Ok(());
        };
        match tokio::fs::read(cache).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<PathBuf>>(&bytes) {
                Ok(paths) => {
                    let count = paths.len();
                    self.ctx.indexed.lock().unwrap().extend(paths);
                    info!("loaded {count} indexed paths from {}", cache.display());
                }
                Err(err) => warn!("ignoring corrupt cache {}: {err}", cache.display()),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(IndexError::io("read", cache, source)),
        }
        Ok(())
    }

    /// One full pass over the configured roots.
    pub async fn scan(&self) -> Result<StatsSnapshot> {
        let roots = self.options.scan.clone();
        self.scan_paths(&roots).await
    }

    /// One full pass over `roots`: traversal, conversion, drain.
    pub async fn scan_paths(&self, roots: &[PathBuf]) -> Result<StatsSnapshot> {
        let (tx, rx) = mpsc::channel::<ScanItem>(1024);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.options.concurrency);
        for _ in 0..self.options.concurrency {
            let ctx = Arc::clone(&self.ctx);
            let rx = Arc::clone(&rx);
            workers.push(tokio::spawn(async move {
                loop {
                    let item = { rx.lock().await.recv().await };
                    let Some(item) = item else { break };
                    let slot = ctx.slots.acquire().await;
                    if let Err(err) = pipeline::convert(&ctx, slot, item.kind, &item.path).await {
                        error!("{err}");
                        ctx.stats.add_failed();
                    }
                    ctx.slots.release(slot);
                    ctx.ui.detach(slot);
                    ctx.ui.advance_overall();
                }
            }));
        }

        self.scanner.add(roots, 0).await;
        self.scanner
            .run(tx, Arc::clone(&self.ctx.events), Arc::clone(&self.ctx.stats))
            .await;
        for worker in workers {
            let _ = worker.await;
        }

        Ok(self.stats())
    }

    /// Forget traversal state so the next pass rescans everything. The
    /// indexed-path cache survives; that is what makes rescans cheap.
    pub fn reset(&self) {
        self.scanner.clear();
    }

    /// Persist the indexed-path cache. Also safe to call from a signal
    /// handler mid-run.
    pub async fn flush_index_cache(&self) -> Result<()> {
        let Some(cache) = &self.options.cache else {
            return Ok(());
        };
        let mut paths: Vec<PathBuf> = self
            .ctx
            .indexed
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect();
        paths.sort();
        let bytes = serde_json::to_vec_pretty(&paths)
            .map_err(|err| IndexError::Fatal(format!("cannot encode cache: {err}")))?;
        if let Some(parent) = cache.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| IndexError::io("mkdir", parent, source))?;
            }
        }
        tokio::fs::write(cache, bytes)
            .await
            .map_err(|source| IndexError::io("write", cache, source))?;
        info!("wrote {} indexed paths to {}", paths.len(), cache.display());
        Ok(())
    }

    /// Flush state and release backends.
    pub async fn stop(&self) -> Result<()> {
        self.flush_index_cache().await?;
        if let Some(search) = &self.ctx.search {
            search.close().await?;
        }
        Ok(())
    }
}
