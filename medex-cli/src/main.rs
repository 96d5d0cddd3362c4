mod progress;

use anyhow::{bail, Context, Result};
use clap::Parser;
use medex_core::{Backends, Indexer, MemoryCatalog, MemorySearchIndex, NullUi, Options, SlotUi};
use progress::ProgressUi;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "medex", about = "Content-addressed media indexer", version)]
struct Cli {
    /// Directories to scan, in addition to any configured roots.
    roots: Vec<PathBuf>,

    /// Configuration file (TOML). Defaults to `medex.toml` when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Save root for canonical artifacts.
    #[arg(long)]
    save: Option<PathBuf>,

    /// Indexed-path cache file.
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Conversion slot count.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Delete source files after successful indexing.
    #[arg(long)]
    delete: bool,

    /// Re-examine files even when they were indexed before.
    #[arg(long)]
    no_skip: bool,

    /// Keep running, rescanning on the configured interval.
    #[arg(long)]
    persistent: bool,

    /// Sort directory entries during the scan.
    #[arg(long)]
    sort: bool,

    /// Disable the progress display.
    #[arg(long)]
    quiet: bool,
}

fn load_options(cli: &Cli) -> Result<Options> {
    let mut builder = config::Config::builder();
    builder = match &cli.config {
        Some(path) => builder.add_source(
            config::File::from(path.clone()).format(config::FileFormat::Toml),
        ),
        None => builder.add_source(config::File::with_name("medex").required(false)),
    };
    let mut options: Options = builder
        .build()
        .context("cannot read configuration")?
        .try_deserialize()
        .context("invalid configuration")?;

    if let Some(save) = &cli.save {
        options.save = save.clone();
    }
    if let Some(cache) = &cli.cache {
        options.cache = Some(cache.clone());
    }
    if let Some(concurrency) = cli.concurrency {
        options.concurrency = concurrency;
    }
    if cli.delete {
        options.delete = true;
    }
    if cli.no_skip {
        options.can_skip = false;
    }
    if cli.persistent {
        options.scanner.persistent = true;
    }
    if cli.sort {
        options.scanner.sort = true;
    }
    options.scan.extend(cli.roots.iter().cloned());
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("medex=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = load_options(&cli)?;
    if options.scan.is_empty() {
        bail!("nothing to scan: pass directories or set `scan` in the configuration");
    }
    if options.services.database.url.is_some() {
        warn!("external catalog backends are provided by embedders; using the in-memory catalog");
    }

    let catalog = Arc::new(MemoryCatalog::new());
    let mut backends = Backends::new(catalog);
    if options.services.search.enabled {
        backends = backends.with_search(Arc::new(MemorySearchIndex::new()));
    }
    let progress = if cli.quiet {
        None
    } else {
        Some(Arc::new(ProgressUi::new(options.concurrency)))
    };
    let ui: Arc<dyn SlotUi> = match &progress {
        Some(progress) => Arc::clone(progress) as Arc<dyn SlotUi>,
        None => Arc::new(NullUi),
    };
    backends = backends.with_ui(ui);

    let persistent = options.scanner.persistent;
    let rescan = std::time::Duration::from_millis(options.scanner.rescan);
    let indexer = Arc::new(Indexer::new(
        options,
        env!("CARGO_PKG_VERSION"),
        backends,
    )?);
    indexer.start().await?;

    spawn_signal_handlers(Arc::clone(&indexer), progress.clone());

    loop {
        indexer.scan().await?;
        if !persistent {
            break;
        }
        info!("pass complete; next rescan in {}s", rescan.as_secs());
        tokio::time::sleep(rescan).await;
        indexer.reset();
    }

    indexer.stop().await?;
    if let Some(progress) = &progress {
        progress.finish();
    }

    let stats = indexer.stats();
    println!(
        "converted {} ({} images, {} texts, {} videos), {} duplicates, {} skipped, {} failed",
        stats.converted,
        stats.images,
        stats.texts,
        stats.videos,
        stats.duplicates,
        stats.skipped,
        stats.failed,
    );
    if stats.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// SIGINT flushes the cache, restores the terminal and exits; SIGUSR2
/// flushes mid-run and keeps going.
fn spawn_signal_handlers(indexer: Arc<Indexer>, progress: Option<Arc<ProgressUi>>) {
    {
        let indexer = Arc::clone(&indexer);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; flushing index cache");
                if let Err(err) = indexer.flush_index_cache().await {
                    warn!("{err}");
                }
                if let Some(progress) = &progress {
                    progress.finish();
                }
                std::process::exit(130);
            }
        });
    }

    #[cfg(unix)]
    {
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let Ok(mut stream) = signal(SignalKind::user_defined2()) else {
                return;
            };
            while stream.recv().await.is_some() {
                info!("flushing index cache on signal");
                if let Err(err) = indexer.flush_index_cache().await {
                    warn!("{err}");
                }
            }
        });
    }
    #[cfg(not(unix))]
    drop(indexer);
}
