//! Shared fixtures: a scripted toolchain and an indexer wired to in-memory
//! backends, so whole pipelines run without any external tool installed.

#![allow(dead_code)]

use medex_core::exec::script::{ScriptedExec, ScriptedResult};
use medex_core::{Backends, Indexer, MemoryCatalog, MemorySearchIndex, Options};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Digest of a file's current contents, shasum-style.
pub fn hash_file(path: &Path) -> String {
    let bytes = std::fs::read(path).unwrap();
    sha256_hex(&bytes)
}

/// Attach a `shasum` handler that digests the file named by the first
/// argument, mirroring `<digest>  <path>` output.
pub fn with_shasum(exec: ScriptedExec) -> ScriptedExec {
    exec.on("shasum", |args| {
        let path = PathBuf::from(&args[0]);
        match std::fs::read(&path) {
            Ok(bytes) => ScriptedResult::stdout(format!(
                "{}  {}\n",
                sha256_hex(&bytes),
                path.display()
            )),
            Err(_) => ScriptedResult::failure(1),
        }
    })
}

pub struct Harness {
    pub indexer: Indexer,
    pub catalog: Arc<MemoryCatalog>,
    pub search: Arc<MemorySearchIndex>,
    pub exec: Arc<ScriptedExec>,
}

pub fn harness(options: Options, exec: ScriptedExec) -> Harness {
    let catalog = Arc::new(MemoryCatalog::new());
    let search = Arc::new(MemorySearchIndex::new());
    let exec = Arc::new(exec);
    let backends = Backends::new(catalog.clone())
        .with_search(search.clone())
        .with_exec(exec.clone());
    let indexer = Indexer::new(options, "test", backends).unwrap();
    Harness {
        indexer,
        catalog,
        search,
        exec,
    }
}

/// Base options: artifacts under `save`, two slots, no cache.
pub fn base_options(save: &Path) -> Options {
    Options {
        save: save.to_path_buf(),
        concurrency: 2,
        ..Options::default()
    }
}

pub fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}
