use crate::error::{IndexError, Result};
use crate::exec::Exec;
use medex_model::Fingerprint;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Content fingerprinting through the configured hash tool.
///
/// The tool is invoked on a single file; its stdout's first whitespace
/// token is the digest. `shasum`-style `<digest>  <path>` output and bare
/// digests both work.
#[derive(Clone)]
pub struct Hasher {
    exec: Arc<dyn Exec>,
    bin: String,
}

impl Hasher {
    pub fn new(exec: Arc<dyn Exec>, bin: impl Into<String>) -> Self {
        Hasher {
            exec,
            bin: bin.into(),
        }
    }

    pub async fn hash(&self, path: &Path) -> Result<Fingerprint> {
        let args = [path.display().to_string()];
        let output = self
            .exec
            .run(&self.bin, &args)
            .await
            .map_err(|err| IndexError::HashFailed {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        let token = output
            .stdout
            .trim()
            .split_whitespace()
            .next()
            .ok_or_else(|| IndexError::HashFailed {
                path: path.to_path_buf(),
                reason: "hash tool produced no output".to_string(),
            })?;
        Ok(Fingerprint::new(token))
    }

    /// Fingerprint in-memory text by spooling it through a temporary file,
    /// so the external tool stays the single digest authority.
    pub async fn hash_text(&self, text: &str) -> Result<Fingerprint> {
        let tmp = tempfile::NamedTempFile::new().map_err(|source| IndexError::HashFailed {
            path: "<text>".into(),
            reason: source.to_string(),
        })?;
        let path = tmp.path().to_path_buf();
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|source| IndexError::io("create", &path, source))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|source| IndexError::io("write", &path, source))?;
        file.flush()
            .await
            .map_err(|source| IndexError::io("flush", &path, source))?;
        drop(file);
        self.hash(&path).await
    }
}
