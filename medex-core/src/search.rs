//! Optional full-text index behind a minimal trait.

use crate::error::SearchError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Index `body` under `doc_id` in index `idx`, replacing any previous
    /// document with the same id.
    async fn index(&self, idx: &str, doc_id: &str, body: Value) -> Result<(), SearchError>;

    /// Make previous writes to `idx` visible to searches.
    async fn refresh(&self, idx: &str) -> Result<(), SearchError>;

    async fn close(&self) -> Result<(), SearchError>;
}

/// Reference in-memory backend used in tests and when no external node is
/// configured but indexing is still wanted.
#[derive(Default)]
pub struct MemorySearchIndex {
    indices: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn document(&self, idx: &str, doc_id: &str) -> Option<Value> {
        self.indices
            .read()
            .await
            .get(idx)
            .and_then(|docs| docs.get(doc_id))
            .cloned()
    }

    pub async fn doc_count(&self, idx: &str) -> usize {
        self.indices
            .read()
            .await
            .get(idx)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn index(&self, idx: &str, doc_id: &str, body: Value) -> Result<(), SearchError> {
        self.indices
            .write()
            .await
            .entry(idx.to_string())
            .or_default()
            .insert(doc_id.to_string(), body);
        Ok(())
    }

    async fn refresh(&self, _idx: &str) -> Result<(), SearchError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), SearchError> {
        Ok(())
    }
}
