//! Abstract record store keyed by fingerprint.
//!
//! The engine only needs four operations; how a backend realises them
//! (document database, SQL, flat files) is its own business. The crate
//! ships [`MemoryCatalog`] as the reference backend and test double, in the
//! same spirit as an in-memory filesystem behind a storage trait.

use crate::error::CatalogError;
use async_trait::async_trait;
use medex_model::{Fingerprint, Record};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Find the record matching `key` against `id`, `hash` or `sources`.
    ///
    /// A live (non-deleted) record matching on `sources` is preferred over
    /// any tombstone, so duplicates merge into the living copy.
    async fn lookup(&self, key: &Fingerprint) -> Result<Option<Record>, CatalogError>;

    /// Record owning an occurrence of exactly this file path, if any.
    async fn find_by_source_file(&self, file: &Path) -> Result<Option<Record>, CatalogError>;

    /// Insert a fresh record. `id` is a unique key; inserting a known id is
    /// an error.
    async fn insert(&self, record: &Record) -> Result<(), CatalogError>;

    /// Replace the stored record with the same `id`.
    async fn replace(&self, record: &Record) -> Result<(), CatalogError>;
}

/// Reference in-memory backend: a map keyed by record id.
#[derive(Default)]
pub struct MemoryCatalog {
    records: RwLock<HashMap<String, Record>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Snapshot of every stored record, for diagnostics and tests.
    pub async fn dump(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn lookup(&self, key: &Fingerprint) -> Result<Option<Record>, CatalogError> {
        let records = self.records.read().await;
        // Live sources match first, then anything (including tombstones).
        let live = records
            .values()
            .find(|r| !r.deleted && r.sources.contains(key));
        if let Some(record) = live {
            return Ok(Some(record.clone()));
        }
        Ok(records.values().find(|r| r.matches(key)).cloned())
    }

    async fn find_by_source_file(&self, file: &Path) -> Result<Option<Record>, CatalogError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.metadata.occurrences.iter().any(|o| o.file == file))
            .cloned())
    }

    async fn insert(&self, record: &Record) -> Result<(), CatalogError> {
        let mut records = self.records.write().await;
        let key = record.id.as_str().to_string();
        if records.contains_key(&key) {
            return Err(CatalogError(format!("duplicate id {key}")));
        }
        records.insert(key, record.clone());
        Ok(())
    }

    async fn replace(&self, record: &Record) -> Result<(), CatalogError> {
        let mut records = self.records.write().await;
        let key = record.id.as_str().to_string();
        match records.get_mut(&key) {
            Some(stored) => {
                *stored = record.clone();
                Ok(())
            }
            None => Err(CatalogError(format!("replace of unknown id {key}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medex_model::{MediaKind, Occurrence};

    fn record(id: &str, hash: &str, file: &str, deleted: bool) -> Record {
        let occurrence = Occurrence::from_path(
            Fingerprint::new(id),
            Path::new(file),
            4,
            0,
        );
        let mut record = Record::new(
            Fingerprint::new(id),
            Fingerprint::new(hash),
            MediaKind::Image,
            "test".into(),
            occurrence,
        );
        record.deleted = deleted;
        record
    }

    #[tokio::test]
    async fn lookup_matches_id_hash_and_sources() {
        let catalog = MemoryCatalog::new();
        catalog
            .insert(&record("aa01", "bb02", "/in/a.png", false))
            .await
            .unwrap();

        for key in ["aa01", "bb02"] {
            let found = catalog.lookup(&Fingerprint::new(key)).await.unwrap();
            assert_eq!(found.unwrap().id, Fingerprint::new("aa01"));
        }
        assert!(catalog
            .lookup(&Fingerprint::new("cc03"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn live_records_win_over_tombstones() {
        let catalog = MemoryCatalog::new();
        // Two records share a source fingerprint; only one is live.
        let mut dead = record("aa01", "ff00", "/in/a.png", true);
        dead.absorb(Occurrence::from_path(
            Fingerprint::new("dd04"),
            Path::new("/in/c.png"),
            4,
            0,
        ));
        let mut live = record("bb02", "ee05", "/in/b.png", false);
        live.absorb(Occurrence::from_path(
            Fingerprint::new("dd04"),
            Path::new("/in/d.png"),
            4,
            0,
        ));
        catalog.insert(&dead).await.unwrap();
        catalog.insert(&live).await.unwrap();

        let found = catalog
            .lookup(&Fingerprint::new("dd04"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, Fingerprint::new("bb02"));

        // A key only the tombstone has still resolves.
        let found = catalog.lookup(&Fingerprint::new("ff00")).await.unwrap();
        assert_eq!(found.unwrap().id, Fingerprint::new("aa01"));
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let catalog = MemoryCatalog::new();
        catalog
            .insert(&record("aa01", "aa01", "/in/a.png", false))
            .await
            .unwrap();
        assert!(catalog
            .insert(&record("aa01", "aa01", "/in/b.png", false))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn find_by_source_file_matches_occurrences() {
        let catalog = MemoryCatalog::new();
        catalog
            .insert(&record("aa01", "aa01", "/in/a.png", false))
            .await
            .unwrap();
        assert!(catalog
            .find_by_source_file(Path::new("/in/a.png"))
            .await
            .unwrap()
            .is_some());
        assert!(catalog
            .find_by_source_file(Path::new("/in/missing.png"))
            .await
            .unwrap()
            .is_none());
    }
}
