//! Dataset store: the single published snapshot and its atomic replacement

use crate::dataset::{DatasetRef, Fingerprint};
use crate::source::DataSource;
use crate::{Result, TabLensError};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// Owns the currently loaded dataset. Readers take a cheap `Arc` clone of
/// the snapshot; only the pointer swap in `replace` takes the write lock, so
/// a reload either fully precedes or fully follows any concurrent read.
pub struct DatasetStore {
    current: RwLock<Option<DatasetRef>>,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// Ingest a source and publish the result. All-or-nothing: on failure
    /// the previous snapshot remains current.
    pub async fn load(&self, source: &DataSource) -> Result<DatasetRef> {
        let dataset = Arc::new(source.load().await?);
        info!(
            rows = dataset.row_count(),
            columns = dataset.column_count(),
            fingerprint = %dataset.fingerprint().short(),
            "dataset loaded"
        );
        Ok(self.replace(dataset))
    }

    /// Publish a fully built dataset, returning it. The superseded snapshot
    /// stays alive for readers that still hold it.
    pub fn replace(&self, dataset: DatasetRef) -> DatasetRef {
        let mut slot = self.current.write();
        *slot = Some(dataset.clone());
        dataset
    }

    /// Latest published snapshot.
    pub fn current(&self) -> Result<DatasetRef> {
        self.current
            .read()
            .clone()
            .ok_or(TabLensError::NoDataset)
    }

    /// Fingerprint of the current snapshot, computed once at load time.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Ok(self.current()?.fingerprint())
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }
}

impl Default for DatasetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_store_has_no_dataset() {
        let store = DatasetStore::new();
        assert!(!store.is_loaded());
        assert!(matches!(store.current(), Err(TabLensError::NoDataset)));
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_snapshot() {
        let store = DatasetStore::new();
        let good = DataSource::delimited_bytes(b"a,b\n1,2\n".to_vec(), b',', true);
        let bad = DataSource::delimited_bytes(b"a,b\n1,2\n3\n".to_vec(), b',', true);

        let first = store.load(&good).await.unwrap();
        assert!(store.load(&bad).await.is_err());

        let current = store.current().unwrap();
        assert_eq!(current.fingerprint(), first.fingerprint());
    }

    #[tokio::test]
    async fn test_reload_changes_fingerprint() {
        let store = DatasetStore::new();
        store
            .load(&DataSource::delimited_bytes(b"a\n1\n".to_vec(), b',', true))
            .await
            .unwrap();
        let before = store.fingerprint().unwrap();
        store
            .load(&DataSource::delimited_bytes(b"a\n1\n2\n".to_vec(), b',', true))
            .await
            .unwrap();
        assert_ne!(before, store.fingerprint().unwrap());
    }

    #[tokio::test]
    async fn test_readers_keep_old_snapshot_across_reload() {
        let store = DatasetStore::new();
        store
            .load(&DataSource::delimited_bytes(b"a\n1\n".to_vec(), b',', true))
            .await
            .unwrap();
        let held = store.current().unwrap();
        store
            .load(&DataSource::delimited_bytes(b"a\n2\n".to_vec(), b',', true))
            .await
            .unwrap();
        // The held snapshot is unchanged; the store serves the new one.
        assert_eq!(held.row_count(), 1);
        assert_ne!(held.fingerprint(), store.fingerprint().unwrap());
    }
}
