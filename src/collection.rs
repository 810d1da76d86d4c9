//! Per-vertical collection store.
//!
//! Wraps a [`CollectionBackend`] with the [`Collection`] value semantics.
//! Every mutation is a load-modify-store cycle under an async mutex, so
//! concurrent saves from the server never lose an entry.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Mutex;

use fieldlens_core::collection::{Collection, ListQuery, SaveOutcome};
use fieldlens_core::models::{CollectionEntry, IdentificationResult};
use fieldlens_core::store::CollectionBackend;

use crate::config::VerticalConfig;

pub struct CollectionStore {
    name: String,
    display_fields: Vec<String>,
    backend: Arc<dyn CollectionBackend>,
    lock: Mutex<()>,
}

impl CollectionStore {
    pub fn new(
        name: impl Into<String>,
        display_fields: Vec<String>,
        backend: Arc<dyn CollectionBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            display_fields,
            backend,
            lock: Mutex::new(()),
        }
    }

    pub fn for_vertical(vertical: &VerticalConfig, backend: Arc<dyn CollectionBackend>) -> Self {
        Self::new(
            vertical.collection_name(),
            vertical.display_fields.clone(),
            backend,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Save a result, stamping `added_at` now. Saving the same id twice
    /// returns [`SaveOutcome::AlreadySaved`] and leaves the store unchanged.
    pub async fn save(&self, result: IdentificationResult) -> Result<SaveOutcome> {
        self.save_entry(CollectionEntry::new(result, Utc::now())).await
    }

    pub async fn save_entry(&self, entry: CollectionEntry) -> Result<SaveOutcome> {
        let _guard = self.lock.lock().await;
        let mut collection = self.load().await?;
        let id = entry.id.clone();
        let outcome = collection.save(entry);
        if outcome.is_new() {
            self.backend
                .store(&self.name, collection.entries())
                .await?;
            tracing::info!(collection = %self.name, id = %id, "saved to collection");
        } else {
            tracing::debug!(collection = %self.name, id = %id, "already saved");
        }
        Ok(outcome)
    }

    /// Remove by id. Returns `false` if nothing was removed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut collection = self.load().await?;
        if !collection.remove(id) {
            return Ok(false);
        }
        self.backend.store(&self.name, collection.entries()).await?;
        tracing::info!(collection = %self.name, id = %id, "removed from collection");
        Ok(true)
    }

    pub async fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.load().await?.contains(id))
    }

    pub async fn get(&self, id: &str) -> Result<Option<CollectionEntry>> {
        Ok(self.load().await?.get(id).cloned())
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.load().await?.len())
    }

    pub async fn list(&self, query: &ListQuery) -> Result<Vec<CollectionEntry>> {
        Ok(self.load().await?.list(query, &self.display_fields))
    }

    async fn load(&self) -> Result<Collection> {
        Ok(Collection::from_entries(self.backend.load(&self.name).await?))
    }
}
