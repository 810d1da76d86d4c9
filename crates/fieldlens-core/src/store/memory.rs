//! In-memory [`CollectionBackend`] for tests and WASM hosts.
//!
//! Stores each collection as its serialized JSON text behind
//! `std::sync::RwLock`, so the round trip through serde matches what a real
//! key-value medium sees.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use crate::models::CollectionEntry;

use super::CollectionBackend;

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    collections: RwLock<HashMap<String, String>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw serialized text of a collection, if written.
    pub fn raw(&self, collection: &str) -> Option<String> {
        self.collections
            .read()
            .ok()
            .and_then(|m| m.get(collection).cloned())
    }
}

#[async_trait]
impl CollectionBackend for InMemoryBackend {
    async fn load(&self, collection: &str) -> Result<Vec<CollectionEntry>> {
        let raw = {
            let map = self
                .collections
                .read()
                .map_err(|_| anyhow!("collection backend lock poisoned"))?;
            map.get(collection).cloned()
        };
        match raw {
            Some(text) => serde_json::from_str(&text)
                .with_context(|| format!("corrupt collection '{}'", collection)),
            None => Ok(Vec::new()),
        }
    }

    async fn store(&self, collection: &str, entries: &[CollectionEntry]) -> Result<()> {
        let text = serde_json::to_string(entries)?;
        self.collections
            .write()
            .map_err(|_| anyhow!("collection backend lock poisoned"))?
            .insert(collection.to_string(), text);
        Ok(())
    }
}
