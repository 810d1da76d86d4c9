//! Storage abstraction for saved collections.
//!
//! A collection is persisted as one serialized sequence of
//! [`CollectionEntry`] values under a vertical-scoped collection name. Any
//! persistent key-value medium satisfies the contract: SQLite in the native
//! host, browser storage in a web host, a `HashMap` in tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::CollectionEntry;

/// Abstract persistence medium for collections.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`load`](CollectionBackend::load) | Read the full sequence for a collection (empty when absent) |
/// | [`store`](CollectionBackend::store) | Replace the full sequence for a collection |
///
/// Backends do not deduplicate or order entries; that is the job of
/// [`Collection`](crate::collection::Collection).
#[async_trait]
pub trait CollectionBackend: Send + Sync {
    async fn load(&self, collection: &str) -> Result<Vec<CollectionEntry>>;

    async fn store(&self, collection: &str, entries: &[CollectionEntry]) -> Result<()>;
}
