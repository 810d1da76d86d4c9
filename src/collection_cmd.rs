//! `lens collection list|remove`.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use fieldlens_core::collection::{ListQuery, SortOrder};
use fieldlens_core::models::CollectionEntry;
use fieldlens_core::tier::TierDisplay;

use crate::collection::CollectionStore;
use crate::config::{Config, VerticalConfig};
use crate::sqlite_store::SqliteBackend;

/// A saved entry with its tier, recomputed at read time.
#[derive(Debug, Clone, Serialize)]
pub struct PresentedEntry {
    pub entry: CollectionEntry,
    pub tier: TierDisplay,
}

pub fn present_entries(vertical: &VerticalConfig, entries: Vec<CollectionEntry>) -> Vec<PresentedEntry> {
    entries
        .into_iter()
        .map(|entry| {
            let tier = vertical.tiers.display(entry.payload.tier());
            PresentedEntry { entry, tier }
        })
        .collect()
}

async fn open_store(config: &Config, vertical: &VerticalConfig) -> Result<CollectionStore> {
    let backend = Arc::new(SqliteBackend::open(config).await?);
    Ok(CollectionStore::for_vertical(vertical, backend))
}

pub async fn run_list(
    config: &Config,
    vertical_name: &str,
    sort: SortOrder,
    filter: Option<String>,
    json: bool,
) -> Result<()> {
    let vertical = config.vertical(vertical_name)?;
    let store = open_store(config, vertical).await?;
    let query = ListQuery { sort, filter };
    let entries = present_entries(vertical, store.list(&query).await?);

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No saved entries in {}.", store.name());
        return Ok(());
    }

    println!("{} ({} entries, {})", store.name(), entries.len(), sort);
    for (i, presented) in entries.iter().enumerate() {
        let payload = &presented.entry.payload;
        let name = payload
            .display_name(&vertical.display_fields)
            .unwrap_or("(unnamed)");
        println!(
            "{}. {:<32} {:>5.1}%  {}",
            i + 1,
            name,
            payload.confidence_score,
            presented.tier.label
        );
        println!(
            "    added: {}",
            presented.entry.added_at.format("%Y-%m-%d %H:%M UTC")
        );
        println!("    id: {}", presented.entry.id);
    }
    Ok(())
}

pub async fn run_remove(config: &Config, vertical_name: &str, id: &str) -> Result<()> {
    let vertical = config.vertical(vertical_name)?;
    let store = open_store(config, vertical).await?;
    if store.remove(id).await? {
        println!("Removed {} from {}.", id, store.name());
    } else {
        println!("No entry {} in {}.", id, store.name());
    }
    Ok(())
}
