//! Collection semantics: a deduplicated, ordered list of saved
//! identifications for one vertical (garden, life-list, portfolio).
//!
//! [`Collection`] is a plain value. Persisting it is the job of a
//! [`CollectionBackend`](crate::store::CollectionBackend); serializing
//! concurrent mutations is the job of the host's collection store.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::CollectionEntry;

/// Result of [`Collection::save`]. `AlreadySaved` is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved,
    AlreadySaved,
}

impl SaveOutcome {
    pub fn is_new(self) -> bool {
        matches!(self, SaveOutcome::Saved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// `added_at` descending.
    #[default]
    Newest,
    /// `added_at` ascending.
    Oldest,
    /// `confidence_score` descending, ties newest first.
    Confidence,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" | "added" | "added_at" => Ok(SortOrder::Newest),
            "oldest" => Ok(SortOrder::Oldest),
            "confidence" | "score" => Ok(SortOrder::Confidence),
            other => Err(format!(
                "unknown sort '{}': expected newest, oldest, or confidence",
                other
            )),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortOrder::Newest => "newest",
            SortOrder::Oldest => "oldest",
            SortOrder::Confidence => "confidence",
        })
    }
}

/// Sort and filter options for [`Collection::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub sort: SortOrder,
    /// Case-insensitive substring over the display fields. Blank matches all.
    pub filter: Option<String>,
}

impl ListQuery {
    pub fn sorted(sort: SortOrder) -> Self {
        Self { sort, filter: None }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Saved entries in insertion order, unique by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    entries: Vec<CollectionEntry>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a persisted sequence. Duplicate ids (from a medium written
    /// by another tab) keep their first occurrence.
    pub fn from_entries(entries: Vec<CollectionEntry>) -> Self {
        let mut collection = Self::new();
        for entry in entries {
            collection.save(entry);
        }
        collection
    }

    pub fn save(&mut self, entry: CollectionEntry) -> SaveOutcome {
        if self.contains(&entry.id) {
            return SaveOutcome::AlreadySaved;
        }
        self.entries.push(entry);
        SaveOutcome::Saved
    }

    /// Remove by id. A missing id is a no-op returning `false`.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&CollectionEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CollectionEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<CollectionEntry> {
        self.entries
    }

    /// Filtered, sorted view. With no `display_fields`, the filter searches
    /// every string field of the payload.
    pub fn list(&self, query: &ListQuery, display_fields: &[String]) -> Vec<CollectionEntry> {
        let needle = query
            .filter
            .as_deref()
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty());

        let mut out: Vec<CollectionEntry> = self
            .entries
            .iter()
            .filter(|e| match &needle {
                Some(n) => matches_filter(e, n, display_fields),
                None => true,
            })
            .cloned()
            .collect();

        match query.sort {
            SortOrder::Newest => out.sort_by(|a, b| b.added_at.cmp(&a.added_at)),
            SortOrder::Oldest => out.sort_by(|a, b| a.added_at.cmp(&b.added_at)),
            SortOrder::Confidence => out.sort_by(|a, b| {
                b.payload
                    .confidence_score
                    .partial_cmp(&a.payload.confidence_score)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| b.added_at.cmp(&a.added_at))
            }),
        }
        out
    }
}

/// `needle` must already be lowercased.
fn matches_filter(entry: &CollectionEntry, needle: &str, display_fields: &[String]) -> bool {
    let fields = &entry.payload.fields;
    let hit = |v: &Value| {
        v.as_str()
            .map(|s| s.to_lowercase().contains(needle))
            .unwrap_or(false)
    };
    if display_fields.is_empty() {
        fields.values().any(hit)
    } else {
        display_fields
            .iter()
            .filter_map(|f| fields.get(f))
            .any(hit)
    }
}
