//! Configured verticals, as listed by `lens verticals` and `GET /verticals`.

use serde::Serialize;

use crate::config::{Config, VerticalConfig};

#[derive(Debug, Clone, Serialize)]
pub struct VerticalSummary {
    pub name: String,
    pub title: String,
    pub collection: String,
    pub accept: Vec<String>,
    pub max_bytes: u64,
    pub confidence_scale: String,
}

impl From<&VerticalConfig> for VerticalSummary {
    fn from(v: &VerticalConfig) -> Self {
        Self {
            name: v.name.clone(),
            title: v.title().to_string(),
            collection: v.collection_name().to_string(),
            accept: v.accepted_types(),
            max_bytes: v.max_bytes,
            confidence_scale: v.confidence_scale.to_string(),
        }
    }
}

pub fn summaries(config: &Config) -> Vec<VerticalSummary> {
    config.verticals.values().map(VerticalSummary::from).collect()
}

pub fn run_verticals(config: &Config) {
    let list = summaries(config);
    if list.is_empty() {
        println!("No verticals configured.");
        return;
    }
    println!("{:<12} {:<24} {:<16} {:>10}  ACCEPT", "VERTICAL", "TITLE", "COLLECTION", "MAX");
    for v in list {
        println!(
            "{:<12} {:<24} {:<16} {:>10}  {}",
            v.name,
            v.title,
            v.collection,
            v.max_bytes,
            v.accept.join(", ")
        );
    }
}
