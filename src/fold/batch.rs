//! The `branch → directory → [events]` shape shared by transient batch files
//! and per-day archive files.

use crate::fold::util::{fingerprint_hex, now_epoch_millis};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const NO_BRANCH: &str = "no-branch";
pub const BATCH_PREFIX: &str = "batch_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEvent {
    #[serde(rename = "File")]
    pub file: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchEntry(pub BTreeMap<String, BTreeMap<String, Vec<BatchEvent>>>);

impl BatchEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, branch: &str, directory: &str, event: BatchEvent) {
        self.0
            .entry(branch.to_string())
            .or_default()
            .entry(directory.to_string())
            .or_default()
            .push(event);
    }

    pub fn event_count(&self) -> usize {
        self.0
            .values()
            .flat_map(|dirs| dirs.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.event_count() == 0
    }

    pub fn events(&self) -> impl Iterator<Item = (&str, &str, &BatchEvent)> {
        self.0.iter().flat_map(|(branch, dirs)| {
            dirs.iter().flat_map(move |(directory, events)| {
                events
                    .iter()
                    .map(move |event| (branch.as_str(), directory.as_str(), event))
            })
        })
    }

    /// Split events by the UTC calendar day of each event.
    pub fn split_by_day(&self) -> BTreeMap<NaiveDate, BatchEntry> {
        let mut out: BTreeMap<NaiveDate, BatchEntry> = BTreeMap::new();
        for (branch, directory, event) in self.events() {
            out.entry(event.timestamp.date_naive())
                .or_default()
                .push(branch, directory, event.clone());
        }
        out
    }
}

/// Append every event of `incoming` after the existing events of the same
/// branch and directory. Nothing is deduplicated or reordered.
pub fn merge(existing: &BatchEntry, incoming: &BatchEntry) -> BatchEntry {
    let mut merged = existing.clone();
    for (branch, dirs) in &incoming.0 {
        let target = merged.0.entry(branch.clone()).or_default();
        for (directory, events) in dirs {
            target
                .entry(directory.clone())
                .or_default()
                .extend(events.iter().cloned());
        }
    }
    merged
}

pub fn batch_file_name() -> Result<String> {
    let millis = now_epoch_millis()?;
    let suffix = fingerprint_hex(BATCH_PREFIX.as_bytes(), millis, 6);
    Ok(format!("{BATCH_PREFIX}{millis}_{suffix}.json"))
}

pub fn is_batch_name(name: &str) -> bool {
    name.starts_with(BATCH_PREFIX) && name.ends_with(".json")
}
