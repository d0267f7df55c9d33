use crate::fold::batch::{BatchEntry, is_batch_name, merge};
use crate::fold::paths::day_file;
use crate::fold::util::{remove_file_if_exists, write_atomic};
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectOutcome {
    pub collected: bool,
    pub files_processed: usize,
    pub events: usize,
    pub days: Vec<NaiveDate>,
    /// Sources holding only events from today or later, left untouched.
    pub deferred_files: usize,
    /// Sources whose past days were archived and which were rewritten to
    /// keep only their events from today or later.
    pub split_files: usize,
    pub unreadable_files: Vec<String>,
    pub undeleted_files: Vec<String>,
}

/// Folds transient `batch_*.json` files into `{YYYY}/{MM}/{DD}.json`.
#[derive(Debug)]
pub struct Collector {
    batches_dir: PathBuf,
    pass: Mutex<()>,
}

struct Source {
    name: String,
    path: PathBuf,
    /// Events from today or later that must stay transient.
    remainder: Option<BatchEntry>,
}

impl Collector {
    pub fn new(batches_dir: impl Into<PathBuf>) -> Self {
        Self {
            batches_dir: batches_dir.into(),
            pass: Mutex::new(()),
        }
    }

    pub fn batches_dir(&self) -> &Path {
        &self.batches_dir
    }

    pub fn transient_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let read_dir = match fs::read_dir(&self.batches_dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", self.batches_dir.display()));
            }
        };

        let mut out = Vec::new();
        for entry in read_dir {
            let entry = entry
                .with_context(|| format!("failed to read {}", self.batches_dir.display()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !is_batch_name(name) {
                continue;
            }
            out.push((name.to_string(), path));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    /// One collection pass. Only days strictly before `now`'s UTC day are
    /// folded. A source holding events from today or later is split: its past
    /// days are archived and the file is rewritten with the rest. Sources
    /// with no events at all are deleted. Nothing is deleted or rewritten
    /// until every day merged.
    pub fn collect(&self, now: DateTime<Utc>) -> Result<CollectOutcome> {
        let _pass = self
            .pass
            .lock()
            .map_err(|_| anyhow::anyhow!("collector pass mutex poisoned"))?;

        let today = now.date_naive();
        let mut out = CollectOutcome::default();
        let mut by_day: BTreeMap<NaiveDate, BatchEntry> = BTreeMap::new();
        let mut consumed = Vec::<Source>::new();

        for (name, path) in self.transient_files()? {
            let parsed = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))
                .and_then(|raw| {
                    serde_json::from_str::<BatchEntry>(&raw)
                        .with_context(|| format!("failed to parse {}", path.display()))
                });
            let entry = match parsed {
                Ok(entry) => entry,
                Err(err) => {
                    eprintln!("timefold collector: skipping {name}: {err:#}");
                    out.unreadable_files.push(name);
                    continue;
                }
            };

            let mut past = entry.split_by_day();
            let current = past.split_off(&today);
            if past.is_empty() && !current.is_empty() {
                out.deferred_files += 1;
                continue;
            }

            for (day, events) in past {
                out.events += events.event_count();
                let slot = by_day.entry(day).or_default();
                *slot = merge(slot, &events);
            }
            let remainder = if current.is_empty() {
                None
            } else {
                Some(
                    current
                        .values()
                        .fold(BatchEntry::new(), |acc, day| merge(&acc, day)),
                )
            };
            consumed.push(Source {
                name,
                path,
                remainder,
            });
        }

        if consumed.is_empty() {
            return Ok(out);
        }

        for (day, incoming) in &by_day {
            self.merge_day(*day, incoming)?;
            out.days.push(*day);
        }

        for source in &consumed {
            let retired = match &source.remainder {
                None => remove_file_if_exists(&source.path),
                Some(rest) => {
                    out.split_files += 1;
                    serde_json::to_vec_pretty(rest)
                        .map_err(anyhow::Error::from)
                        .and_then(|body| write_atomic(&source.path, &body))
                }
            };
            if let Err(err) = retired {
                eprintln!("timefold collector: {err:#}");
                out.undeleted_files.push(source.name.clone());
            }
        }

        out.collected = true;
        out.files_processed = consumed.len();
        Ok(out)
    }

    pub fn day_path(&self, day: NaiveDate) -> PathBuf {
        day_file(&self.batches_dir, day.year(), day.month(), day.day())
    }

    pub fn read_day(&self, day: NaiveDate) -> Result<Option<BatchEntry>> {
        let path = self.day_path(day);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let parsed = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(parsed))
    }

    fn merge_day(&self, day: NaiveDate, incoming: &BatchEntry) -> Result<()> {
        let existing = self.read_day(day)?.unwrap_or_default();
        let merged = merge(&existing, incoming);
        let body = serde_json::to_vec_pretty(&merged)?;
        write_atomic(&self.day_path(day), &body)
            .with_context(|| format!("failed to merge archive day {day}"))
    }
}
