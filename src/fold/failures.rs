use std::collections::HashMap;

const MAX_QUARANTINE_BACKOFF_TICKS: u32 = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FailureEntry {
    count: u32,
    quarantine_misses: u32,
    skip_ticks: u32,
}

/// Per-request failure counts for the lifetime of the process.
///
/// Also remembers failed quarantine moves so the processor can back off
/// instead of retrying a broken move every tick.
#[derive(Debug, Default)]
pub struct FailureTracker {
    entries: HashMap<String, FailureEntry>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed attempt and return the new count.
    pub fn record_failure(&mut self, request_id: &str) -> u32 {
        let entry = self.entries.entry(request_id.to_string()).or_default();
        entry.count = entry.count.saturating_add(1);
        entry.count
    }

    pub fn count(&self, request_id: &str) -> u32 {
        self.entries.get(request_id).map_or(0, |e| e.count)
    }

    pub fn clear(&mut self, request_id: &str) {
        self.entries.remove(request_id);
    }

    /// A quarantine move failed: keep the saturated count and skip the
    /// request for 1, 2, 4 … ticks.
    pub fn record_quarantine_miss(&mut self, request_id: &str) -> u32 {
        let entry = self.entries.entry(request_id.to_string()).or_default();
        entry.quarantine_misses = entry.quarantine_misses.saturating_add(1);
        let exponent = entry.quarantine_misses.saturating_sub(1).min(6);
        entry.skip_ticks = (1u32 << exponent).min(MAX_QUARANTINE_BACKOFF_TICKS);
        entry.skip_ticks
    }

    /// Whether this drain should leave the request alone. Consumes one tick
    /// of backoff when it does.
    pub fn should_skip(&mut self, request_id: &str) -> bool {
        match self.entries.get_mut(request_id) {
            Some(entry) if entry.skip_ticks > 0 => {
                entry.skip_ticks -= 1;
                true
            }
            _ => false,
        }
    }

    /// Drop entries for requests no longer pending (deleted by hand, or
    /// quarantined by another process).
    pub fn retain_pending<'a>(&mut self, pending: impl IntoIterator<Item = &'a str>) {
        let keep: std::collections::HashSet<&str> = pending.into_iter().collect();
        self.entries.retain(|id, _| keep.contains(id.as_str()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
