//! Time-series store.
//!
//! Keeps one ordered, deduplicated series per device. Within a series the
//! identity key `(device_id, timestamp)` is unique, so timestamps are strictly
//! increasing. Bulk loads merge into the existing series; single live readings
//! are placed by binary search.
//!
//! The store is not internally synchronized. Callers serialize mutation (see
//! [`crate::engine::SharedEngine`]).

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::models::Reading;

// ---

/// Per-device retention policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Retention {
    #[default]
    Unbounded,
    /// Keep at most this many of the most recent readings per device.
    Limit(usize),
}

impl Retention {
    fn cap(self) -> Option<usize> {
        match self {
            Retention::Unbounded => None,
            Retention::Limit(n) => Some(n),
        }
    }
}

impl fmt::Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Retention::Unbounded => f.write_str("unbounded"),
            Retention::Limit(n) => write!(f, "{n}"),
        }
    }
}

impl std::str::FromStr for Retention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unbounded") || s.eq_ignore_ascii_case("none") {
            return Ok(Retention::Unbounded);
        }
        s.parse::<usize>()
            .map(Retention::Limit)
            .map_err(|e| format!("expected an integer or 'unbounded', got '{s}': {e}"))
    }
}

// Serialized as either an integer or the string "unbounded".
impl Serialize for Retention {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Retention::Unbounded => serializer.serialize_str("unbounded"),
            Retention::Limit(n) => serializer.serialize_u64(*n as u64),
        }
    }
}

impl<'de> Deserialize<'de> for Retention {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Limit(usize),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Limit(n) => Ok(Retention::Limit(n)),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Inclusive `[start, end]` range over reading `timestamp`; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeRange {
    pub fn between(start: i64, end: i64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }
}

/// Received-at window relative to "now", as offered by the dashboard's date selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecentWindow {
    #[default]
    All,
    Day,
    Week,
    Month,
}

impl RecentWindow {
    /// Earliest `received_at` admitted by the window, or `None` for [`RecentWindow::All`].
    pub fn cutoff(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RecentWindow::All => None,
            RecentWindow::Day => Some(now - Duration::days(1)),
            RecentWindow::Week => Some(now - Duration::days(7)),
            RecentWindow::Month => Some(
                now.checked_sub_months(chrono::Months::new(1))
                    .unwrap_or(now - Duration::days(30)),
            ),
        }
    }
}

/// Result of offering one reading to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Stored. `out_of_order` is set when it landed before the newest reading.
    Inserted { out_of_order: bool },
    /// Same identity key already stored; nothing changed.
    Duplicate,
    /// Older than every retained reading of a device already at its cap.
    Expired,
}

impl IngestOutcome {
    pub fn is_inserted(self) -> bool {
        matches!(self, IngestOutcome::Inserted { .. })
    }
}

/// Summary of one bulk merge.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BulkOutcome {
    /// Newly stored readings in the order they were merged (per device, ascending).
    pub inserted: Vec<Reading>,
    pub duplicates: usize,
    pub expired: usize,
    pub out_of_order: usize,
}

#[derive(Debug, Default)]
pub struct TimeSeriesStore {
    series: BTreeMap<String, VecDeque<Reading>>,
    /// Newest evicted timestamp per device. Keys at or below it were already
    /// accepted once and are never stored again.
    evicted: HashMap<String, i64>,
    retention: Retention,
}

impl TimeSeriesStore {
    // ---
    pub fn new(retention: Retention) -> Self {
        Self {
            series: BTreeMap::new(),
            evicted: HashMap::new(),
            retention,
        }
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Change the retention policy; a lower cap trims every series immediately.
    pub fn set_retention(&mut self, retention: Retention) {
        self.retention = retention;
        if let Some(cap) = retention.cap() {
            for (device_id, series) in self.series.iter_mut() {
                if let Some(ts) = trim_front(series, cap) {
                    mark_evicted(&mut self.evicted, device_id, ts);
                }
            }
        }
    }

    /// Insert one live reading, keeping order, dedup and retention.
    pub fn ingest_one(&mut self, reading: Reading) -> IngestOutcome {
        // ---
        let cap = self.retention.cap();
        if cap == Some(0) {
            return IngestOutcome::Expired;
        }
        if self
            .evicted
            .get(&reading.device_id)
            .is_some_and(|&floor| reading.timestamp <= floor)
        {
            return IngestOutcome::Expired;
        }

        let series = self.series.entry(reading.device_id.clone()).or_default();

        let pos = match series.binary_search_by_key(&reading.timestamp, |r| r.timestamp) {
            Ok(_) => return IngestOutcome::Duplicate,
            Err(pos) => pos,
        };

        if let Some(cap) = cap {
            if series.len() >= cap && pos == 0 {
                return IngestOutcome::Expired;
            }
        }

        let out_of_order = pos < series.len();
        let device_id = reading.device_id.clone();
        series.insert(pos, reading);

        if let Some(ts) = cap.and_then(|cap| trim_front(series, cap)) {
            mark_evicted(&mut self.evicted, &device_id, ts);
        }

        IngestOutcome::Inserted { out_of_order }
    }

    /// Merge many readings (historical backfill) into their device series.
    ///
    /// Runs in time proportional to input plus existing size per touched device.
    /// Within the input, the first occurrence of a key wins; against stored
    /// data, the stored reading wins.
    pub fn ingest_bulk(&mut self, readings: Vec<Reading>) -> BulkOutcome {
        // ---
        let mut outcome = BulkOutcome::default();

        let mut by_device: BTreeMap<String, Vec<Reading>> = BTreeMap::new();
        for reading in readings {
            by_device
                .entry(reading.device_id.clone())
                .or_default()
                .push(reading);
        }

        let cap = self.retention.cap();

        for (device_id, mut incoming) in by_device {
            // Stable sort keeps first-seen order among equal timestamps.
            incoming.sort_by_key(|r| r.timestamp);
            let mut seen = HashSet::with_capacity(incoming.len());
            let before = incoming.len();
            incoming.retain(|r| seen.insert(r.timestamp));
            outcome.duplicates += before - incoming.len();

            let existing = self.series.remove(&device_id).unwrap_or_default();

            if cap == Some(0) {
                outcome.expired += incoming.len();
                continue;
            }

            // At capacity, anything older than the oldest retained reading would be
            // evicted straight away; anything at or below an evicted key was seen before.
            let full_floor = match (cap, existing.front()) {
                (Some(cap), Some(front)) if existing.len() >= cap => Some(front.timestamp),
                _ => None,
            };
            let evicted_floor = self.evicted.get(&device_id).map(|ts| ts.saturating_add(1));
            let floor = full_floor.max(evicted_floor);
            let newest = existing.back().map(|r| r.timestamp);

            let mut merged = merge_series(existing, incoming, floor, newest, &mut outcome);
            if let Some(ts) = cap.and_then(|cap| trim_front(&mut merged, cap)) {
                mark_evicted(&mut self.evicted, &device_id, ts);
            }
            self.series.insert(device_id, merged);
        }

        outcome
    }

    /// Ordered readings for one device (or all devices), optionally limited to a range.
    pub fn query(&self, device_id: Option<&str>, range: Option<TimeRange>) -> Vec<Reading> {
        // ---
        match device_id {
            Some(id) => self
                .series
                .get(id)
                .map(|series| slice_range(series, range).cloned().collect())
                .unwrap_or_default(),
            None => {
                let mut all: Vec<Reading> = self
                    .series
                    .values()
                    .flat_map(|series| slice_range(series, range).cloned())
                    .collect();
                // Devices iterate in id order, so a stable sort breaks timestamp ties by device.
                all.sort_by_key(|r| r.timestamp);
                all
            }
        }
    }

    /// Newest reading of one device, or the newest across all devices.
    pub fn latest(&self, device_id: Option<&str>) -> Option<Reading> {
        match device_id {
            Some(id) => self.series.get(id).and_then(|s| s.back()).cloned(),
            None => self
                .series
                .values()
                .filter_map(|s| s.back())
                .max_by_key(|r| r.timestamp)
                .cloned(),
        }
    }

    /// Number of retained readings across all devices.
    pub fn total_len(&self) -> usize {
        self.series.values().map(VecDeque::len).sum()
    }
}

/// Drop the oldest readings beyond `cap`; returns the newest evicted timestamp.
fn trim_front(series: &mut VecDeque<Reading>, cap: usize) -> Option<i64> {
    let mut last = None;
    while series.len() > cap {
        last = series.pop_front().map(|r| r.timestamp);
    }
    last
}

fn mark_evicted(evicted: &mut HashMap<String, i64>, device_id: &str, ts: i64) {
    let floor = evicted.entry(device_id.to_string()).or_insert(ts);
    *floor = (*floor).max(ts);
}

fn merge_series(
    existing: VecDeque<Reading>,
    incoming: Vec<Reading>,
    floor: Option<i64>,
    newest: Option<i64>,
    outcome: &mut BulkOutcome,
) -> VecDeque<Reading> {
    // ---
    let mut merged = VecDeque::with_capacity(existing.len() + incoming.len());
    let mut old = existing.into_iter().peekable();

    for reading in incoming {
        if floor.is_some_and(|f| reading.timestamp < f) {
            outcome.expired += 1;
            continue;
        }

        while let Some(head) = old.next_if(|r| r.timestamp < reading.timestamp) {
            merged.push_back(head);
        }

        if old.peek().is_some_and(|r| r.timestamp == reading.timestamp) {
            outcome.duplicates += 1;
            continue;
        }

        if newest.is_some_and(|n| reading.timestamp < n) {
            outcome.out_of_order += 1;
        }
        outcome.inserted.push(reading.clone());
        merged.push_back(reading);
    }

    merged.extend(old);
    merged
}

fn slice_range<'a>(
    series: &'a VecDeque<Reading>,
    range: Option<TimeRange>,
) -> impl Iterator<Item = &'a Reading> + 'a {
    // ---
    let (lo, hi) = match range {
        None => (0, series.len()),
        Some(range) => {
            let lo = range
                .start
                .map_or(0, |s| series.partition_point(|r| r.timestamp < s));
            let hi = range
                .end
                .map_or(series.len(), |e| series.partition_point(|r| r.timestamp <= e));
            (lo, hi.max(lo))
        }
    };
    series.range(lo..hi)
}
