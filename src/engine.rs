//! The sensor engine: store, aggregator and alert engine behind one facade.
//!
//! Everything the rendering layer may see goes through here. Readers get
//! copies, never references into the engine's collections. Every reading the
//! store accepts is forwarded to the aggregator and the alert engine exactly
//! once; duplicates and expired readings stop at the store.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::aggregator::RollingAggregator;
use crate::alerts::{self, Thresholds};
use crate::error::CoreError;
use crate::models::{AggregateSnapshot, Alert, IngestStats, Reading};
use crate::normalize::normalize;
use crate::store::{
    BulkOutcome, IngestOutcome, RecentWindow, Retention, TimeRange, TimeSeriesStore,
};

// ---

/// Engine shared between the coordinator task and readers.
///
/// Mutation is serialized by the lock; alert observers run while it is held
/// and must not lock the engine themselves.
pub type SharedEngine = Arc<RwLock<SensorEngine>>;

pub type AlertCallback = Box<dyn Fn(&Alert) + Send + Sync>;

/// Runtime-adjustable options, see [`SensorEngine::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    #[serde(default)]
    pub retention_limit: Retention,
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Evaluate alerts for readings that arrive through backfill.
    #[serde(default = "default_true")]
    pub alert_on_backfill: bool,
    /// Maximum undrained alerts kept for [`SensorEngine::poll_alerts`]; oldest dropped first.
    #[serde(default)]
    pub alert_queue_limit: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            retention_limit: Retention::Unbounded,
            thresholds: Thresholds::default(),
            alert_on_backfill: true,
            alert_queue_limit: None,
        }
    }
}

/// Filter for [`SensorEngine::find_series`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesQuery {
    pub device_id: Option<String>,
    pub range: Option<TimeRange>,
    #[serde(default)]
    pub window: RecentWindow,
    /// Keep only the latest `limit` readings of the result.
    pub limit: Option<usize>,
}

/// What happened to one page of raw records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageSummary {
    pub received: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub expired: usize,
}

pub struct SensorEngine {
    store: TimeSeriesStore,
    aggregator: RollingAggregator,
    options: EngineOptions,
    devices: BTreeSet<String>,
    alert_queue: VecDeque<Alert>,
    observers: Vec<AlertCallback>,
    stats: IngestStats,
}

impl Default for SensorEngine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl SensorEngine {
    // ---
    pub fn new(options: EngineOptions) -> Self {
        Self {
            store: TimeSeriesStore::new(options.retention_limit),
            aggregator: RollingAggregator::new(),
            options,
            devices: BTreeSet::new(),
            alert_queue: VecDeque::new(),
            observers: Vec::new(),
            stats: IngestStats::default(),
        }
    }

    pub fn shared(self) -> SharedEngine {
        Arc::new(RwLock::new(self))
    }

    /// Replace the options. Takes effect for the next reading; a lower
    /// retention limit trims stored series immediately.
    pub fn configure(&mut self, options: EngineOptions) {
        // ---
        if options.retention_limit != self.store.retention() {
            self.store.set_retention(options.retention_limit);
        }
        self.options = options;
        if let Some(limit) = options.alert_queue_limit {
            self.trim_alert_queue(limit);
        }
        debug!("Engine reconfigured: {:?}", self.options);
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    // --- ingestion

    /// Normalize and ingest one live record.
    ///
    /// A malformed record is counted and returned as an error; the engine is unchanged.
    pub fn ingest_raw(
        &mut self,
        raw: Value,
        received_at: DateTime<Utc>,
    ) -> Result<IngestOutcome, CoreError> {
        // ---
        match normalize(raw, received_at) {
            Ok(reading) => Ok(self.ingest_one(reading)),
            Err(e) => {
                self.stats.malformed += 1;
                warn!("Dropping live record: {}", e);
                Err(e)
            }
        }
    }

    /// Insert one normalized live reading and, if accepted, aggregate and evaluate it.
    pub fn ingest_one(&mut self, reading: Reading) -> IngestOutcome {
        // ---
        let outcome = self.store.ingest_one(reading.clone());

        match outcome {
            IngestOutcome::Inserted { out_of_order } => {
                if out_of_order {
                    self.stats.out_of_order += 1;
                    debug!(
                        "Out-of-order reading for {} at timestamp {}",
                        reading.device_id, reading.timestamp
                    );
                }
                self.accept(&reading, true);
            }
            IngestOutcome::Duplicate => {
                self.stats.duplicates += 1;
                debug!("Duplicate reading {:?} ignored", reading.key());
            }
            IngestOutcome::Expired => {
                self.stats.expired += 1;
                debug!(
                    "Reading for {} at timestamp {} is older than retained history",
                    reading.device_id, reading.timestamp
                );
            }
        }

        outcome
    }

    /// Normalize and merge one backfill page. Malformed items are counted and skipped.
    pub fn ingest_raw_page(
        &mut self,
        items: Vec<Value>,
        received_at: DateTime<Utc>,
    ) -> PageSummary {
        // ---
        let received = items.len();
        let mut readings = Vec::with_capacity(received);
        let mut malformed = 0;

        for (i, item) in items.into_iter().enumerate() {
            match normalize(item, received_at) {
                Ok(reading) => readings.push(reading),
                Err(e) => {
                    malformed += 1;
                    warn!("Dropping backfill item {}: {}", i, e);
                }
            }
        }
        self.stats.malformed += malformed as u64;

        let outcome = self.ingest_bulk(readings);

        PageSummary {
            received,
            accepted: outcome.inserted.len(),
            duplicates: outcome.duplicates,
            malformed,
            expired: outcome.expired,
        }
    }

    /// Merge normalized historical readings and aggregate every newly stored one.
    pub fn ingest_bulk(&mut self, readings: Vec<Reading>) -> BulkOutcome {
        // ---
        let outcome = self.store.ingest_bulk(readings);

        self.stats.duplicates += outcome.duplicates as u64;
        self.stats.expired += outcome.expired as u64;
        self.stats.out_of_order += outcome.out_of_order as u64;

        let evaluate = self.options.alert_on_backfill;
        for reading in &outcome.inserted {
            self.accept(reading, evaluate);
        }

        outcome
    }

    fn accept(&mut self, reading: &Reading, evaluate: bool) {
        // ---
        self.stats.accepted += 1;
        if !self.devices.contains(&reading.device_id) {
            debug!("New device observed: {}", reading.device_id);
            self.devices.insert(reading.device_id.clone());
        }

        self.aggregator.update(&reading.device_id, reading);

        if evaluate {
            for alert in alerts::evaluate(reading, &self.options.thresholds) {
                self.publish(alert);
            }
        }
    }

    fn publish(&mut self, alert: Alert) {
        // ---
        self.stats.alerts_raised += 1;
        debug!("{:?} alert for {}: {}", alert.severity, alert.device_id, alert.message);

        for observer in &self.observers {
            observer(&alert);
        }

        self.alert_queue.push_back(alert);
        if let Some(limit) = self.options.alert_queue_limit {
            self.trim_alert_queue(limit);
        }
    }

    fn trim_alert_queue(&mut self, limit: usize) {
        while self.alert_queue.len() > limit {
            self.alert_queue.pop_front();
            self.stats.alerts_dropped += 1;
        }
    }

    // --- queries

    /// Ordered readings for one device (or all devices merged), optionally in a timestamp range.
    pub fn get_series(&self, device_id: Option<&str>, range: Option<TimeRange>) -> Vec<Reading> {
        self.store.query(device_id, range)
    }

    /// Dashboard query: device, timestamp range, received-at window and tail limit.
    pub fn find_series(&self, query: &SeriesQuery, now: DateTime<Utc>) -> Vec<Reading> {
        // ---
        let mut readings = self.store.query(query.device_id.as_deref(), query.range);

        if let Some(cutoff) = query.window.cutoff(now) {
            readings.retain(|r| r.received_at >= cutoff);
        }

        if let Some(limit) = query.limit {
            let skip = readings.len().saturating_sub(limit);
            readings = readings.split_off(skip);
        }

        readings
    }

    pub fn get_devices(&self) -> BTreeSet<String> {
        self.devices.clone()
    }

    pub fn get_snapshot(&self, device_id: &str) -> Option<AggregateSnapshot> {
        self.aggregator.snapshot(device_id)
    }

    pub fn get_global_snapshot(&self) -> AggregateSnapshot {
        self.aggregator.global_snapshot()
    }

    /// Newest stored reading by timestamp, for one device or across all of them.
    pub fn latest(&self, device_id: Option<&str>) -> Option<Reading> {
        self.store.latest(device_id)
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Readings currently retained in the store.
    pub fn stored_len(&self) -> usize {
        self.store.total_len()
    }

    // --- alert delivery

    /// Register an observer called once for every alert fired from now on.
    pub fn on_alert<F>(&mut self, callback: F)
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(callback));
    }

    /// Drain alerts fired since the previous poll. Each alert is returned once.
    pub fn poll_alerts(&mut self) -> Vec<Alert> {
        self.alert_queue.drain(..).collect()
    }

    pub fn pending_alerts(&self) -> usize {
        self.alert_queue.len()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::alerts::RangeThresholds;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap()
    }

    fn raw(device: &str, ts: i64, temp: f64) -> Value {
        json!({
            "device_id": device,
            "timestamp": ts,
            "temperature": temp,
            "humidity": 50.0,
            "battery_voltage": 3.3,
            "move_count": 1
        })
    }

    fn hot_only() -> EngineOptions {
        EngineOptions {
            thresholds: Thresholds {
                temperature: RangeThresholds {
                    low: None,
                    high: Some(30.0),
                    critical_high: Some(40.0),
                },
                ..Thresholds::none()
            },
            ..EngineOptions::default()
        }
    }

    #[test]
    fn test_duplicate_ingestion_is_idempotent() {
        // ---
        let mut once = SensorEngine::new(hot_only());
        once.ingest_raw(raw("A", 1, 35.0), now()).unwrap();

        let mut twice = SensorEngine::new(hot_only());
        twice.ingest_raw(raw("A", 1, 35.0), now()).unwrap();
        let second = twice.ingest_raw(raw("A", 1, 35.0), now()).unwrap();

        assert_eq!(second, IngestOutcome::Duplicate);
        assert_eq!(once.get_series(Some("A"), None), twice.get_series(Some("A"), None));
        assert_eq!(once.get_snapshot("A"), twice.get_snapshot("A"));
        assert_eq!(once.poll_alerts().len(), twice.poll_alerts().len());
        assert_eq!(twice.stats().duplicates, 1);
    }

    #[test]
    fn test_malformed_is_counted_not_fatal() {
        // ---
        let mut engine = SensorEngine::default();
        let err = engine.ingest_raw(json!("garbage"), now()).unwrap_err();

        assert!(matches!(err, CoreError::MalformedReading(_)));
        assert_eq!(engine.stats().malformed, 1);
        assert!(engine.get_devices().is_empty());

        let items = vec![raw("A", 1, 20.0), json!(7), raw("A", 2, 20.0)];
        let summary = engine.ingest_raw_page(items, now());
        assert_eq!(summary.received, 3);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.malformed, 1);
        assert_eq!(engine.stats().malformed, 2);
    }

    #[test]
    fn test_alerts_are_delivered_once() {
        // ---
        let mut engine = SensorEngine::new(hot_only());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        engine.on_alert(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        engine.ingest_raw(raw("A", 1, 35.0), now()).unwrap();
        engine.ingest_raw(raw("A", 2, 45.0), now()).unwrap();
        engine.ingest_raw(raw("A", 3, 25.0), now()).unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(engine.poll_alerts().len(), 2);
        assert!(engine.poll_alerts().is_empty());
        assert_eq!(engine.stats().alerts_raised, 2);
    }

    #[test]
    fn test_backfill_alerts_can_be_disabled() {
        // ---
        let mut engine = SensorEngine::new(EngineOptions {
            alert_on_backfill: false,
            ..hot_only()
        });

        engine.ingest_raw_page(vec![raw("A", 1, 50.0)], now());
        assert_eq!(engine.pending_alerts(), 0);
        assert_eq!(engine.get_snapshot("A").map(|s| s.reading_count), Some(1));

        engine.ingest_raw(raw("A", 2, 50.0), now()).unwrap();
        assert_eq!(engine.pending_alerts(), 1);
    }

    #[test]
    fn test_alert_queue_limit_drops_oldest() {
        // ---
        let mut engine = SensorEngine::new(EngineOptions {
            alert_queue_limit: Some(2),
            ..hot_only()
        });

        for ts in 1..=3 {
            engine.ingest_raw(raw("A", ts, 35.0), now()).unwrap();
        }

        let alerts = engine.poll_alerts();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].reading_timestamp, 2);
        assert_eq!(engine.stats().alerts_dropped, 1);
    }

    #[test]
    fn test_configure_changes_retention_and_thresholds() {
        // ---
        let mut engine = SensorEngine::new(EngineOptions {
            thresholds: Thresholds::none(),
            ..EngineOptions::default()
        });
        for ts in 1..=4 {
            engine.ingest_raw(raw("A", ts, 35.0), now()).unwrap();
        }
        assert_eq!(engine.pending_alerts(), 0);

        engine.configure(EngineOptions {
            retention_limit: Retention::Limit(2),
            ..hot_only()
        });

        let series: Vec<i64> = engine
            .get_series(Some("A"), None)
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(series, vec![3, 4]);
        assert_eq!(engine.stored_len(), 2);
        // Aggregates cover every accepted reading, not just retained ones
        assert_eq!(engine.get_snapshot("A").map(|s| s.reading_count), Some(4));

        engine.ingest_raw(raw("A", 5, 35.0), now()).unwrap();
        assert_eq!(engine.pending_alerts(), 1);
    }

    #[test]
    fn test_raising_retention_does_not_recount_evicted_readings() {
        // ---
        let mut engine = SensorEngine::new(EngineOptions {
            retention_limit: Retention::Limit(2),
            ..hot_only()
        });
        for ts in 1..=3 {
            engine.ingest_raw(raw("A", ts, 35.0), now()).unwrap();
        }
        assert_eq!(engine.poll_alerts().len(), 3);

        engine.configure(EngineOptions {
            retention_limit: Retention::Unbounded,
            ..hot_only()
        });
        let outcome = engine.ingest_raw(raw("A", 1, 35.0), now()).unwrap();

        assert_eq!(outcome, IngestOutcome::Expired);
        assert_eq!(engine.get_snapshot("A").map(|s| s.reading_count), Some(3));
        assert_eq!(engine.pending_alerts(), 0);
        assert_eq!(engine.stats().expired, 1);
    }

    #[test]
    fn test_adjacent_large_timestamps_are_distinct_readings() {
        // ---
        let mut engine = SensorEngine::new(hot_only());
        let base: i64 = 1 << 53;
        engine.ingest_raw(raw("A", base, 20.0), now()).unwrap();
        let second = engine.ingest_raw(raw("A", base + 1, 20.0), now()).unwrap();

        assert!(second.is_inserted());
        let series: Vec<i64> = engine
            .get_series(Some("A"), None)
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(series, vec![base, base + 1]);
    }

    #[test]
    fn test_find_series_window_and_limit() {
        // ---
        let mut engine = SensorEngine::default();
        engine.ingest_raw(raw("A", 1, 20.0), now() - Duration::days(10)).unwrap();
        engine.ingest_raw(raw("A", 2, 20.0), now() - Duration::days(3)).unwrap();
        engine.ingest_raw(raw("A", 3, 20.0), now() - Duration::hours(2)).unwrap();
        engine.ingest_raw(raw("B", 4, 20.0), now() - Duration::hours(1)).unwrap();

        let week = SeriesQuery {
            device_id: Some("A".to_string()),
            window: RecentWindow::Week,
            ..SeriesQuery::default()
        };
        let ts: Vec<i64> = engine.find_series(&week, now()).iter().map(|r| r.timestamp).collect();
        assert_eq!(ts, vec![2, 3]);

        let tail = SeriesQuery {
            limit: Some(2),
            ..SeriesQuery::default()
        };
        let ts: Vec<i64> = engine.find_series(&tail, now()).iter().map(|r| r.timestamp).collect();
        assert_eq!(ts, vec![3, 4]);

        let day = SeriesQuery {
            window: RecentWindow::Day,
            ..SeriesQuery::default()
        };
        assert_eq!(engine.find_series(&day, now()).len(), 2);
    }

    #[test]
    fn test_device_registry_grows() {
        // ---
        let mut engine = SensorEngine::default();
        engine.ingest_raw(raw("B", 1, 20.0), now()).unwrap();
        engine.ingest_raw(json!({"timestamp": 2}), now()).unwrap();
        engine.ingest_raw(raw("A", 3, 20.0), now()).unwrap();

        let devices: Vec<String> = engine.get_devices().into_iter().collect();
        assert_eq!(devices, vec!["A", "B", "unknown"]);
    }
}
