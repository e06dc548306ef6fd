//! Rolling per-device statistics.
//!
//! Each accepted reading is folded into its device's [`AggregateSnapshot`] in
//! O(1); history is never rescanned. The caller guarantees a reading is applied
//! at most once.

use std::collections::HashMap;

use crate::models::{AggregateSnapshot, Reading};

// ---

#[derive(Debug, Default)]
pub struct RollingAggregator {
    snapshots: HashMap<String, AggregateSnapshot>,
}

impl RollingAggregator {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one accepted reading to `device_id`'s snapshot.
    pub fn update(&mut self, device_id: &str, reading: &Reading) {
        // ---
        let snap = self.snapshots.entry(device_id.to_string()).or_default();

        snap.mean_temperature =
            incremental_mean(snap.mean_temperature, snap.reading_count, reading.temperature);
        snap.mean_humidity =
            incremental_mean(snap.mean_humidity, snap.reading_count, reading.humidity);
        snap.total_move_count = snap.total_move_count.saturating_add(reading.move_count);
        snap.reading_count += 1;
        snap.last_reading = Some(reading.clone());
    }

    /// Current snapshot for a device, or `None` if it has never been seen.
    pub fn snapshot(&self, device_id: &str) -> Option<AggregateSnapshot> {
        self.snapshots.get(device_id).cloned()
    }

    /// Overall statistics derived from the per-device snapshots.
    ///
    /// Means are weighted by each device's reading count, so they equal the mean
    /// over every accepted reading. `last_reading` is the most recently received
    /// reading across all devices.
    pub fn global_snapshot(&self) -> AggregateSnapshot {
        // ---
        let mut global = AggregateSnapshot::default();

        for snap in self.snapshots.values() {
            let total = global.reading_count + snap.reading_count;
            if total == 0 {
                continue;
            }
            let (w_old, w_new) = (global.reading_count as f64, snap.reading_count as f64);
            global.mean_temperature =
                (global.mean_temperature * w_old + snap.mean_temperature * w_new) / total as f64;
            global.mean_humidity =
                (global.mean_humidity * w_old + snap.mean_humidity * w_new) / total as f64;
            global.reading_count = total;
            global.total_move_count = global.total_move_count.saturating_add(snap.total_move_count);

            let newer = match (&global.last_reading, &snap.last_reading) {
                (None, Some(_)) => true,
                (Some(current), Some(candidate)) => {
                    (candidate.received_at, candidate.timestamp)
                        > (current.received_at, current.timestamp)
                }
                _ => false,
            };
            if newer {
                global.last_reading = snap.last_reading.clone();
            }
        }

        global
    }

    pub fn device_count(&self) -> usize {
        self.snapshots.len()
    }
}

fn incremental_mean(old_mean: f64, old_count: u64, value: f64) -> f64 {
    (old_mean * old_count as f64 + value) / (old_count + 1) as f64
}
