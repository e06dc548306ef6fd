//! Live sensor-stream aggregation and alerting core.
//!
//! Merges a paginated historical snapshot with an unbounded live stream into
//! one ordered, deduplicated series per device, keeps incrementally updated
//! statistics per device, and evaluates threshold alerts for every accepted
//! reading. The pieces, leaf first:
//!
//! - [`normalize`]: raw record → canonical [`Reading`]
//! - [`store`]: per-device ordered series with retention
//! - [`aggregator`]: O(1) rolling statistics
//! - [`alerts`]: stateless threshold evaluation
//! - [`engine`]: the facade readers and the coordinator share
//! - [`coordinator`]: backfill-then-live state machine over the collaborator traits
//!
//! [`transport`], [`routes`] and [`config`] wire the core into the HTTP service
//! built by `main.rs`.

pub mod aggregator;
pub mod alerts;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod models;
pub mod normalize;
pub mod routes;
pub mod store;
pub mod transport;

pub use config::Config;
pub use coordinator::{
    CoordinatorHandle, CoordinatorState, CoordinatorStatus, EventSource, LiveEvent, Page,
    PageSource, StreamCoordinator, Subscription,
};
pub use engine::{EngineOptions, SensorEngine, SeriesQuery, SharedEngine};
pub use error::{CoreError, TransportError};
pub use models::{AggregateSnapshot, Alert, AlertRule, IngestStats, RawReading, Reading, Severity};
pub use store::{IngestOutcome, RecentWindow, Retention, TimeRange};
