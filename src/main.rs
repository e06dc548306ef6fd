//! Application entry point for the `sensorflow-live` service.
//!
//! This binary orchestrates the full startup sequence for the live sensor
//! dashboard backend, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Building the sensor engine and registering the alert log observer
//! - Starting the stream coordinator (historical backfill, then live pushes)
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests until Ctrl-C
//!
//! # Environment Variables
//! - `SENSOR_API_URL` (**required**) – historical page endpoint
//! - `SENSORFLOW_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `API_TOKEN_PARAM` (optional) – continuation token query parameter (default: `cursor`)
//! - `SENSORFLOW_SPAN_EVENTS` (optional) – span event mode for tracing
//! - see [`sensorflow_live::config`] for the remaining options
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP) by
//! delegating configuration parsing to `config`, transport to `transport`,
//! and route registration to `routes`.
use std::{env, time::Duration};

use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use sensorflow_live::config;
use sensorflow_live::routes::{self, AppState};
use sensorflow_live::transport::{HttpPageSource, PushSource};
use sensorflow_live::{CoordinatorState, EventSource, PageSource, SensorEngine, StreamCoordinator};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let engine = SensorEngine::new(cfg.engine_options()).shared();
    engine.write().on_alert(|alert| {
        warn!(
            device_id = %alert.device_id,
            rule = ?alert.rule,
            severity = ?alert.severity,
            "{}",
            alert.message
        );
    });

    let pages =
        HttpPageSource::new(cfg.api_url.clone()).with_token_param(cfg.api_token_param.clone());
    let push = PushSource::default();
    let coordinator = StreamCoordinator::new(engine.clone(), pages, push.clone())
        .with_max_pages(cfg.api_max_pages);
    let handle = coordinator.handle();

    // Build app from routes gateway (EMBP)
    let app = routes::router(AppState {
        engine,
        push,
        coordinator: handle.clone(),
    });

    let listener = TcpListener::bind(cfg.listen_addr)
        .await
        .map_err(|e| anyhow!("Failed to bind {}: {}", cfg.listen_addr, e))?;
    info!("Listening on {}", cfg.listen_addr);

    let stream = tokio::spawn(supervise(coordinator, cfg.restart_delay));

    let signal_handle = handle.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
            signal_handle.shutdown();
        })
        .await?;

    handle.shutdown();
    stream
        .await
        .map_err(|e| anyhow!("Stream coordinator task failed: {}", e))?;

    Ok(())
}

// ---

/// Run the coordinator, restarting it after transport failures until shutdown.
async fn supervise<P, E>(mut coordinator: StreamCoordinator<P, E>, restart_delay: Duration)
where
    P: PageSource,
    E: EventSource,
{
    // ---
    let handle = coordinator.handle();
    let mut result = coordinator.run().await;

    loop {
        match result {
            Ok(CoordinatorState::Error) => {
                let status = handle.status();
                warn!(
                    "Stream failed ({}), restarting in {:?}",
                    status.last_error.as_deref().unwrap_or("unknown error"),
                    restart_delay
                );
                tokio::select! {
                    _ = handle.cancelled() => break,
                    _ = tokio::time::sleep(restart_delay) => {}
                }
                result = coordinator.restart().await;
            }
            Ok(state) => {
                info!("Stream coordinator finished in {:?}", state);
                break;
            }
            Err(e) => {
                error!("Stream coordinator stopped: {}", e);
                break;
            }
        }
    }
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `SENSORFLOW_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `SENSORFLOW_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked. It installs the subscriber globally
/// for the lifetime of the process.
fn init_tracing() {
    // ---
    let span_events = match env::var("SENSORFLOW_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to SENSORFLOW_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("SENSORFLOW_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},hyper=warn,reqwest=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
