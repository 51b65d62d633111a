//! Track command - run a live tracking session from the terminal.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use console::style;
use tokio::sync::Notify;
use tracing::info;
use tripwatch::config::ConfigFile;
use tripwatch::coord::{GeoPoint, TrackedEntity};
use tripwatch::logging::{init_logging, LoggingOptions};
use tripwatch::pipeline::ApplyGuard;
use tripwatch::provider::{HttpTravelTimeProvider, ProviderEndpoints, ReqwestClient};
use tripwatch::session::{TrackingConfig, TrackingSession};
use tripwatch::store::StoreUpdate;
use tripwatch::telemetry::{HttpTelemetrySink, TelemetrySink, TracingTelemetrySink};

use crate::error::CliError;

/// Arguments for `tripwatch track`.
#[derive(Debug, Args)]
pub struct TrackArgs {
    /// JSON array of entities: [{"id", "lat", "lng", "name"?}]
    #[arg(long)]
    pub entities: PathBuf,

    /// Shared destination as "lat,lng"
    #[arg(long, allow_hyphen_values = true)]
    pub dest: GeoPoint,

    /// Poll interval in milliseconds (overrides config, clamped to 1000-30000)
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Session identifier used in logs
    #[arg(long, default_value = "cli")]
    pub session: String,

    /// Also print log output to stderr
    #[arg(long, short)]
    pub verbose: bool,
}

/// Run the track command.
pub fn run(args: TrackArgs) -> Result<(), CliError> {
    let config = ConfigFile::load()?;
    let _logging = init_logging(
        &LoggingOptions::from_settings(&config.logging).with_stderr(args.verbose),
    )?;

    let entities = load_entities(&args.entities)?;
    let endpoints = config.provider.endpoints().ok_or_else(|| {
        CliError::Config("matrix_url and route_url must be set in [provider]".to_string())
    })?;

    let mut tracking = config.tracking.to_tracking_config();
    if let Some(ms) = args.interval_ms {
        tracking.scheduler = tracking.scheduler.with_interval(Duration::from_millis(ms));
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::Runtime(format!("Failed to start async runtime: {}", e)))?;
    runtime.block_on(track(&args, &config, endpoints, tracking, entities))
}

async fn track(
    args: &TrackArgs,
    config: &ConfigFile,
    endpoints: ProviderEndpoints,
    tracking: TrackingConfig,
    entities: Vec<TrackedEntity>,
) -> Result<(), CliError> {
    let client = ReqwestClient::with_timeout(config.provider.timeout_secs)?;
    let telemetry: Arc<dyn TelemetrySink> = match &config.telemetry.url {
        Some(url) => Arc::new(HttpTelemetrySink::new(Arc::new(client.clone()), url.clone())),
        None => Arc::new(TracingTelemetrySink),
    };
    let provider = Arc::new(HttpTravelTimeProvider::new(client, endpoints));

    let session = TrackingSession::new(args.session.clone(), provider, telemetry, tracking)?;
    session.set_destination(Some(args.dest));
    session.set_entities(entities)?;

    let rows = entity_rows(&session.roster().entities(), args.dest);
    session
        .store()
        .subscribe(move |update| print_update(&rows, update));

    if args.once {
        return run_once(&session, args.dest).await;
    }

    let stop = Arc::new(Notify::new());
    let stop_signal = Arc::clone(&stop);
    ctrlc::set_handler(move || stop_signal.notify_one())
        .map_err(|e| CliError::Runtime(format!("Failed to set signal handler: {}", e)))?;

    if !session.start() {
        return Err(CliError::Runtime("Tracking session did not start".to_string()));
    }
    println!(
        "Tracking {} to {}. Press Ctrl+C to stop.",
        style(format!("{} entities", session.roster().len())).bold(),
        style(args.dest).bold()
    );
    println!();

    stop.notified().await;
    println!();
    println!("Stopping...");
    session.shutdown().await;

    print_summary(&session);
    info!(session = %session.id(), "Track command finished");
    Ok(())
}

async fn run_once(session: &TrackingSession, dest: GeoPoint) -> Result<(), CliError> {
    let entities = session.roster().entities();
    let outcome = session
        .pipeline()
        .poll(dest, &entities, &ApplyGuard::always())
        .await;
    let report = outcome.result.map_err(CliError::Cycle)?;

    println!();
    println!(
        "{} in {} ms: {} from batch, {} from fallback, {} without estimate",
        style("Cycle complete").green().bold(),
        outcome.duration.as_millis(),
        report.batch_resolved,
        report.fallback.resolved,
        report.skipped
    );
    Ok(())
}

/// Reads and validates the entities file.
pub fn load_entities(path: &Path) -> Result<Vec<TrackedEntity>, CliError> {
    let to_error = |reason: String| CliError::Entities {
        path: path.to_path_buf(),
        reason,
    };
    let content = fs::read_to_string(path).map_err(|e| to_error(e.to_string()))?;
    let entities: Vec<TrackedEntity> =
        serde_json::from_str(&content).map_err(|e| to_error(e.to_string()))?;

    if entities.is_empty() {
        return Err(to_error("no entities listed".to_string()));
    }
    for entity in &entities {
        entity
            .validate()
            .map_err(|e| to_error(format!("entity '{}': {}", entity.id, e)))?;
    }
    Ok(entities)
}

/// Display label and straight-line distance to the destination.
#[derive(Debug)]
struct EntityRow {
    name: String,
    straight_line_m: f64,
}

fn entity_rows(entities: &[TrackedEntity], dest: GeoPoint) -> HashMap<String, EntityRow> {
    entities
        .iter()
        .map(|e| {
            let row = EntityRow {
                name: e.name.clone().unwrap_or_else(|| e.id.clone()),
                straight_line_m: e.position().distance_to(dest),
            };
            (e.id.clone(), row)
        })
        .collect()
}

/// Route distance when the provider gave one, else "~" and the straight line.
fn distance_label(row: Option<&EntityRow>, route_m: Option<f64>) -> String {
    match (route_m, row) {
        (Some(m), _) => format_distance(m),
        (None, Some(row)) => format!("~{}", format_distance(row.straight_line_m)),
        (None, None) => "-".to_string(),
    }
}

fn print_update(rows: &HashMap<String, EntityRow>, update: &StoreUpdate) {
    let row = rows.get(&update.id);
    let name = row.map_or(update.id.as_str(), |r| r.name.as_str());
    println!(
        "{:>16}  {:>9}  {:>9}",
        style(name).bold(),
        style(format_eta(update.estimate.eta_seconds)).cyan(),
        distance_label(row, update.estimate.distance_meters)
    );
}

fn print_summary(session: &TrackingSession) {
    let status = session.scheduler().status();
    println!(
        "{} cycles, {} estimates",
        status.cycles,
        session.store().len()
    );
    for (id, estimate) in session.store().snapshot() {
        println!(
            "  {:<16} {:>9}  (updated {}s ago)",
            id,
            format_eta(estimate.eta_seconds),
            estimate.age().as_secs()
        );
    }
}

/// "45s", "12m 05s" or "1h 05m".
pub fn format_eta(seconds: u64) -> String {
    match seconds {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m {:02}s", s / 60, s % 60),
        s => format!("{}h {:02}m", s / 3600, (s % 3600) / 60),
    }
}

/// "850 m" or "12.3 km".
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{:.0} m", meters)
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}
