//! Share command - publish the local participant's position once.

use clap::Args;
use console::style;
use tracing::info;
use tripwatch::config::{ConfigFile, PositionSettings};
use tripwatch::coord::GeoPoint;
use tripwatch::logging::{init_logging, LoggingOptions};
use tripwatch::position::{
    HttpPositionPublisher, PositionPublisher, PositionRecord, PositionSample,
};
use tripwatch::provider::ReqwestClient;

use crate::error::CliError;

/// Arguments for `tripwatch share`.
#[derive(Debug, Args)]
pub struct ShareArgs {
    /// Participant id the position is stored under
    #[arg(long)]
    pub id: String,

    /// Current position as "lat,lng"
    #[arg(long, allow_hyphen_values = true)]
    pub at: GeoPoint,

    /// Horizontal accuracy in meters
    #[arg(long)]
    pub accuracy: Option<f64>,

    /// Session the position belongs to
    #[arg(long, default_value = "cli")]
    pub session: String,
}

/// Run the share command.
pub fn run(args: ShareArgs) -> Result<(), CliError> {
    let config = ConfigFile::load()?;
    let _logging = init_logging(&LoggingOptions::from_settings(&config.logging))?;

    let publish_url = config
        .position
        .publish_url
        .clone()
        .ok_or_else(|| CliError::Config("publish_url must be set in [position]".to_string()))?;
    let record = build_record(&config.position, &args);

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::Runtime(format!("Failed to start async runtime: {}", e)))?;
    runtime.block_on(async {
        let client = ReqwestClient::with_timeout(config.provider.timeout_secs)?;
        let publisher = HttpPositionPublisher::new(client, publish_url, args.session.as_str());
        publisher.publish(&record).await.map_err(CliError::Position)
    })?;

    info!(id = %record.id, session = %args.session, "Position shared");
    println!(
        "{} {} at {}",
        style("Shared").green().bold(),
        style(&record.id).bold(),
        args.at
    );
    Ok(())
}

/// Record for `args`, named from the `[position]` settings.
fn build_record(settings: &PositionSettings, args: &ShareArgs) -> PositionRecord {
    let participant = settings.to_position_config(args.id.as_str());
    let mut sample = PositionSample::at(args.at);
    sample.accuracy_m = args.accuracy;
    PositionRecord::from_sample(
        &participant.participant_id,
        participant.participant_name.as_deref(),
        &sample,
    )
}
