//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::path::PathBuf;
use std::process;

use tripwatch::config::ConfigError;
use tripwatch::logging::LoggingError;
use tripwatch::pipeline::PipelineError;
use tripwatch::position::PositionError;
use tripwatch::provider::ProviderError;
use tripwatch::session::SessionError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(LoggingError),
    /// Configuration is incomplete or inconsistent
    Config(String),
    /// Configuration file could not be read or written
    ConfigFile(ConfigError),
    /// Entities file could not be used
    Entities { path: PathBuf, reason: String },
    /// HTTP client could not be created
    Provider(ProviderError),
    /// Session could not be set up
    Session(SessionError),
    /// A single `--once` cycle failed
    Cycle(PipelineError),
    /// Position could not be published
    Position(PositionError),
    /// Async runtime or signal handler could not be set up
    Runtime(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("{} {}", console::style("Error:").red().bold(), self);

        match self {
            CliError::Config(_) => {
                eprintln!();
                eprintln!("Run 'tripwatch init' to create a config file, then fill in");
                eprintln!("the setting named above. 'tripwatch config' shows what is in effect.");
            }
            CliError::Entities { .. } => {
                eprintln!();
                eprintln!("The entities file must be a JSON array like:");
                eprintln!(r#"  [{{"id": "ana", "lat": 52.52, "lng": 13.40, "name": "Ana"}}]"#);
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Entities { path, reason } => {
                write!(f, "Cannot use entities file '{}': {}", path.display(), reason)
            }
            CliError::Provider(e) => write!(f, "Failed to create HTTP client: {}", e),
            CliError::Session(e) => write!(f, "Failed to set up tracking session: {}", e),
            CliError::Cycle(e) => write!(f, "Poll cycle failed: {}", e),
            CliError::Position(e) => write!(f, "Failed to share position: {}", e),
            CliError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) => Some(e),
            CliError::ConfigFile(e) => Some(e),
            CliError::Provider(e) => Some(e),
            CliError::Session(e) => Some(e),
            CliError::Cycle(e) => Some(e),
            CliError::Position(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::LoggingInit(e)
    }
}

impl From<ProviderError> for CliError {
    fn from(e: ProviderError) -> Self {
        CliError::Provider(e)
    }
}

impl From<SessionError> for CliError {
    fn from(e: SessionError) -> Self {
        CliError::Session(e)
    }
}
