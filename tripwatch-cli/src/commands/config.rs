//! Config command - show the effective configuration.

use console::style;
use tripwatch::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Print the config file path, or the effective configuration.
pub fn run(path_only: bool) -> Result<(), CliError> {
    let path = config_file_path();
    if path_only {
        println!("{}", path.display());
        return Ok(());
    }

    let config = ConfigFile::load_from(&path)?;
    let source = if path.exists() {
        path.display().to_string()
    } else {
        "built-in defaults (no config file)".to_string()
    };
    println!("{} {}", style("; Source:").dim(), style(source).dim());
    print!("{}", config.to_config_string());
    Ok(())
}
