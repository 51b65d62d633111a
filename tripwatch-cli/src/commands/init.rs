//! Init command - write the default configuration file.

use std::path::Path;

use console::style;
use tripwatch::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Run the init command against the default config path.
pub fn run(force: bool) -> Result<(), CliError> {
    let path = config_file_path();
    if write_default(&path, force)? {
        println!("{} {}", style("Created").green().bold(), path.display());
        println!();
        println!("Set matrix_url and route_url in the [provider] section, then run:");
        println!("  tripwatch track --entities people.json --dest 52.51,13.38");
    } else {
        println!(
            "Configuration already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    Ok(())
}

/// Writes defaults to `path`. Returns `false` if it exists and `force` is off.
fn write_default(path: &Path, force: bool) -> Result<bool, CliError> {
    if path.exists() && !force {
        return Ok(false);
    }
    ConfigFile::default().save_to(path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_writes_when_missing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");

        assert!(write_default(&path, false).unwrap());
        assert_eq!(
            ConfigFile::load_from(&path).unwrap(),
            ConfigFile::default()
        );
    }

    #[test]
    fn test_keeps_existing_without_force() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");
        fs::write(&path, "[tracking]\ninterval_ms = 9000\n").unwrap();

        assert!(!write_default(&path, false).unwrap());
        assert_eq!(ConfigFile::load_from(&path).unwrap().tracking.interval_ms, 9000);

        assert!(write_default(&path, true).unwrap());
        assert_eq!(ConfigFile::load_from(&path).unwrap().tracking.interval_ms, 5000);
    }
}
