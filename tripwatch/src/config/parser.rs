//! INI parsing: `Ini` → `ConfigFile`.
//!
//! The single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::{ConfigError, ConfigFile};
use crate::scheduler::StopPolicy;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Parse an `Ini` into a `ConfigFile`, overlaying found keys on defaults.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigError> {
    let mut config = ConfigFile::default();

    // [tracking]
    if let Some(section) = ini.section(Some("tracking")) {
        let s = "tracking";
        if let Some(v) = section.get("interval_ms") {
            config.tracking.interval_ms = parse_number(s, "interval_ms", v)?;
        }
        if let Some(v) = section.get("max_jitter_ms") {
            config.tracking.max_jitter_ms = parse_number(s, "max_jitter_ms", v)?;
        }
        if let Some(v) = section.get("smoothing_alpha") {
            let alpha: f64 = parse_number(s, "smoothing_alpha", v)?;
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(invalid(s, "smoothing_alpha", v, "must be in (0, 1]"));
            }
            config.tracking.smoothing_alpha = alpha;
        }
        if let Some(v) = section.get("assumed_speed_kmph") {
            let speed: f64 = parse_number(s, "assumed_speed_kmph", v)?;
            if !(speed.is_finite() && speed > 0.0) {
                return Err(invalid(s, "assumed_speed_kmph", v, "must be a positive number"));
            }
            config.tracking.assumed_speed_kmph = speed;
        }
        if let Some(v) = section.get("stop_policy") {
            config.tracking.stop_policy = StopPolicy::from_str(v)
                .map_err(|e| invalid(s, "stop_policy", v, &e.to_string()))?;
        }
        if let Some(v) = section.get("deep_search") {
            config.tracking.deep_search = parse_bool(s, "deep_search", v)?;
        }
    }

    // [provider]
    if let Some(section) = ini.section(Some("provider")) {
        config.provider.matrix_url = optional(section, "matrix_url");
        config.provider.route_url = optional(section, "route_url");
        config.provider.api_key = optional(section, "api_key");
        if let Some(v) = section.get("timeout_secs") {
            let secs: u64 = parse_number("provider", "timeout_secs", v)?;
            if secs == 0 {
                return Err(invalid("provider", "timeout_secs", v, "must be at least 1"));
            }
            config.provider.timeout_secs = secs;
        }
    }

    // [position]
    if let Some(section) = ini.section(Some("position")) {
        if let Some(v) = section.get("watch_interval_ms") {
            config.position.watch_interval_ms = parse_number("position", "watch_interval_ms", v)?;
        }
        config.position.publish_url = optional(section, "publish_url");
        config.position.participant_name = optional(section, "participant_name");
    }

    // [telemetry]
    if let Some(section) = ini.section(Some("telemetry")) {
        config.telemetry.url = optional(section, "url");
    }

    // [logging]
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = optional(section, "directory") {
            config.logging.directory = expand_tilde(&v);
        }
        if let Some(v) = optional(section, "file") {
            config.logging.file = v;
        }
        if let Some(v) = section.get("level") {
            let level = v.trim().to_lowercase();
            if !LOG_LEVELS.contains(&level.as_str()) {
                return Err(invalid(
                    "logging",
                    "level",
                    v,
                    "must be one of: trace, debug, info, warn, error",
                ));
            }
            config.logging.level = level;
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Non-empty trimmed value, if present.
fn optional(section: &Properties, key: &str) -> Option<String> {
    section
        .get(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "expected a number"))
}

pub(super) fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(section, key, value, "expected true or false")),
    }
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<ConfigFile, ConfigError> {
        let ini = Ini::load_from_str(content).unwrap();
        parse_ini(&ini)
    }

    #[test]
    fn test_parse_bool() {
        for v in ["true", "TRUE", "yes", "1", "on"] {
            assert!(parse_bool("s", "k", v).unwrap());
        }
        for v in ["false", "No", "0", "off"] {
            assert!(!parse_bool("s", "k", v).unwrap());
        }
        assert!(parse_bool("s", "k", "maybe").is_err());
    }

    #[test]
    fn test_invalid_number_reports_key() {
        let err = parse("[tracking]\ninterval_ms = soon\n").unwrap_err();
        match err {
            ConfigError::InvalidValue { section, key, value, .. } => {
                assert_eq!(section, "tracking");
                assert_eq!(key, "interval_ms");
                assert_eq!(value, "soon");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_alpha_out_of_range() {
        assert!(parse("[tracking]\nsmoothing_alpha = 0\n").is_err());
        assert!(parse("[tracking]\nsmoothing_alpha = 1.5\n").is_err());
        assert_eq!(
            parse("[tracking]\nsmoothing_alpha = 1\n")
                .unwrap()
                .tracking
                .smoothing_alpha,
            1.0
        );
    }

    #[test]
    fn test_stop_policy() {
        let config = parse("[tracking]\nstop_policy = discard\n").unwrap();
        assert_eq!(config.tracking.stop_policy, StopPolicy::DiscardInFlight);
        assert!(parse("[tracking]\nstop_policy = never\n").is_err());
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = parse("[provider]\nmatrix_url =\napi_key =   \n").unwrap();
        assert!(config.provider.matrix_url.is_none());
        assert!(config.provider.api_key.is_none());
    }

    #[test]
    fn test_log_level_validated() {
        assert_eq!(parse("[logging]\nlevel = DEBUG\n").unwrap().logging.level, "debug");
        assert!(parse("[logging]\nlevel = loud\n").is_err());
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/var/log"), PathBuf::from("/var/log"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/logs"), home.join("logs"));
        }
    }
}
