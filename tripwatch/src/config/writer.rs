//! INI serialization: `ConfigFile` → commented INI string.

use super::ConfigFile;

/// Convert a `ConfigFile` to the commented INI text written to `config.ini`.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let t = &config.tracking;
    let p = &config.provider;
    let pos = &config.position;
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();

    format!(
        r#"[tracking]
; Base delay between poll cycles in milliseconds (clamped to 1000-30000)
interval_ms = {interval_ms}
; Random delay added after each successful cycle, 0 disables
max_jitter_ms = {max_jitter_ms}
; Weight of the newest estimate when smoothing, in (0, 1]
smoothing_alpha = {alpha}
; Speed used to turn a bare route distance into a travel time
assumed_speed_kmph = {speed}
; What a cycle still running at stop does with its results:
;   finish  - write them
;   discard - drop them
stop_policy = {stop_policy}
; Search unknown response shapes recursively for travel times
deep_search = {deep_search}

[provider]
; Batched travel-time endpoint (POST)
matrix_url = {matrix_url}
; Single-route endpoint used for entities the batch missed (POST)
route_url = {route_url}
; Optional key appended as ?key=...
api_key = {api_key}
; Request timeout in seconds
timeout_secs = {timeout_secs}

[position]
; Minimum spacing between published positions in milliseconds
watch_interval_ms = {watch_interval_ms}
; Base URL positions are PUT to, empty disables publishing
publish_url = {publish_url}
; Name shown to other participants
participant_name = {participant_name}

[telemetry]
; Collector URL for poll telemetry, empty logs it instead
url = {telemetry_url}

[logging]
directory = {log_dir}
file = {log_file}
; trace, debug, info, warn or error (RUST_LOG overrides)
level = {level}
"#,
        interval_ms = t.interval_ms,
        max_jitter_ms = t.max_jitter_ms,
        alpha = t.smoothing_alpha,
        speed = t.assumed_speed_kmph,
        stop_policy = t.stop_policy,
        deep_search = t.deep_search,
        matrix_url = opt(&p.matrix_url),
        route_url = opt(&p.route_url),
        api_key = opt(&p.api_key),
        timeout_secs = p.timeout_secs,
        watch_interval_ms = pos.watch_interval_ms,
        publish_url = opt(&pos.publish_url),
        participant_name = opt(&pos.participant_name),
        telemetry_url = opt(&config.telemetry.url),
        log_dir = config.logging.directory.display(),
        log_file = config.logging.file,
        level = config.logging.level,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let text = to_config_string(&ConfigFile::default());
        for section in ["[tracking]", "[provider]", "[position]", "[telemetry]", "[logging]"] {
            assert!(text.contains(section), "missing {section}");
        }
        assert!(text.contains("interval_ms = 5000"));
        assert!(text.contains("stop_policy = finish"));
        assert!(text.contains("deep_search = true"));
        assert!(text.contains("api_key = \n"));
    }
}
