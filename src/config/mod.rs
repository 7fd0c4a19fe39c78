mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<PlayerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: PlayerConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<PlayerConfig> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./player.toml",
        "~/.config/sceneforged/player.toml",
        "/etc/sceneforged/player.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(PlayerConfig::default())
}

/// Validate configuration
pub fn validate_config(config: &PlayerConfig) -> Result<()> {
    if config.gateway.base_url.is_empty() {
        anyhow::bail!("gateway.base_url cannot be empty");
    }
    if config.gateway.request_timeout_secs == 0 {
        anyhow::bail!("gateway.request_timeout_secs cannot be 0");
    }

    let buffer = &config.buffer;
    if buffer.poll_interval_ms == 0 {
        anyhow::bail!("buffer.poll_interval_ms cannot be 0");
    }
    if buffer.transcode_watch_secs == 0 {
        anyhow::bail!("buffer.transcode_watch_secs cannot be 0");
    }
    for (name, value) in [
        ("unrestricted_min_ahead_secs", buffer.unrestricted_min_ahead_secs),
        ("complete_min_ahead_secs", buffer.complete_min_ahead_secs),
        ("in_progress_min_ahead_secs", buffer.in_progress_min_ahead_secs),
    ] {
        if !value.is_finite() || value < 0.0 {
            anyhow::bail!("buffer.{} must be a non-negative number", name);
        }
    }

    let seek = &config.seek;
    for (name, value) in [
        ("lookahead_secs", seek.lookahead_secs),
        ("clamp_margin_secs", seek.clamp_margin_secs),
        ("hysteresis_secs", seek.hysteresis_secs),
    ] {
        if !value.is_finite() || value < 0.0 {
            anyhow::bail!("seek.{} must be a non-negative number", name);
        }
    }

    let recovery = &config.recovery;
    if recovery.network_backoff_secs.is_empty() {
        anyhow::bail!("recovery.network_backoff_secs must list at least one delay");
    }
    if recovery.counter_window_secs == 0 {
        anyhow::bail!("recovery.counter_window_secs cannot be 0");
    }
    if recovery.stall_nudge_threshold >= recovery.stall_recover_threshold {
        tracing::warn!(
            "recovery.stall_nudge_threshold ({}) >= stall_recover_threshold ({}); stalls will never nudge",
            recovery.stall_nudge_threshold,
            recovery.stall_recover_threshold
        );
    }

    if config.completion.threshold_secs <= 0.0 {
        anyhow::bail!("completion.threshold_secs must be positive");
    }

    if config.session.liveness_interval_ms == 0 {
        anyhow::bail!("session.liveness_interval_ms cannot be 0");
    }
    if config.session.position_save_secs == 0 {
        anyhow::bail!("session.position_save_secs cannot be 0");
    }

    if sceneforged_common::lang::family(&config.tracks.default_language).is_none() {
        tracing::warn!(
            "tracks.default_language '{}' is not a language code; language-aware defaults are disabled",
            config.tracks.default_language
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlayerConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.buffer.poll_interval_ms, 250);
        assert_eq!(config.recovery.network_backoff_secs, vec![1, 3, 5, 10]);
        assert_eq!(config.completion.countdown_start, 30);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[gateway]
base_url = "http://media.local:9000"

[tracks]
default_language = "fr"
subtitle_heuristic = "off"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.gateway.base_url, "http://media.local:9000");
        assert_eq!(config.gateway.request_timeout_secs, 30);
        assert_eq!(config.tracks.default_language, "fr");
        assert_eq!(config.tracks.subtitle_heuristic, SubtitleHeuristic::Off);
        assert_eq!(config.buffer.in_progress_min_segments, 15);
    }

    #[test]
    fn test_empty_backoff_rejected() {
        let mut config = PlayerConfig::default();
        config.recovery.network_backoff_secs.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = PlayerConfig::default();
        config.buffer.poll_interval_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = PlayerConfig::default();
        config.buffer.transcode_watch_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = load_config_or_default(Some(Path::new("/nonexistent/player.toml")));
        assert!(result.is_err());
    }
}
