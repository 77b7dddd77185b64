use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::common::{MediaError, MediaResult};
use crate::configs::*;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub media: MediaConfig,
    pub logging: Option<LoggingConfig>,
}

impl std::str::FromStr for Config {
    type Err = MediaError;

    fn from_str(s: &str) -> MediaResult<Self> {
        let config: Config = toml::from_str(s)?;
        config.media.validate().map_err(MediaError::InvalidConfig)?;
        Ok(config)
    }
}

impl Config {
    /// Loads `config.toml`, falling back to `config.default.toml`, and to
    /// built-in defaults when neither file exists.
    pub fn load() -> MediaResult<Self> {
        let config_path = if Path::new("config.toml").exists() {
            "config.toml"
        } else if Path::new("config.default.toml").exists() {
            "config.default.toml"
        } else {
            info!("No config file found, using defaults");
            return Ok(Self::default());
        };

        Self::load_from(config_path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let config_str = std::fs::read_to_string(path)?;
        if config_str.trim().is_empty() {
            return Err(MediaError::invalid_config(format!(
                "{} is empty",
                path.display()
            )));
        }

        config_str.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::OverflowPolicy;
    use crate::media::FeedingMode;

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config.media.tick_ms, 20);
        assert_eq!(config.media.sink.queue_capacity, 18);
        assert_eq!(config.media.sink.voice_queue_capacity, 5);
        assert_eq!(config.media.sink.delayed_start_frames, 5);
        assert_eq!(config.media.sink.overflow, OverflowPolicy::EvictOldest);
        assert_eq!(config.media.source.max_frames_per_tick, 14);
        assert_eq!(config.media.source.default_bitrate, 328);
        assert_eq!(config.media.source.feeding_mode, FeedingMode::Synchronous);
        assert!(config.logging.is_none());
    }

    #[test]
    fn partial_sections_override_fields() {
        let config: Config = r#"
            [media]
            tick_ms = 30

            [media.sink]
            overflow = "drop-incoming"
            voice_queue_capacity = 8

            [media.source]
            feeding_mode = "asynchronous"

            [logging]
            level = "debug"
        "#
        .parse()
        .unwrap();

        assert_eq!(config.media.tick_ms, 30);
        assert_eq!(config.media.sink.overflow, OverflowPolicy::DropIncoming);
        assert_eq!(config.media.sink.voice_queue_capacity, 8);
        assert_eq!(config.media.sink.queue_capacity, 18);
        assert_eq!(config.media.source.feeding_mode, FeedingMode::Asynchronous);
        assert_eq!(
            config.logging.as_ref().and_then(|l| l.level.as_deref()),
            Some("debug")
        );
    }

    #[test]
    fn zero_tick_is_rejected() {
        let err = "[media]\ntick_ms = 0".parse::<Config>().unwrap_err();
        assert!(matches!(err, MediaError::InvalidConfig(_)));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = "[media\ntick_ms = 1".parse::<Config>().unwrap_err();
        assert!(matches!(err, MediaError::Config(_)));
    }
}
