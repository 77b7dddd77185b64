use std::{fs, path::Path};

use tracing_subscriber::{EnvFilter, fmt, prelude::*, util::TryInitError};

pub mod formatter;
pub mod writer;

pub use formatter::*;
pub use writer::*;

use crate::configs::LoggingConfig;

/// Builds the filter directive string: the base level followed by any
/// per-target overrides from the config.
fn filter_directives(config: Option<&LoggingConfig>) -> String {
    let level = config.and_then(|l| l.level.as_deref()).unwrap_or("info");
    let filters = config.and_then(|l| l.filters.as_deref()).unwrap_or("");

    if filters.is_empty() {
        level.to_string()
    } else {
        format!("{},{}", level, filters)
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level when it is set.
///
/// Host applications that already own a subscriber can skip this entirely;
/// the media path only emits `tracing` events.
pub fn init(config: Option<&LoggingConfig>) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let stdout_layer = fmt::layer()
        .event_format(CustomFormatter::new(true))
        .with_ansi(true);

    let file_layer = config.and_then(|l| l.file.as_ref()).map(|file_config| {
        if let Some(parent) = Path::new(&file_config.path).parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!("Failed to create log directory: {}", e);
            }
        }

        fmt::layer()
            .with_writer(CircularFileWriter::new(
                file_config.path.clone(),
                file_config.max_lines,
            ))
            .event_format(CustomFormatter::new(false))
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_default_to_info() {
        assert_eq!(filter_directives(None), "info");
    }

    #[test]
    fn directives_append_filters() {
        let config = LoggingConfig {
            level: Some("debug".into()),
            filters: Some("btmedia::media::sink=trace".into()),
            file: None,
        };
        assert_eq!(
            filter_directives(Some(&config)),
            "debug,btmedia::media::sink=trace"
        );
    }
}
