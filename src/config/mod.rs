//! Configuration Module
//!
//! Instrument address, storage locations and recording parameters loaded
//! from TOML.
//!
//! ## Loading Order
//!
//! 1. `FBG_CONFIG` environment variable (path to TOML file)
//! 2. `fbg_config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded [`AppConfig`] is passed down explicitly; nothing reads it from
//! a global.

mod app_config;
pub mod defaults;

pub use app_config::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SetupOption;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.instrument.host, "10.0.0.55");
        assert_eq!(config.instrument.command_port, 51971);
        assert_eq!(config.instrument.streaming_port, 51972);
        assert_eq!(config.instrument.divider_options, vec![1, 10, 100]);
        assert_eq!(config.recording.setup, SetupOption::BasementAndFrame);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [instrument]
            host = "192.168.1.20"

            [recording]
            flush_interval_secs = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.instrument.host, "192.168.1.20");
        assert_eq!(config.instrument.command_port, 51971);
        assert_eq!(
            config.recording.writer_settings().flush_interval,
            Duration::from_millis(500)
        );
        assert_eq!(config.storage.database_path(), std::path::Path::new("./data/fbg.db"));
    }

    #[test]
    fn validation_collects_every_problem() {
        let mut config = AppConfig::default();
        config.instrument.command_port = 0;
        config.instrument.divider_options.clear();
        config.recording.flush_interval_secs = f64::NAN;

        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 3, "{errors:?}");
                assert!(errors.iter().any(|e| e.contains("command_port")));
                assert!(errors.iter().any(|e| e.contains("divider_options")));
                assert!(errors.iter().any(|e| e.contains("flush_interval_secs")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn load_from_file_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[instrument]\nstreaming_port = 51971").unwrap();

        let err = AppConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn load_from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[recording]\nsetup = \"Attic\"").unwrap();

        let err = AppConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn toml_output_loads_back() {
        let mut config = AppConfig::default();
        config.recording.setup = SetupOption::StrongFloor;
        config.recording.duration_secs = Some(60);

        let text = config.to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
