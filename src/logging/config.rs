//! Logging configuration
//!
//! Per-component log levels, output destinations and file naming.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Enable console output
    pub console_output: bool,

    /// Directory for JSON log files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// File name prefix for the daily rolling log
    pub file_prefix: String,

    /// Include file location in logs
    pub include_file_location: bool,

    /// Level for transforms, assignment and refinement
    pub algorithm_level: String,

    /// Level for the aligner and coefficient cache
    pub pipeline_level: String,

    /// Level for branch-and-bound progress
    pub search_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            file_prefix: "overlap.log".to_string(),
            include_file_location: false,
            algorithm_level: "info".to_string(),
            pipeline_level: "info".to_string(),
            search_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Verbose logging with a local file sink
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            algorithm_level: "trace".to_string(),
            pipeline_level: "debug".to_string(),
            search_level: "debug".to_string(),
            ..Self::default()
        }
    }

    /// Warnings only, file output, no console
    pub fn production() -> Self {
        Self {
            global_level: "warn".to_string(),
            console_output: false,
            log_directory: Some(PathBuf::from("/var/log/fastoverlap")),
            search_level: "warn".to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, level) in [
            ("global_level", &self.global_level),
            ("algorithm_level", &self.algorithm_level),
            ("pipeline_level", &self.pipeline_level),
            ("search_level", &self.search_level),
        ] {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if self.file_prefix.is_empty() {
            return Err("file_prefix must not be empty".to_string());
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        Ok(())
    }

    /// Effective level for a component
    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "algorithm" | "algorithms" => &self.algorithm_level,
            "pipeline" => &self.pipeline_level,
            "search" | "branch_bound" => &self.search_level,
            _ => &self.global_level,
        }
    }

    /// `EnvFilter` directives for the crate's modules.
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        format!(
            "{krate}={},{krate}::algorithms={},{krate}::pipeline={},{krate}::algorithms::branch_bound={}",
            self.global_level, self.algorithm_level, self.pipeline_level, self.search_level
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.global_level, "info");
        assert!(config.console_output);
        assert!(config.log_directory.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let dev = LoggingConfig::development();
        assert_eq!(dev.algorithm_level, "trace");
        assert!(dev.include_file_location);

        let prod = LoggingConfig::production();
        assert_eq!(prod.global_level, "warn");
        assert!(!prod.console_output);
    }

    #[test]
    fn test_invalid_level_rejected() {
        let mut config = LoggingConfig::default();
        config.search_level = "verbose".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.contains("search_level"));
    }

    #[test]
    fn test_component_levels_and_directives() {
        let config = LoggingConfig::development();
        assert_eq!(config.get_component_level("search"), "debug");
        assert_eq!(config.get_component_level("algorithms"), "trace");
        assert_eq!(config.get_component_level("other"), "debug");
        let directives = config.filter_directives();
        assert!(directives.starts_with("fastoverlap=debug"));
        assert!(directives.contains("fastoverlap::algorithms=trace"));
    }
}
