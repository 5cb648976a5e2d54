// ABOUTME: Configuration management for the flowline application
// ABOUTME: Handles loading and merging configuration from files and environment variables

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_workflow_dir")]
    pub workflow_dir: PathBuf,

    /// Wall-clock budget for a single script evaluation.
    #[serde(with = "humantime_serde", default = "default_script_budget")]
    pub script_budget: Duration,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

fn default_database_url() -> String {
    "sqlite://flowline.db?mode=rwc".to_string()
}

fn default_workflow_dir() -> PathBuf {
    PathBuf::from("./workflows")
}

fn default_script_budget() -> Duration {
    Duration::from_secs(5)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            workflow_dir: default_workflow_dir(),
            script_budget: default_script_budget(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::find_config_file()?,
        };

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            let mut config: Config = serde_yaml::from_str(&contents)?;

            config.merge_env()?;

            Ok(config)
        } else {
            let mut config = Config::default();
            config.merge_env()?;
            Ok(config)
        }
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Result<PathBuf> {
        let possible_paths = vec![
            PathBuf::from("flowline.yaml"),
            PathBuf::from("flowline.yml"),
            PathBuf::from(".flowline.yaml"),
            PathBuf::from(".flowline.yml"),
        ];

        // Check home directory
        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".flowline").join("config.yaml");
            if home_config.exists() {
                return Ok(home_config);
            }
        }

        // Check current directory
        for path in possible_paths {
            if path.exists() {
                return Ok(path);
            }
        }

        // Return default path (may not exist)
        Ok(PathBuf::from("flowline.yaml"))
    }

    /// Merge environment variables into configuration
    fn merge_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("FLOWLINE_DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(dir) = std::env::var("FLOWLINE_WORKFLOW_DIR") {
            self.workflow_dir = PathBuf::from(dir);
        }
        if let Ok(budget) = std::env::var("FLOWLINE_SCRIPT_BUDGET") {
            self.script_budget = humantime::parse_duration(&budget)?;
        }
        if let Ok(level) = std::env::var("FLOWLINE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("FLOWLINE_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database_url, "sqlite://flowline.db?mode=rwc");
        assert_eq!(config.script_budget, Duration::from_secs(5));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_yaml_with_duration() {
        let yaml = "database_url: sqlite://test.db\nscript_budget: 250ms\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.database_url, "sqlite://test.db");
        assert_eq!(config.script_budget, Duration::from_millis(250));
        assert_eq!(config.workflow_dir, PathBuf::from("./workflows"));
    }
}
