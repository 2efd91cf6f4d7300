use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Default runtime configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "hearth.toml";

/// Environment variable overriding the runtime configuration path.
pub const CONFIG_ENV: &str = "HEARTH_CONFIG";

const MAX_TICK_INTERVAL_MS: u64 = 1000;

/// Runtime configuration loaded from `hearth.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeSection {
    /// Directory holding `services.json` and the application document.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    /// Target time between orchestrator steps.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Run without a primary application, executing every service self-test.
    #[serde(default)]
    pub headless: bool,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            tick_interval_ms: default_tick_interval_ms(),
            headless: false,
        }
    }
}

/// Logging sinks and filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when neither `HEARTH_LOG` nor
    /// `RUST_LOG` is set.
    #[serde(default)]
    pub filter: Option<String>,
    /// Directory for the rolling `tracing` log file.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Write the rolling log file as JSON lines.
    #[serde(default)]
    pub json: bool,
    /// Echo log messages to stderr.
    #[serde(default = "default_true")]
    pub console: bool,
    /// Extra plain-text file receiving every log message.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Log categories switched off at startup (e.g. `"debug"`).
    #[serde(default)]
    pub disabled_categories: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            dir: None,
            json: false,
            console: true,
            file: None,
            disabled_categories: Vec::new(),
        }
    }
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("config")
}

fn default_tick_interval_ms() -> u64 {
    16
}

fn default_true() -> bool {
    true
}

impl RuntimeConfig {
    /// Parse and validate runtime configuration TOML.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).context("failed to parse runtime config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a runtime configuration from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config at {}", path.display()))?;

        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid runtime config at {}", path.display()))
    }

    /// Load the runtime configuration.
    ///
    /// Precedence: `HEARTH_CONFIG` env var > `./hearth.toml` > defaults. An
    /// explicitly configured path must exist; the default file is optional.
    pub fn load() -> Result<Self> {
        if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Self::from_path(Path::new(&path));
        }

        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Self::from_path(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate field values and semantic constraints.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.config_dir.as_os_str().is_empty() {
            bail!("runtime.config_dir must not be empty");
        }
        if self.runtime.tick_interval_ms > MAX_TICK_INTERVAL_MS {
            bail!(
                "runtime.tick_interval_ms must be at most {MAX_TICK_INTERVAL_MS}, got {}",
                self.runtime.tick_interval_ms
            );
        }

        if let Some(filter) = &self.logging.filter {
            validate_nonempty("logging.filter", filter)?;
        }
        if let Some(file) = &self.logging.file {
            if file.as_os_str().is_empty() {
                bail!("logging.file must not be empty");
            }
        }
        validate_unique(
            "logging.disabled_categories",
            &self.logging.disabled_categories,
        )?;

        Ok(())
    }
}

fn validate_nonempty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} must not be empty")
    }
    Ok(())
}

fn validate_unique(field: &str, values: &[String]) -> Result<()> {
    let mut seen = BTreeSet::new();

    for value in values {
        if value.trim().is_empty() {
            bail!("{field} entries must not be empty");
        }
        if value.trim() != value {
            bail!("{field} entry {:?} has leading/trailing whitespace", value);
        }
        if !seen.insert(value.to_ascii_lowercase()) {
            bail!("{field} contains duplicate entry {:?}", value);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
[runtime]
config_dir = "state"
tick_interval_ms = 33
headless = true

[logging]
filter = "hearth=debug"
dir = "logs"
json = true
console = false
file = "hearth.log"
disabled_categories = ["debug"]
"#;

    #[test]
    fn parses_full_config() {
        let config = RuntimeConfig::from_toml_str(FULL_CONFIG).unwrap();
        assert_eq!(config.runtime.config_dir, PathBuf::from("state"));
        assert_eq!(config.runtime.tick_interval_ms, 33);
        assert!(config.runtime.headless);
        assert_eq!(config.logging.filter.as_deref(), Some("hearth=debug"));
        assert!(config.logging.json);
        assert!(!config.logging.console);
        assert_eq!(config.logging.disabled_categories, vec!["debug".to_string()]);
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.runtime.config_dir, PathBuf::from("config"));
        assert_eq!(config.runtime.tick_interval_ms, 16);
        assert!(config.logging.console);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = RuntimeConfig::from_toml_str("[runtime]\nworkers = 4\n")
            .unwrap_err()
            .to_string();
        assert!(err.contains("failed to parse runtime config TOML"));
    }

    #[test]
    fn oversized_tick_interval_is_rejected() {
        let raw = FULL_CONFIG.replace("tick_interval_ms = 33", "tick_interval_ms = 5000");
        let err = RuntimeConfig::from_toml_str(&raw).unwrap_err().to_string();
        assert!(err.contains("runtime.tick_interval_ms must be at most"));
    }

    #[test]
    fn empty_config_dir_is_rejected() {
        let raw = FULL_CONFIG.replace("config_dir = \"state\"", "config_dir = \"\"");
        let err = RuntimeConfig::from_toml_str(&raw).unwrap_err().to_string();
        assert!(err.contains("runtime.config_dir must not be empty"));
    }

    #[test]
    fn duplicate_disabled_categories_are_rejected() {
        let raw = FULL_CONFIG.replace(
            "disabled_categories = [\"debug\"]",
            "disabled_categories = [\"debug\", \"DEBUG\"]",
        );
        let err = RuntimeConfig::from_toml_str(&raw).unwrap_err().to_string();
        assert!(err.contains("logging.disabled_categories contains duplicate entry"));
    }

    #[test]
    fn blank_filter_is_rejected() {
        let raw = FULL_CONFIG.replace("filter = \"hearth=debug\"", "filter = \"  \"");
        let err = RuntimeConfig::from_toml_str(&raw).unwrap_err().to_string();
        assert!(err.contains("logging.filter must not be empty"));
    }
}
