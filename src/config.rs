use crate::cli::{Cli, OutputFormat, VerbosityLevel};
use crate::dispatcher::{DEFAULT_BATCH_SIZE, DEFAULT_WORKER_TIMEOUT, DispatchConfig};
use crate::output::{DEFAULT_TRUNCATE_VALUES, ReportOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub batch: BatchConfig,
    pub report: ReportConfig,
    pub files: FileConfig,
    pub output: OutputConfig,
}

/// Worker batching configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum number of files per worker
    pub batch_size: usize,
    /// Seconds a worker gets to reply to its batch
    pub worker_timeout_seconds: u64,
    /// Run workers as in-process tasks
    pub in_process: bool,
}

/// Report content configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    pub alphabetical: bool,
    /// Values listed per attribute
    pub truncate: usize,
    /// List every value regardless of `truncate`
    pub no_truncate: bool,
    pub hidden_attributes: Vec<String>,
    pub ignored_attributes: Vec<String>,
    pub hide_all: bool,
    pub ignore_all: bool,
}

/// Input file configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FileConfig {
    /// Explicit file paths
    pub files: Vec<PathBuf>,
    /// Glob patterns selecting files
    pub globs: Vec<String>,
    /// Exclude patterns (glob syntax)
    pub exclude_patterns: Vec<String>,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode (summary and failures only)
    pub quiet: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            worker_timeout_seconds: DEFAULT_WORKER_TIMEOUT.as_secs(),
            in_process: false,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            alphabetical: false,
            truncate: DEFAULT_TRUNCATE_VALUES,
            no_truncate: false,
            hidden_attributes: vec![],
            ignored_attributes: vec![],
            hide_all: false,
            ignore_all: false,
        }
    }
}

impl Config {
    pub fn verbosity(&self) -> VerbosityLevel {
        VerbosityLevel::from_flags(self.output.verbose, self.output.quiet)
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            batch_size: self.batch.batch_size,
            worker_timeout: Duration::from_secs(self.batch.worker_timeout_seconds),
        }
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            alphabetical: self.report.alphabetical,
            truncate_values: (!self.report.no_truncate).then_some(self.report.truncate),
            hidden_attributes: self.report.hidden_attributes.iter().cloned().collect(),
            ignored_attributes: self.report.ignored_attributes.iter().cloned().collect(),
            hide_all: self.report.hide_all,
            ignore_all: self.report.ignore_all,
            format: self.output.format,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value)))
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(&SystemEnvProvider, cli).await
    }

    pub async fn load_config_with(env: &impl EnvProvider, cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides_with(env, config)?;

        // CLI flags take precedence over everything else
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "xml-stats.toml",
            "xml-stats.json",
            ".xml-stats.toml",
            ".xml-stats.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("xml-stats");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        // Batch settings
        if let Some(value) = env.get("XML_STATS_BATCH_SIZE") {
            config.batch.batch_size = parse_env("XML_STATS_BATCH_SIZE", &value)?;
        }
        if let Some(value) = env.get("XML_STATS_WORKER_TIMEOUT") {
            config.batch.worker_timeout_seconds = parse_env("XML_STATS_WORKER_TIMEOUT", &value)?;
        }
        if let Some(value) = env.get("XML_STATS_IN_PROCESS") {
            config.batch.in_process = parse_env("XML_STATS_IN_PROCESS", &value)?;
        }

        // Report settings
        if let Some(value) = env.get("XML_STATS_TRUNCATE") {
            config.report.truncate = parse_env("XML_STATS_TRUNCATE", &value)?;
            config.report.no_truncate = false;
        }
        if let Some(value) = env.get("XML_STATS_ALPHABETICAL") {
            config.report.alphabetical = parse_env("XML_STATS_ALPHABETICAL", &value)?;
        }

        // Output settings
        if let Some(value) = env.get("XML_STATS_VERBOSE") {
            config.output.verbose = parse_env("XML_STATS_VERBOSE", &value)?;
        }
        if let Some(value) = env.get("XML_STATS_QUIET") {
            config.output.quiet = parse_env("XML_STATS_QUIET", &value)?;
        }
        if let Some(format) = env.get("XML_STATS_FORMAT") {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormat::Human,
                "json" => OutputFormat::Json,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid XML_STATS_FORMAT value: {}",
                        format
                    )));
                }
            };
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    ///
    /// Flags that were not given leave the configured value alone.
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        // Batch settings
        if let Some(batch_size) = cli.batch_size {
            config.batch.batch_size = batch_size;
        }
        if let Some(timeout) = cli.worker_timeout {
            config.batch.worker_timeout_seconds = timeout;
        }
        config.batch.in_process |= cli.in_process;

        // Report settings
        config.report.alphabetical |= cli.alphabetical;
        if let Some(truncate) = cli.truncate {
            config.report.truncate = truncate;
            config.report.no_truncate = false;
        }
        config.report.no_truncate |= cli.no_truncate;
        config.report.hidden_attributes.extend(cli.hide.iter().cloned());
        config.report.ignored_attributes.extend(cli.ignore.iter().cloned());
        config.report.hide_all |= cli.hide_all;
        config.report.ignore_all |= cli.ignore_all;

        // Output settings
        if let Some(format) = cli.format {
            config.output.format = format;
        }
        if cli.verbose {
            config.output.verbose = true;
            config.output.quiet = false;
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
        }

        // File settings
        let files = cli.all_files();
        if !files.is_empty() || !cli.globs.is_empty() {
            config.files.files = files;
            config.files.globs = cli.globs.clone();
        }
        if !cli.exclude_patterns.is_empty() {
            config.files.exclude_patterns = cli.exclude_patterns.clone();
        }

        config
    }

    /// Merge two configurations (second takes precedence)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        base.batch = override_config.batch;
        base.report = override_config.report;
        base.output = override_config.output;

        if !override_config.files.files.is_empty() {
            base.files.files = override_config.files.files;
        }
        if !override_config.files.globs.is_empty() {
            base.files.globs = override_config.files.globs;
        }
        if !override_config.files.exclude_patterns.is_empty() {
            base.files.exclude_patterns = override_config.files.exclude_patterns;
        }

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.batch.batch_size == 0 {
            return Err(ConfigError::Validation(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        if config.batch.worker_timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Worker timeout must be greater than 0".to_string(),
            ));
        }

        if config.report.truncate == 0 {
            return Err(ConfigError::Validation(
                "Truncate limit must be greater than 0".to_string(),
            ));
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        if config.files.files.is_empty() && config.files.globs.is_empty() {
            return Err(ConfigError::Validation(
                "At least one file or glob pattern must be specified".to_string(),
            ));
        }

        Ok(())
    }
}
