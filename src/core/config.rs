//! Configuration management

use clap::Parser;
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File, FileFormat};
use config::builder::DefaultState;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid server configuration: {0}")]
    InvalidServer(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Invalid source configuration: {0}")]
    InvalidSources(String),

    #[error("Invalid cache configuration: {0}")]
    InvalidCache(String),

    #[error("Invalid danmu configuration: {0}")]
    InvalidDanmu(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub sources: SourcesConfig,
    pub matching: MatchingConfig,
    pub ai: AiConfig,
    pub cache: CacheConfig,
    pub danmu: DanmuConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();

        let mut builder = Self::with_defaults()?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Example: DANMU_DANMU__MERGE_SOURCE_PAIRS="dandan&animeko,renren"
        builder = builder.add_source(
            Environment::with_prefix("DANMU")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(host) = &cli_args.host {
            builder = builder.set_override("server.host", host.clone())?;
        }
        if let Some(port) = cli_args.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = Self::with_defaults()?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an inline TOML document, on top of the defaults
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = Self::with_defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn with_defaults() -> Result<config::ConfigBuilder<DefaultState>, ConfigError> {
        let builder = ConfigBuilder::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 9321)?
            .set_default("server.request_timeout", 60)?
            .set_default("server.allowed_origins", vec!["*"])?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "text")?
            .set_default("logging.output", "stdout")?
            .set_default("sources.order", Vec::<String>::new())?
            .set_default("sources.platform_order", Vec::<String>::new())?
            .set_default("sources.timeout_ms", 8000)?
            .set_default("sources.search_strategy", "all")?
            .set_default("matching.title_mapping_table", "")?
            .set_default("matching.title_filter", "")?
            .set_default("matching.episode_title_filter", "")?
            .set_default("ai.enabled", false)?
            .set_default("ai.trust", false)?
            .set_default("ai.base_url", "https://api.openai.com/v1")?
            .set_default("ai.model", "gpt-4o-mini")?
            .set_default("ai.api_key", "")?
            .set_default("ai.prompt", "")?
            .set_default("ai.timeout_ms", 10000)?
            .set_default("cache.search_ttl_minutes", 5)?
            .set_default("cache.search_max_items", 100)?
            .set_default("cache.comment_ttl_minutes", 5)?
            .set_default("cache.comment_max_items", 100)?
            .set_default("cache.max_animes", 100)?
            .set_default("cache.max_preferences", 500)?
            .set_default("cache.mirror_token", "")?
            .set_default("cache.sweep_interval_secs", 300)?
            .set_default("danmu.merge_source_pairs", "")?
            .set_default("danmu.race_merge_groups", Vec::<String>::new())?
            .set_default("danmu.title_platform_offset_table", "")?
            .set_default("danmu.blocked_words", Vec::<String>::new())?
            .set_default("danmu.group_minutes", 0)?
            .set_default("danmu.convert", "none")?
            .set_default("danmu.top_bottom_to_scroll", false)?
            .set_default("danmu.color_mode", "keep")?
            .set_default(
                "danmu.palette",
                vec!["#FFFFFF", "#FE0302", "#FFAA02", "#00CD00", "#4266BE", "#CC0273"],
            )?
            .set_default("danmu.hot_threshold", 5)?
            .set_default("danmu.limit_thousands", 0)?
            .set_default("danmu.output_format", "json")?;
        Ok(builder)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.logging.validate()?;
        self.sources.validate()?;
        self.cache.validate()?;
        self.danmu.validate()?;
        Ok(())
    }
}

/// Command-line arguments for configuration override
#[derive(Debug, Parser)]
#[command(name = "danmu-aggregator")]
#[command(about = "Danmaku aggregation server", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Server host address
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: u64, // seconds
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidServer("host cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidServer("port must be greater than 0".to_string()));
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidServer(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        Ok(())
    }
}

/// An out-of-process adapter reachable over HTTP
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSourceConfig {
    pub name: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    /// Enabled sources in fan-out order. Empty means every registered source.
    pub order: Vec<String>,
    /// Platform preference used as a ranking tie-breaker
    pub platform_order: Vec<String>,
    /// Default per-call timeout
    pub timeout_ms: u64,
    /// Per-source timeout overrides
    #[serde(default)]
    pub timeouts: HashMap<String, u64>,
    /// "all" (wait for every branch) or "race" (first non-empty branch wins)
    pub search_strategy: String,
    #[serde(default)]
    pub remote: Vec<RemoteSourceConfig>,
}

impl SourcesConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidSources(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }

        let valid_strategies = ["all", "race"];
        if !valid_strategies.contains(&self.search_strategy.as_str()) {
            return Err(ConfigError::InvalidSources(format!(
                "search_strategy must be one of: {:?}",
                valid_strategies
            )));
        }

        for remote in &self.remote {
            if remote.name.is_empty() || remote.base_url.is_empty() {
                return Err(ConfigError::InvalidSources(
                    "remote sources need both name and base_url".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Timeout for one call against `source`
    pub fn timeout_for(&self, source: &str) -> std::time::Duration {
        let ms = self.timeouts.get(source).copied().unwrap_or(self.timeout_ms);
        std::time::Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    /// `orig->mapped;orig2->mapped2`
    pub title_mapping_table: String,
    /// Candidates whose title matches this regex are discarded
    pub title_filter: String,
    /// Episodes whose title matches this regex are discarded
    pub episode_title_filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub enabled: bool,
    /// A non-null verdict overrides ranking and remembered selections
    pub trust: bool,
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub prompt: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// 0 disables expiry
    pub search_ttl_minutes: u64,
    /// 0 means unbounded
    pub search_max_items: usize,
    pub comment_ttl_minutes: u64,
    pub comment_max_items: usize,
    pub max_animes: usize,
    pub max_preferences: usize,
    /// Base URL of the best-effort remote key-value mirror
    pub mirror_url: Option<String>,
    pub mirror_token: String,
    /// Seconds between expired-entry sweeps; 0 disables the sweeper
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.mirror_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidCache(
                    "mirror_url must be an http(s) URL".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DanmuConfig {
    /// `primary&secondary&secondary,primary2`
    pub merge_source_pairs: String,
    /// Primaries whose secondaries are raced instead of awaited together
    pub race_merge_groups: Vec<String>,
    /// `title@platform1&platform2@seconds;title2@all@seconds`
    pub title_platform_offset_table: String,
    pub blocked_words: Vec<String>,
    /// 0 disables grouping
    pub group_minutes: u64,
    /// "none", "simplified" or "traditional"
    pub convert: String,
    pub top_bottom_to_scroll: bool,
    /// "keep", "white" or "palette"
    pub color_mode: String,
    pub palette: Vec<String>,
    /// Repeat count at which a comment is considered popular
    pub hot_threshold: usize,
    /// 0 disables the cap
    pub limit_thousands: usize,
    /// "json" or "xml"
    pub output_format: String,
}

impl DanmuConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_converts = ["none", "simplified", "traditional"];
        if !valid_converts.contains(&self.convert.as_str()) {
            return Err(ConfigError::InvalidDanmu(format!(
                "convert must be one of: {:?}",
                valid_converts
            )));
        }

        let valid_colors = ["keep", "white", "palette"];
        if !valid_colors.contains(&self.color_mode.as_str()) {
            return Err(ConfigError::InvalidDanmu(format!(
                "color_mode must be one of: {:?}",
                valid_colors
            )));
        }

        let valid_formats = ["json", "xml"];
        if !valid_formats.contains(&self.output_format.as_str()) {
            return Err(ConfigError::InvalidDanmu(format!(
                "output_format must be one of: {:?}",
                valid_formats
            )));
        }

        Ok(())
    }
}
