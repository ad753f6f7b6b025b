use crate::engine::EngineConfig;
use crate::errors::LinebarsError;
use crate::logging::{DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::patterns::{PatternSpec, PatternTable};
use crate::pool::PoolConfig;
use crate::tracker::BarStyle;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub workers: Option<usize>,
    pub no_color: bool,
    pub show_index: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    pub patterns: PatternSpec,
    pub bar: BarStyle,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    patterns: Option<PartialPatternConfig>,
    bar: Option<PartialBarConfig>,
    engine: Option<PartialEngineConfig>,
    logging: Option<PartialLoggingConfig>,
    pool: Option<PartialPoolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialPatternConfig {
    total: Option<String>,
    count: Option<String>,
    alias: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialBarConfig {
    width: Option<usize>,
    fill_complete: Option<char>,
    fill_remaining: Option<char>,
    prefix: Option<String>,
    use_color: Option<bool>,
    show_prefix: Option<bool>,
    show_percentage: Option<bool>,
    show_fraction: Option<bool>,
    show_duration: Option<bool>,
    show_count_without_total: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialEngineConfig {
    poll_timeout_ms: Option<u64>,
    grace_period_ms: Option<u64>,
    reset_payload: Option<String>,
    reset_preserves_identity: Option<bool>,
    show_index: Option<bool>,
    log_messages: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialPoolConfig {
    concurrency: Option<usize>,
    channel_capacity: Option<usize>,
}

pub fn load_config(overrides: &CliOverrides, process_cwd: &Path) -> Result<AppConfig, LinebarsError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let path = absolutize_path(process_cwd, path);
        let file_contents =
            std::fs::read_to_string(&path).map_err(|e| LinebarsError::Io(e.to_string()))?;
        let partial = parse_partial(&file_contents)?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides, process_cwd);
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Parse a TOML document over the defaults without touching the filesystem.
pub fn config_from_str(contents: &str) -> Result<AppConfig, LinebarsError> {
    let mut cfg = AppConfig::default();
    merge_partial_config(&mut cfg, parse_partial(contents)?);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn parse_partial(contents: &str) -> Result<PartialAppConfig, LinebarsError> {
    toml::from_str(contents).map_err(|e| LinebarsError::ConfigParse(e.to_string()))
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(patterns) = partial.patterns {
        if let Some(value) = patterns.total {
            cfg.patterns.total = value;
        }
        if let Some(value) = patterns.count {
            cfg.patterns.count = value;
        }
        if let Some(value) = patterns.alias {
            cfg.patterns.alias = value;
        }
    }

    if let Some(bar) = partial.bar {
        if let Some(value) = bar.width {
            cfg.bar.width = value;
        }
        if let Some(value) = bar.fill_complete {
            cfg.bar.fill_complete = value;
        }
        if let Some(value) = bar.fill_remaining {
            cfg.bar.fill_remaining = value;
        }
        if let Some(value) = bar.prefix {
            cfg.bar.prefix = value;
        }
        if let Some(value) = bar.use_color {
            cfg.bar.use_color = value;
        }
        if let Some(value) = bar.show_prefix {
            cfg.bar.show_prefix = value;
        }
        if let Some(value) = bar.show_percentage {
            cfg.bar.show_percentage = value;
        }
        if let Some(value) = bar.show_fraction {
            cfg.bar.show_fraction = value;
        }
        if let Some(value) = bar.show_duration {
            cfg.bar.show_duration = value;
        }
        if let Some(value) = bar.show_count_without_total {
            cfg.bar.show_count_without_total = value;
        }
    }

    if let Some(engine) = partial.engine {
        if let Some(value) = engine.poll_timeout_ms {
            cfg.engine.poll_timeout_ms = value;
        }
        if let Some(value) = engine.grace_period_ms {
            cfg.engine.grace_period_ms = value;
        }
        if let Some(value) = engine.reset_payload {
            cfg.engine.reset_payload = value;
        }
        if let Some(value) = engine.reset_preserves_identity {
            cfg.engine.reset_preserves_identity = value;
        }
        if let Some(value) = engine.show_index {
            cfg.engine.show_index = value;
        }
        if let Some(value) = engine.log_messages {
            cfg.engine.log_messages = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.path {
            cfg.logging.path = Some(value);
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }

    if let Some(pool) = partial.pool {
        if let Some(value) = pool.concurrency {
            cfg.pool.concurrency = value;
        }
        if let Some(value) = pool.channel_capacity {
            cfg.pool.channel_capacity = Some(value);
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides, process_cwd: &Path) {
    if let Some(workers) = overrides.workers {
        cfg.pool.concurrency = workers;
    }
    if let Some(path) = &overrides.log_path {
        cfg.logging.path = Some(absolutize_path(process_cwd, path));
    }
    if overrides.no_color {
        cfg.bar.use_color = false;
    }
    if overrides.show_index {
        cfg.engine.show_index = true;
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

pub fn validate_config(cfg: &AppConfig) -> Result<(), LinebarsError> {
    PatternTable::compile(&cfg.patterns)?;

    if cfg.bar.width == 0 {
        return Err(LinebarsError::Configuration(
            "bar.width must be greater than zero".to_string(),
        ));
    }

    if cfg.engine.poll_timeout_ms == 0 {
        return Err(LinebarsError::Configuration(
            "engine.poll_timeout_ms must be greater than zero".to_string(),
        ));
    }

    if cfg.engine.reset_payload.trim().is_empty() {
        return Err(LinebarsError::Configuration(
            "engine.reset_payload must not be empty".to_string(),
        ));
    }

    if cfg.pool.concurrency == 0 {
        return Err(LinebarsError::Configuration(
            "pool.concurrency must be greater than zero".to_string(),
        ));
    }

    if cfg.pool.channel_capacity == Some(0) {
        return Err(LinebarsError::Configuration(
            "pool.channel_capacity must be greater than zero when set".to_string(),
        ));
    }

    Ok(())
}
