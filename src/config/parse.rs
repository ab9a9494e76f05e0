use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, unexpanded_env_vars};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string)
}

/// Parses, normalises and validates a YAML config document.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);

    let unexpanded = unexpanded_env_vars(&yaml_string);
    if !unexpanded.is_empty() {
        return Err(ConfigError::Validation(format!(
            "environment variables are not set: {}",
            unexpanded.join(", ")
        )));
    }

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;

    config.source.path = expand_tilde(&config.source.path);
    config.storage.path = expand_tilde(&config.storage.path);

    if config.channels.is_empty() {
        config.channels = DEFAULT_CHANNELS.iter().map(|c| c.to_string()).collect();
    }

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for channel in &config.channels {
        if channel.trim().is_empty() {
            errors.push("channel names must not be empty".to_string());
        } else if !seen.insert(channel.as_str()) {
            errors.push(format!("channel '{}' is listed more than once", channel));
        }
    }

    let positive = [
        ("source.read_chunk", config.source.read_chunk),
        ("collector.batch_size", config.collector.batch_size),
        ("collector.max_records_per_cycle", config.collector.max_records_per_cycle),
        ("pipeline.queue_capacity", config.pipeline.queue_capacity),
        ("storage.reader_connections", config.storage.reader_connections),
        ("sampler.sample_size", config.sampler.sample_size),
        ("writer.max_attempts", config.writer.max_attempts as usize),
    ];
    for (name, value) in positive {
        if value == 0 {
            errors.push(format!("{} must be greater than zero", name));
        }
    }

    let intervals = [
        ("source.read_timeout", config.source.read_timeout),
        ("collector.poll_interval", config.collector.poll_interval),
        ("sampler.interval", config.sampler.interval),
    ];
    for (name, value) in intervals {
        if value.is_zero() {
            errors.push(format!("{} must be greater than zero", name));
        }
    }

    if config.web.listen.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!(
            "web.listen '{}' is not a socket address",
            config.web.listen
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}
