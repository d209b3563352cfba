use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::cache::DEFAULT_MAX_SIZE;
use crate::loader::{CacheLevel, LoadOptions};

/// Complete modload configuration (loaded from `modload.toml`)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    /// Bindings injected into every load
    #[serde(default)]
    pub context: Map<String, Value>,

    /// Host modules served for non-relative requests
    #[serde(default)]
    pub externals: BTreeMap<String, Value>,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Global enable switch
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Store capacity (e.g. "64MB", "512KB", or plain bytes); unset keeps the default
    #[serde(default)]
    pub max_size: Option<String>,

    /// How much of each load is memoized
    #[serde(default)]
    pub level: CacheLevel,

    /// Explicit TTL (e.g. "10m", "2h", or plain seconds); unset compares
    /// modification times
    #[serde(default)]
    pub max_age: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: None,
            level: CacheLevel::default(),
            max_age: None,
        }
    }
}

impl CacheConfig {
    pub fn max_size_bytes(&self) -> Result<u64> {
        match &self.max_size {
            Some(size) => parse_size(size).with_context(|| format!("invalid cache.max_size '{}'", size)),
            None => Ok(DEFAULT_MAX_SIZE),
        }
    }

    pub fn max_age(&self) -> Result<Option<Duration>> {
        self.max_age
            .as_deref()
            .map(|ttl| {
                parse_duration(ttl).with_context(|| format!("invalid cache.max_age '{}'", ttl))
            })
            .transpose()
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.max_size_bytes()?;
        self.cache.max_age()?;
        Ok(())
    }

    /// Default options for every load issued with this configuration
    pub fn load_options(&self) -> Result<LoadOptions> {
        let mut options = LoadOptions::new()
            .with_cache_level(self.cache.level)
            .with_context(self.context.clone());
        options.max_age = self.cache.max_age()?;
        Ok(options)
    }
}

/// Parse size string (e.g., "64MB", "512KB") into bytes
pub fn parse_size(size_str: &str) -> Result<u64> {
    let size_str = size_str.trim().to_uppercase();

    let (num, multiplier) = if let Some(num) = size_str.strip_suffix("TB") {
        (num, 1024u64 * 1024 * 1024 * 1024)
    } else if let Some(num) = size_str.strip_suffix("GB") {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = size_str.strip_suffix("MB") {
        (num, 1024 * 1024)
    } else if let Some(num) = size_str.strip_suffix("KB") {
        (num, 1024)
    } else if let Some(num) = size_str.strip_suffix('B') {
        (num, 1)
    } else {
        (size_str.as_str(), 1)
    };

    let num: u64 = num.trim().parse().context("Invalid size number")?;
    num.checked_mul(multiplier)
        .with_context(|| format!("size too large: {}", size_str))
}

/// Parse duration string (e.g., "7d", "24h", "30m", "45s") into a duration
pub fn parse_duration(ttl_str: &str) -> Result<Duration> {
    let ttl_str = ttl_str.trim().to_lowercase();

    let (num, seconds) = if let Some(num) = ttl_str.strip_suffix("ms") {
        let millis: u64 = num.trim().parse().context("Invalid duration number")?;
        return Ok(Duration::from_millis(millis));
    } else if let Some(num) = ttl_str.strip_suffix('d') {
        (num, 24 * 60 * 60)
    } else if let Some(num) = ttl_str.strip_suffix('h') {
        (num, 60 * 60)
    } else if let Some(num) = ttl_str.strip_suffix('m') {
        (num, 60)
    } else if let Some(num) = ttl_str.strip_suffix('s') {
        (num, 1)
    } else {
        (ttl_str.as_str(), 1)
    };

    let num: u64 = num.trim().parse().context("Invalid duration number")?;
    Ok(Duration::from_secs(num * seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.level, CacheLevel::FullResult);
        assert_eq!(config.cache.max_size_bytes().unwrap(), DEFAULT_MAX_SIZE);
        assert_eq!(config.cache.max_age().unwrap(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [cache]
            enabled = false
            max_size = "64MB"
            level = "converted-only"
            max_age = "10m"

            [context]
            greeting = "hello"
            retries = 3

            [externals]
            "app-version" = "1.2.3"
            "#,
        )
        .unwrap();

        assert!(!config.cache.enabled);
        assert_eq!(config.cache.max_size_bytes().unwrap(), 64 * 1024 * 1024);
        assert_eq!(config.cache.level, CacheLevel::ConvertedOnly);
        assert_eq!(config.context["greeting"], json!("hello"));
        assert_eq!(config.externals["app-version"], json!("1.2.3"));

        let options = config.load_options().unwrap();
        assert_eq!(options.cache_level, CacheLevel::ConvertedOnly);
        assert_eq!(options.max_age, Some(Duration::from_secs(600)));
        assert_eq!(options.context["retries"], json!(3));
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let parsed: Result<Config, _> = toml::from_str("[cache]\nlevel = \"everything\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_invalid_size_fails_validation() {
        let mut config = Config::default();
        config.cache.max_size = Some("lots".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512KB").unwrap(), 512 * 1024);
        assert_eq!(parse_size("2gb").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("64000000").unwrap(), 64_000_000);
        assert_eq!(parse_size("100B").unwrap(), 100);
        assert!(parse_size("MB").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(7 * 86400));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("soon").is_err());
    }
}
