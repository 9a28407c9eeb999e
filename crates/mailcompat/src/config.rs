//! Engine configuration.
//!
//! Values come from `.env`-style profiles: one `key=value` per line, `#`
//! comments, optional double quotes around values. Durations accept `ms`,
//! `s`, `m` and `h` suffixes; a bare number is seconds.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{EngineError, Result};

pub const DEFAULT_DATASET_URL: &str = "https://www.caniemail.com/api/data.json";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_PROFILE: &str = include_str!("../profiles/default.env");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub dataset_url: String,
    pub cache_ttl: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dataset_url: DEFAULT_DATASET_URL.to_string(),
            cache_ttl: DEFAULT_CACHE_TTL,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// The bundled default profile.
    pub fn builtin() -> Result<Self> {
        Self::from_profile_content(DEFAULT_PROFILE)
    }

    /// Defaults overridden by whatever keys `content` sets. Unknown keys are
    /// ignored.
    pub fn from_profile_content(content: &str) -> Result<Self> {
        let values = parse_profile_content(content);
        let mut config = Self::default();

        if let Some(url) = values.get("dataset_url") {
            if url.is_empty() {
                return Err(EngineError::invalid_config("dataset_url cannot be empty"));
            }
            config.dataset_url = url.clone();
        }
        if let Some(raw) = values.get("cache_ttl") {
            config.cache_ttl = parse_duration_value(raw)?;
        }
        if let Some(raw) = values.get("connect_timeout") {
            config.connect_timeout = parse_duration_value(raw)?;
        }
        if let Some(raw) = values.get("request_timeout") {
            config.request_timeout = parse_duration_value(raw)?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_dataset_url(mut self, url: impl Into<String>) -> Self {
        self.dataset_url = url.into();
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

#[must_use]
pub fn parse_profile_content(content: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim().to_string();
        let mut value = value_raw.trim().to_string();

        if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
            value = value[1..value.len() - 1].to_string();
        }

        values.insert(key, value);
    }

    values
}

pub fn parse_duration_value(raw: &str) -> Result<Duration> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::invalid_config("duration value cannot be empty"));
    }

    let parse = |digits: &str, unit: &str| {
        digits.trim().parse::<u64>().map_err(|_| {
            EngineError::invalid_config(format!("invalid {unit} duration: {raw}"))
        })
    };

    if let Some(ms) = trimmed.strip_suffix("ms") {
        return Ok(Duration::from_millis(parse(ms, "millisecond")?));
    }
    if let Some(hours) = trimmed.strip_suffix('h') {
        return Ok(Duration::from_secs(parse(hours, "hour")?.saturating_mul(3600)));
    }
    if let Some(minutes) = trimmed.strip_suffix('m') {
        return Ok(Duration::from_secs(parse(minutes, "minute")?.saturating_mul(60)));
    }
    if let Some(sec) = trimmed.strip_suffix('s') {
        return Ok(Duration::from_secs(parse(sec, "second")?));
    }

    let value = trimmed
        .parse::<u64>()
        .map_err(|_| EngineError::invalid_config(format!("invalid duration value: {raw}")))?;
    Ok(Duration::from_secs(value))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{EngineConfig, parse_duration_value, parse_profile_content};

    #[test]
    fn builtin_profile_matches_defaults() {
        let builtin = EngineConfig::builtin().expect("bundled profile parses");
        assert_eq!(builtin, EngineConfig::default());
    }

    #[test]
    fn parse_env_fragment() {
        let parsed = parse_profile_content(
            r#"
                # comment
                key1=value1
                key2="value 2"
                not a pair
            "#,
        );

        assert_eq!(parsed.get("key1"), Some(&"value1".to_string()));
        assert_eq!(parsed.get("key2"), Some(&"value 2".to_string()));
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn profile_overrides_selected_keys() {
        let config = EngineConfig::from_profile_content(
            "dataset_url=\"http://127.0.0.1:9/data.json\"\ncache_ttl=15m\n",
        )
        .expect("profile parses");
        assert_eq!(config.dataset_url, "http://127.0.0.1:9/data.json");
        assert_eq!(config.cache_ttl, Duration::from_secs(900));
        assert_eq!(config.request_timeout, EngineConfig::default().request_timeout);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let error = EngineConfig::from_profile_content("cache_ttl=soon").expect_err("bad ttl");
        assert!(error.to_string().contains("invalid duration value"));

        let error = EngineConfig::from_profile_content("dataset_url=").expect_err("empty url");
        assert!(error.to_string().contains("dataset_url cannot be empty"));
    }

    #[test]
    fn parse_duration_supports_units() {
        assert_eq!(
            parse_duration_value("250ms").expect("ms"),
            Duration::from_millis(250)
        );
        assert_eq!(parse_duration_value("7s").expect("s"), Duration::from_secs(7));
        assert_eq!(parse_duration_value("2m").expect("m"), Duration::from_secs(120));
        assert_eq!(
            parse_duration_value("24h").expect("h"),
            Duration::from_secs(86_400)
        );
        assert_eq!(parse_duration_value("9").expect("bare"), Duration::from_secs(9));
        assert!(parse_duration_value("").is_err());
        assert!(parse_duration_value("xh").is_err());
    }
}
