use anyhow::{Context, Result};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Runtime settings, read from the environment (and `.env`) at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub connectivity_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GEMINI_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .context("GEMINI_API_KEY must be set in .env file")?;

        let model = lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = lookup("GEMINI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let timeout_secs: u64 = parse_or(&lookup, "ANALYSIS_TIMEOUT_SECS", 60)?;
        if timeout_secs == 0 {
            anyhow::bail!("ANALYSIS_TIMEOUT_SECS must be greater than zero");
        }
        let max_retries: u32 = parse_or(&lookup, "ANALYSIS_MAX_RETRIES", 1)?;
        let connectivity_ms: u64 = parse_or(&lookup, "CONNECTIVITY_TIMEOUT_MS", 1500)?;

        Ok(Self {
            api_key,
            model,
            base_url,
            request_timeout: Duration::from_secs(timeout_secs),
            max_retries,
            connectivity_timeout: Duration::from_millis(connectivity_ms),
        })
    }

    /// `host:port` of the analysis API, used for reachability probes
    pub fn probe_address(&self) -> Option<String> {
        let (scheme, rest) = self.base_url.split_once("://").unwrap_or(("https", self.base_url.as_str()));
        let authority = rest.split('/').next()?;
        if authority.is_empty() {
            return None;
        }
        if authority.contains(':') {
            return Some(authority.to_string());
        }
        let port = if scheme.eq_ignore_ascii_case("http") { 80 } else { 443 };
        Some(format!("{}:{}", authority, port))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("GEMINI_API_KEY", "test_key")]).unwrap();

        assert_eq!(config.api_key, "test_key");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.connectivity_timeout, Duration::from_millis(1500));
        assert_eq!(
            config.probe_address().as_deref(),
            Some("generativelanguage.googleapis.com:443")
        );
    }

    #[test]
    fn test_missing_or_blank_key_is_an_error() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("GEMINI_API_KEY", "   ")]).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("GEMINI_API_KEY", "k"),
            ("GEMINI_MODEL", "gemini-2.5-pro"),
            ("GEMINI_BASE_URL", "http://localhost:8089/v1/"),
            ("ANALYSIS_TIMEOUT_SECS", "15"),
            ("ANALYSIS_MAX_RETRIES", "0"),
        ])
        .unwrap();

        assert_eq!(config.model, "gemini-2.5-pro");
        assert_eq!(config.base_url, "http://localhost:8089/v1");
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.probe_address().as_deref(), Some("localhost:8089"));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        assert!(config_from(&[("GEMINI_API_KEY", "k"), ("ANALYSIS_MAX_RETRIES", "many")]).is_err());
        assert!(config_from(&[("GEMINI_API_KEY", "k"), ("ANALYSIS_TIMEOUT_SECS", "0")]).is_err());
    }
}
