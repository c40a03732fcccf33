//! Runtime configuration for the synthesis core.

use std::time::Duration;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 120;
/// Agent invocations allowed per user per window.
pub const DEFAULT_RATE_LIMIT: u64 = 10;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisConfig {
    /// Model identifier sent to the agent client and recorded on each run.
    pub model: String,
    pub max_tokens: u32,
    /// Upper bound on a single external generation call.
    pub agent_timeout: Duration,
    pub rate_limit: u64,
    pub rate_limit_window: Duration,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            agent_timeout: Duration::from_secs(DEFAULT_AGENT_TIMEOUT_SECS),
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
        }
    }
}

impl SynthesisConfig {
    /// Defaults overridden by `LEANFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply overrides from any variable source. Unset variables keep the
    /// current value; unparsable ones are an error.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("LEANFLOW_MODEL").filter(|m| !m.trim().is_empty()) {
            self.model = model;
        }
        if let Some(v) = parse_var::<u32>(&lookup, "LEANFLOW_MAX_TOKENS")? {
            self.max_tokens = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "LEANFLOW_AGENT_TIMEOUT_SECS")? {
            self.agent_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "LEANFLOW_RATE_LIMIT")? {
            self.rate_limit = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "LEANFLOW_RATE_LIMIT_WINDOW_SECS")? {
            self.rate_limit_window = Duration::from_secs(v);
        }
        Ok(())
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn overrides_replace_defaults() {
        let mut config = SynthesisConfig::default();
        config
            .apply_overrides(lookup(&[
                ("LEANFLOW_MODEL", "test-model"),
                ("LEANFLOW_AGENT_TIMEOUT_SECS", "5"),
                ("LEANFLOW_RATE_LIMIT", "2"),
            ]))
            .unwrap();
        assert_eq!(config.model, "test-model");
        assert_eq!(config.agent_timeout, Duration::from_secs(5));
        assert_eq!(config.rate_limit, 2);
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn unparsable_override_is_rejected() {
        let mut config = SynthesisConfig::default();
        let err = config
            .apply_overrides(lookup(&[("LEANFLOW_MAX_TOKENS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("LEANFLOW_MAX_TOKENS"));
    }
}
