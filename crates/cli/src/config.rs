//! Configuration file for `leanflow serve`.
//!
//! ```toml
//! [agent]
//! model = "claude-sonnet-4-20250514"
//! max_tokens = 4096
//! timeout_secs = 120
//!
//! [rate_limit]
//! max = 10
//! window_secs = 3600
//!
//! [server]
//! port = 8080
//! database = "leanflow.db"
//! ```
//!
//! Every key is optional. `LEANFLOW_*` environment variables are applied on
//! top of the file, so the environment wins.

use std::path::{Path, PathBuf};
use std::time::Duration;

use leanflow_synthesis::SynthesisConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    #[serde(default)]
    pub(crate) agent: AgentSection,
    #[serde(default)]
    pub(crate) rate_limit: RateLimitSection,
    #[serde(default)]
    pub(crate) server: ServerSection,
}

/// `[agent]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct AgentSection {
    pub(crate) model: Option<String>,
    pub(crate) max_tokens: Option<u32>,
    pub(crate) timeout_secs: Option<u64>,
}

/// `[rate_limit]` section: agent invocations per user per window.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RateLimitSection {
    pub(crate) max: Option<u64>,
    pub(crate) window_secs: Option<u64>,
}

/// `[server]` section. Command-line flags take precedence.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ServerSection {
    pub(crate) port: Option<u16>,
    pub(crate) database: Option<PathBuf>,
}

/// Read and parse a config TOML file from `path`.
pub(crate) fn read_config(path: &Path) -> Result<FileConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;

    toml::from_str(&content).map_err(|e| format!("could not parse '{}': {}", path.display(), e))
}

impl FileConfig {
    /// Defaults, then this file, then the environment.
    pub(crate) fn synthesis_config(&self) -> Result<SynthesisConfig, String> {
        let mut config = SynthesisConfig::default();
        if let Some(model) = &self.agent.model {
            config.model = model.clone();
        }
        if let Some(max_tokens) = self.agent.max_tokens {
            config.max_tokens = max_tokens;
        }
        if let Some(secs) = self.agent.timeout_secs {
            config.agent_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = self.rate_limit.max {
            config.rate_limit = max;
        }
        if let Some(secs) = self.rate_limit.window_secs {
            config.rate_limit_window = Duration::from_secs(secs);
        }
        config
            .apply_overrides(|name| std::env::var(name).ok())
            .map_err(|e| e.to_string())?;
        Ok(config)
    }
}
