//! Arena configuration (`arena.toml`) and credentials from the environment.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::dashboard::PreviewHosts;
use crate::core::termination::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_MAJORITY_FRACTION, DEFAULT_MAX_WAIT, TerminationPolicy,
};

pub const ENV_EXECUTION_API_KEY: &str = "ARENA_EXECUTION_API_KEY";
pub const ENV_GITHUB_TOKEN: &str = "ARENA_GITHUB_TOKEN";
pub const ENV_DEPLOY_TOKEN: &str = "ARENA_DEPLOY_TOKEN";

/// Model used when neither the request nor the config names one.
pub const DEFAULT_MODEL: &str = "default";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Arena configuration (TOML).
///
/// Missing fields default to values suitable for a single-process deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArenaConfig {
    /// Period of the reconciliation loop.
    pub poll_interval_secs: u64,

    /// Upper bound for every external call.
    pub request_timeout_secs: u64,

    pub termination: TerminationConfig,
    pub execution: ExecutionConfig,
    pub github: GithubConfig,
    pub deploy: DeployConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminationConfig {
    pub majority_fraction: f64,
    pub idle_timeout_secs: u64,
    pub max_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub api_url: String,
    /// Model used when a spawn request does not name one.
    pub default_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubConfig {
    pub api_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeployConfig {
    pub api_url: String,
    /// Host suffix of directly browsable previews.
    pub preview_host_suffix: String,
    /// Host of the deployment dashboard.
    pub dashboard_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Base address used when building UI links for jobs.
    pub public_url: String,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            termination: TerminationConfig::default(),
            execution: ExecutionConfig::default(),
            github: GithubConfig::default(),
            deploy: DeployConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            majority_fraction: DEFAULT_MAJORITY_FRACTION,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            max_wait_secs: DEFAULT_MAX_WAIT.as_secs(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            api_url: "https://agents.example.com/api/v1".to_string(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.vercel.com".to_string(),
            preview_host_suffix: ".vercel.app".to_string(),
            dashboard_host: "vercel.com".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_url: "http://127.0.0.1:3001".to_string(),
        }
    }
}

impl ArenaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be > 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be > 0"));
        }
        let fraction = self.termination.majority_fraction;
        if fraction.is_nan() || fraction <= 0.0 || fraction > 1.0 {
            return Err(anyhow!("termination.majority_fraction must be in (0, 1]"));
        }
        if self.termination.max_wait_secs == 0 {
            return Err(anyhow!("termination.max_wait_secs must be > 0"));
        }
        for (name, url) in [
            ("execution.api_url", &self.execution.api_url),
            ("github.api_url", &self.github.api_url),
            ("deploy.api_url", &self.deploy.api_url),
        ] {
            if url.trim().is_empty() {
                return Err(anyhow!("{name} must not be empty"));
            }
        }
        if self.execution.default_model.trim().is_empty() {
            return Err(anyhow!("execution.default_model must not be empty"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn termination_policy(&self) -> TerminationPolicy {
        TerminationPolicy {
            majority_fraction: self.termination.majority_fraction,
            idle_timeout: Duration::from_secs(self.termination.idle_timeout_secs),
            max_wait: Duration::from_secs(self.termination.max_wait_secs),
        }
    }

    pub fn preview_hosts(&self) -> PreviewHosts {
        PreviewHosts {
            preview_suffix: self.deploy.preview_host_suffix.clone(),
            dashboard_host: self.deploy.dashboard_host.clone(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ArenaConfig::default()`.
pub fn load_config(path: &Path) -> Result<ArenaConfig> {
    if !path.exists() {
        let cfg = ArenaConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ArenaConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// API credentials. Absent values surface as configuration errors from the
/// operation that needs them, never at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub execution_api_key: Option<String>,
    pub github_token: Option<String>,
    pub deploy_token: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            execution_api_key: env_secret(ENV_EXECUTION_API_KEY),
            github_token: env_secret(ENV_GITHUB_TOKEN),
            deploy_token: env_secret(ENV_DEPLOY_TOKEN),
        }
    }
}

fn env_secret(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
