use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use shared::types::ServiceRecord;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub checker: CheckerConfig,
    /// Descriptor the directory serves on its own `/service-info`
    #[serde(default)]
    pub directory: DirectoryConfig,
    /// Services registered before the API starts accepting requests
    #[serde(default)]
    pub services: Vec<ServiceRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckerConfig {
    /// Minimum period between two checking cycles
    #[serde(default = "default_checking_rate")]
    pub checking_rate_ms: u64,
    /// How long an activity state is trusted before it is probed again
    #[serde(default = "default_state_valid_duration")]
    pub state_valid_duration_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Upper bound on in-flight probes within one cycle
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryConfig {
    #[serde(default = "default_directory_id")]
    pub id: String,
    #[serde(default = "default_directory_name")]
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub service_url: String,
}

fn default_listen() -> String {
    "[::]:8080".to_string()
}

fn default_checking_rate() -> u64 {
    10_000
}

fn default_state_valid_duration() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    5_000
}

fn default_max_concurrent_probes() -> usize {
    16
}

fn default_directory_id() -> String {
    "service-directory".to_string()
}

fn default_directory_name() -> String {
    "Service Directory".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            checking_rate_ms: default_checking_rate(),
            state_valid_duration_secs: default_state_valid_duration(),
            probe_timeout_ms: default_probe_timeout(),
            max_concurrent_probes: default_max_concurrent_probes(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            id: default_directory_id(),
            name: default_directory_name(),
            provider: String::new(),
            service_url: String::new(),
        }
    }
}

impl CheckerConfig {
    pub fn checking_rate(&self) -> Duration {
        Duration::from_millis(self.checking_rate_ms)
    }

    pub fn state_valid_duration(&self) -> Duration {
        Duration::from_secs(self.state_valid_duration_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Reject values the checker cannot run with and log every warning
    pub fn validate(&self) -> Result<()> {
        if self.checking_rate_ms == 0 {
            bail!("checker.checking_rate_ms must be greater than zero");
        }
        if self.probe_timeout_ms == 0 {
            bail!("checker.probe_timeout_ms must be greater than zero");
        }
        if self.max_concurrent_probes == 0 {
            bail!("checker.max_concurrent_probes must be greater than zero");
        }

        for warning in self.warnings() {
            tracing::warn!(
                checking_rate_ms = self.checking_rate_ms,
                state_valid_duration_secs = self.state_valid_duration_secs,
                probe_timeout_ms = self.probe_timeout_ms,
                "{}", warning
            );
        }

        Ok(())
    }

    /// Settings the checker runs with, but poorly
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();

        if self.checking_rate() > self.state_valid_duration() {
            warnings.push(
                "checking_rate is longer than state_valid_duration; \
                 stale states may go unchecked for up to twice the valid duration",
            );
        }
        if self.probe_timeout() > self.checking_rate() {
            warnings.push(
                "probe_timeout is longer than checking_rate; \
                 overlapping cycles may probe a service again while its last probe is in flight",
            );
        }

        warnings
    }
}

impl DirectoryConfig {
    /// The directory's own descriptor
    pub fn to_record(&self) -> ServiceRecord {
        ServiceRecord {
            id: self.id.clone(),
            provider: self.provider.clone(),
            name: self.name.clone(),
            service_url: self.service_url.clone(),
            ..Default::default()
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.checker.validate()?;

        for service in &config.services {
            service
                .validate()
                .with_context(|| format!("Invalid preloaded service [{}]", service.id))?;
        }

        Ok(config)
    }
}
