use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::prompt::generate_prompt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum InvocationMode {
    Streaming,
    NonStreaming,
}

impl InvocationMode {
    pub fn is_streaming(self) -> bool {
        matches!(self, InvocationMode::Streaming)
    }
}

impl fmt::Display for InvocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationMode::Streaming => f.write_str("streaming"),
            InvocationMode::NonStreaming => f.write_str("non-streaming"),
        }
    }
}

/// Concurrency levels visited by one sweep: `start, start + step, ...` up to `end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConcurrencyRamp {
    pub start: usize,
    pub end: usize,
    pub step: usize,
}

impl ConcurrencyRamp {
    pub fn try_new(start: usize, end: usize, step: usize) -> Result<Self> {
        if start == 0 {
            return Err(anyhow!("concurrency start must be greater than zero"));
        }
        if end < start {
            return Err(anyhow!(
                "concurrency end ({}) must be >= start ({})",
                end,
                start
            ));
        }
        if step == 0 {
            return Err(anyhow!("concurrency step must be greater than zero"));
        }
        Ok(Self { start, end, step })
    }

    pub fn levels(&self) -> impl Iterator<Item = usize> {
        (self.start..=self.end).step_by(self.step)
    }
}

/// Runtime plan for one benchmark invocation.
#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    pub prompt: String,
    pub ramp: ConcurrencyRamp,
    /// How long each level keeps starting new requests.
    pub window: Duration,
    pub streaming: bool,
    pub non_streaming: bool,
    pub progress_interval: Duration,
}

impl BenchmarkConfig {
    pub fn try_new(prompt: impl Into<String>, ramp: ConcurrencyRamp, window: Duration) -> Result<Self> {
        if window.is_zero() {
            return Err(anyhow!("run window must be greater than zero"));
        }

        Ok(Self {
            prompt: prompt.into(),
            ramp,
            window,
            streaming: true,
            non_streaming: true,
            progress_interval: Duration::from_secs(5),
        })
    }

    pub fn with_modes(mut self, streaming: bool, non_streaming: bool) -> Result<Self> {
        if !streaming && !non_streaming {
            return Err(anyhow!(
                "at least one of streaming or non_streaming must be enabled"
            ));
        }
        self.streaming = streaming;
        self.non_streaming = non_streaming;
        Ok(self)
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.progress_interval = interval;
        }
        self
    }

    /// Enabled modes, streaming first.
    pub fn modes(&self) -> Vec<InvocationMode> {
        let mut modes = Vec::with_capacity(2);
        if self.streaming {
            modes.push(InvocationMode::Streaming);
        }
        if self.non_streaming {
            modes.push(InvocationMode::NonStreaming);
        }
        modes
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTier {
    #[default]
    Default,
    Priority,
    Flex,
}

impl ServiceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceTier::Default => "default",
            ServiceTier::Priority => "priority",
            ServiceTier::Flex => "flex",
        }
    }
}

/// The JSON configuration file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub aws: AwsConfig,
    pub model: ModelConfig,
    pub test: TestConfig,
    pub concurrency: ConcurrencyConfig,
    pub output: OutputConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AwsConfig {
    #[serde(default)]
    pub region: String,
    /// Bedrock API key; falls back to the environment when absent.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Static IAM key pair used for SigV4 signing.
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub secret_access_key: Option<String>,
    #[serde(default, skip_serializing)]
    pub session_token: Option<String>,
    /// Overrides `https://bedrock-runtime.{region}.amazonaws.com`.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl AwsConfig {
    /// Both halves of the static key pair, when both are non-empty.
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        let access_key_id = self.access_key_id.as_deref().filter(|key| !key.is_empty())?;
        let secret_access_key = self.secret_access_key.as_deref().filter(|key| !key.is_empty())?;
        Some((access_key_id, secret_access_key))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub quota: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TestConfig {
    #[serde(default)]
    pub prompt_size: usize,
    #[serde(default)]
    pub prompt_template: String,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub non_streaming: bool,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default, deserialize_with = "service_tier_or_default")]
    pub service_tier: ServiceTier,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConcurrencyConfig {
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub end: usize,
    #[serde(default)]
    pub step: usize,
    #[serde(default)]
    pub duration_seconds: u64,
    #[serde(default = "default_progress_interval")]
    pub progress_interval_seconds: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub report_file: String,
}

fn default_request_timeout() -> u64 {
    600
}

fn default_progress_interval() -> u64 {
    5
}

// An empty string means the default tier.
fn service_tier_or_default<'de, D>(deserializer: D) -> std::result::Result<ServiceTier, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.as_str() {
        "" | "default" => Ok(ServiceTier::Default),
        "priority" => Ok(ServiceTier::Priority),
        "flex" => Ok(ServiceTier::Flex),
        other => Err(serde::de::Error::custom(format!(
            "unknown test.service_tier `{}` (expected default, priority or flex)",
            other
        ))),
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> std::result::Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.aws.region.is_empty() {
            return invalid("aws.region is required");
        }
        let has_key = |key: &Option<String>| key.as_deref().is_some_and(|key| !key.is_empty());
        if has_key(&self.aws.access_key_id) != has_key(&self.aws.secret_access_key) {
            return invalid("aws.access_key_id and aws.secret_access_key must be set together");
        }
        if self.model.id.is_empty() {
            return invalid("model.id is required");
        }
        if self.model.quota == 0 {
            return invalid("model.quota must be positive");
        }
        if self.test.prompt_size == 0 {
            return invalid("test.prompt_size must be positive");
        }
        if !self.test.streaming && !self.test.non_streaming {
            return invalid("at least one of streaming or non_streaming must be enabled");
        }
        if self.test.max_tokens == 0 {
            return invalid("test.max_tokens must be positive");
        }
        if self.concurrency.start == 0 {
            return invalid("concurrency.start must be positive");
        }
        if self.concurrency.end < self.concurrency.start {
            return invalid("concurrency.end must be >= concurrency.start");
        }
        if self.concurrency.step == 0 {
            return invalid("concurrency.step must be positive");
        }
        if self.concurrency.duration_seconds == 0 {
            return invalid("concurrency.duration_seconds must be positive");
        }
        if self.output.report_file.is_empty() {
            return invalid("output.report_file is required");
        }
        Ok(())
    }

    pub fn benchmark(&self) -> Result<BenchmarkConfig> {
        let ramp = ConcurrencyRamp::try_new(
            self.concurrency.start,
            self.concurrency.end,
            self.concurrency.step,
        )?;
        let prompt = generate_prompt(&self.test.prompt_template, self.test.prompt_size);

        Ok(BenchmarkConfig::try_new(
            prompt,
            ramp,
            Duration::from_secs(self.concurrency.duration_seconds),
        )?
        .with_modes(self.test.streaming, self.test.non_streaming)?
        .with_progress_interval(Duration::from_secs(self.concurrency.progress_interval_seconds)))
    }
}
