mod client;
mod config;
pub mod eventstream;
mod metrics;
mod models;
mod prompt;
mod report;
mod result;
mod runner;
mod signing;
mod worker;

pub use client::{classify_error, BedrockClient, BedrockClientConfig, ClientFactory, InvocationClient, InvokeFailure};
pub use config::{
    AwsConfig, BenchmarkConfig, ConcurrencyConfig, ConcurrencyRamp, Config, ConfigError, InvocationMode,
    ModelConfig, OutputConfig, ServiceTier, TestConfig,
};
pub use metrics::{percentile, ConcurrencyLevelStats, MetricsCollector, Stats, Summary};
pub use models::{GenerationParams, ModelFamily, Usage};
pub use prompt::generate_prompt;
pub use report::{format_stats, progress_line, ConsoleReporter, MarkdownReport};
pub use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
pub use result::{ErrorKind, InvocationResult};
pub use runner::{ProgressReporter, Runner, SilentReporter};
pub use signing::SigV4Signer;
pub use worker::WorkerPool;
