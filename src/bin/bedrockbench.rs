use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bedrockbench_rs::{BedrockClientConfig, Config, ConsoleReporter, MarkdownReport, Runner};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "bedrockbench",
    about = "Ramp concurrency against an Amazon Bedrock model and report throughput and latency"
)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Bedrock API key; overrides aws.api_key from the config file
    #[arg(long)]
    api_key: Option<String>,

    /// Environment variable holding an API key, read when neither --api-key, aws.api_key
    /// nor an aws.access_key_id/aws.secret_access_key pair is set; the default AWS
    /// credential chain is the last resort
    #[arg(long, default_value = "AWS_BEARER_TOKEN_BEDROCK")]
    api_key_env: String,

    /// Write the Markdown report here instead of output.report_file
    #[arg(long)]
    report_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;

    let api_key = args.api_key.or_else(|| config.aws.api_key.clone());
    let mut client_config = BedrockClientConfig::from_config(&config, api_key)?;
    if !client_config.is_authenticated() {
        client_config = match std::env::var(&args.api_key_env) {
            Ok(api_key) if !api_key.is_empty() => client_config.with_api_key(&api_key)?,
            _ => client_config
                .with_default_credentials()
                .await
                .context("no Bedrock API key or IAM credentials found")?,
        };
    }
    info!(
        sigv4 = client_config.signer.is_some(),
        region = %client_config.region,
        "resolved Bedrock credentials"
    );

    let benchmark = config.benchmark()?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    let reporter = Arc::new(ConsoleReporter::new(&config));
    let runner = Runner::new(benchmark, Arc::new(client_config)).with_reporter(reporter.clone());
    let levels = runner.run(&cancel).await?;

    let report_path = args
        .report_file
        .unwrap_or_else(|| PathBuf::from(&config.output.report_file));
    let report = MarkdownReport::new(&config);
    report.save(&report.render(&levels), &report_path)?;
    reporter.report_saved(&report_path);
    info!(levels = levels.len(), path = %report_path.display(), "benchmark complete");

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn cancel_on_shutdown(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    warn!("shutdown requested; stopping after in-flight requests");
    cancel.cancel();
}
