use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::{interval_at, sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::ClientFactory;
use crate::config::{BenchmarkConfig, InvocationMode};
use crate::metrics::{ConcurrencyLevelStats, MetricsCollector, Stats};
use crate::worker::WorkerPool;

/// Receives sweep milestones and live snapshots while a benchmark runs.
pub trait ProgressReporter: Send + Sync {
    fn header(&self, _config: &BenchmarkConfig) {}
    fn section(&self, _mode: InvocationMode) {}
    fn level_started(&self, _level: usize, _mode: InvocationMode) {}
    fn progress(&self, _stats: &Stats, _level: usize) {}
    fn level_finished(&self, _stats: &Stats, _level: usize) {}
}

pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Sweeps the concurrency ramp once per enabled mode, streaming first.
pub struct Runner {
    config: BenchmarkConfig,
    prompt: Arc<str>,
    factory: Arc<dyn ClientFactory>,
    reporter: Arc<dyn ProgressReporter>,
}

impl Runner {
    pub fn new(config: BenchmarkConfig, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            prompt: Arc::from(config.prompt.as_str()),
            config,
            factory,
            reporter: Arc::new(SilentReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Runs every level of every enabled mode.
    ///
    /// Cancellation is checked before each level; the levels finished so far
    /// are returned. Any level failing to run aborts the whole benchmark.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Vec<ConcurrencyLevelStats>> {
        self.reporter.header(&self.config);

        let mut results = Vec::new();
        for mode in self.config.modes() {
            if cancel.is_cancelled() {
                warn!(%mode, "benchmark cancelled; skipping sweep");
                break;
            }
            self.reporter.section(mode);
            self.run_sweep(cancel, mode, &mut results)
                .await
                .with_context(|| format!("{} test failed", mode))?;
        }

        Ok(results)
    }

    async fn run_sweep(
        &self,
        cancel: &CancellationToken,
        mode: InvocationMode,
        results: &mut Vec<ConcurrencyLevelStats>,
    ) -> Result<()> {
        for level in self.config.ramp.levels() {
            if cancel.is_cancelled() {
                warn!(%mode, level, "benchmark cancelled; skipping remaining levels");
                return Ok(());
            }

            self.reporter.level_started(level, mode);
            let stats = self
                .run_level(cancel, mode, level)
                .await
                .with_context(|| format!("concurrency level {} failed", level))?;
            self.reporter.level_finished(&stats, level);

            results.push(ConcurrencyLevelStats {
                concurrency: level,
                mode,
                stats,
            });
        }
        Ok(())
    }

    /// One bounded run at a fixed concurrency with a fresh collector.
    pub async fn run_level(
        &self,
        cancel: &CancellationToken,
        mode: InvocationMode,
        level: usize,
    ) -> Result<Stats> {
        info!(%mode, level, window = ?self.config.window, "starting concurrency level");

        let collector = Arc::new(MetricsCollector::new());
        let mut pool = WorkerPool::new(
            Arc::clone(&self.factory),
            Arc::clone(&collector),
            mode,
            Arc::clone(&self.prompt),
            level,
        );

        let window = cancel.child_token();
        pool.start(&window)?;

        let deadline = sleep(self.config.window);
        tokio::pin!(deadline);
        // interval_at panics on a zero period
        let period = self.config.progress_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = window.cancelled() => break,
                _ = ticker.tick() => self.reporter.progress(&collector.snapshot(), level),
            }
        }

        window.cancel();
        pool.stop().await?;
        collector.finalize();

        let stats = collector.snapshot();
        info!(
            %mode,
            level,
            requests = stats.total_requests,
            failures = stats.failure_count,
            rps = stats.requests_per_second,
            "concurrency level finished"
        );
        Ok(stats)
    }
}
