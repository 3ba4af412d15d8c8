use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{ClientFactory, InvocationClient};
use crate::config::InvocationMode;
use crate::metrics::MetricsCollector;

/// A fixed number of request loops sharing one [`MetricsCollector`].
///
/// Every worker owns its own client and issues one request at a time with no
/// pacing. Stopping only prevents new requests; calls already in flight run to
/// completion and are still ingested before [`WorkerPool::stop`] returns.
pub struct WorkerPool {
    factory: Arc<dyn ClientFactory>,
    collector: Arc<MetricsCollector>,
    mode: InvocationMode,
    prompt: Arc<str>,
    worker_count: usize,
    stop: CancellationToken,
    workers: JoinSet<()>,
}

impl WorkerPool {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        collector: Arc<MetricsCollector>,
        mode: InvocationMode,
        prompt: impl Into<Arc<str>>,
        worker_count: usize,
    ) -> Self {
        Self {
            factory,
            collector,
            mode,
            prompt: prompt.into(),
            worker_count,
            stop: CancellationToken::new(),
            workers: JoinSet::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Spawns the workers. `cancel` is checked between requests only.
    ///
    /// All clients are built before any worker starts, so a construction
    /// failure leaves nothing running.
    pub fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        if !self.workers.is_empty() || self.stop.is_cancelled() {
            return Err(anyhow!("worker pool has already been started"));
        }

        let clients = (0..self.worker_count)
            .map(|worker_id| {
                self.factory
                    .build()
                    .with_context(|| format!("failed to build client for worker {}", worker_id))
            })
            .collect::<Result<Vec<_>>>()?;

        for (worker_id, client) in clients.into_iter().enumerate() {
            let worker = Worker {
                id: worker_id,
                client,
                mode: self.mode,
                prompt: Arc::clone(&self.prompt),
                collector: Arc::clone(&self.collector),
            };
            let stop = self.stop.clone();
            let cancel = cancel.clone();
            self.workers.spawn(async move { worker.run(stop, cancel).await });
        }

        Ok(())
    }

    /// Signals every worker and waits until all of them have exited.
    pub async fn stop(mut self) -> Result<()> {
        self.stop.cancel();

        let mut first_failure = None;
        while let Some(joined) = self.workers.join_next().await {
            if let Err(err) = joined {
                first_failure.get_or_insert(err);
            }
        }

        match first_failure {
            Some(err) => Err(anyhow!("worker task failed: {}", err)),
            None => Ok(()),
        }
    }
}

struct Worker {
    id: usize,
    client: Box<dyn InvocationClient>,
    mode: InvocationMode,
    prompt: Arc<str>,
    collector: Arc<MetricsCollector>,
}

impl Worker {
    async fn run(self, stop: CancellationToken, cancel: CancellationToken) {
        let mut issued = 0u64;
        while !stop.is_cancelled() && !cancel.is_cancelled() {
            let result = self.client.invoke(&self.prompt, self.mode).await;
            self.collector.ingest(result);
            issued += 1;
        }
        debug!(worker = self.id, issued, "worker exited");
    }
}
