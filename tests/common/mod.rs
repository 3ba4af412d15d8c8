#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bedrockbench_rs::{ClientFactory, ErrorKind, InvocationClient, InvocationMode, InvocationResult};

/// Counters shared by every client a [`MockFactory`] builds.
#[derive(Default)]
pub struct CallLog {
    pub started: AtomicU64,
    pub completed: AtomicU64,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl CallLog {
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

pub struct MockClient {
    log: Arc<CallLog>,
    latency: Duration,
    fail_with: Option<ErrorKind>,
}

#[async_trait]
impl InvocationClient for MockClient {
    async fn invoke(&self, prompt: &str, mode: InvocationMode) -> InvocationResult {
        let start = Instant::now();
        self.log.started.fetch_add(1, Ordering::SeqCst);
        let now = self.log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.latency).await;

        self.log.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.log.completed.fetch_add(1, Ordering::SeqCst);

        match self.fail_with {
            Some(kind) => InvocationResult::failed(start, kind, "mock failure"),
            None => {
                let ttft = mode.is_streaming().then(|| start.elapsed() / 2);
                InvocationResult::succeeded(start, prompt.len() as u64, 8).with_ttft(ttft)
            }
        }
    }
}

pub struct MockFactory {
    pub log: Arc<CallLog>,
    latency: Duration,
    fail_with: Option<ErrorKind>,
    build_limit: Option<usize>,
    built: AtomicUsize,
}

impl MockFactory {
    pub fn new(latency: Duration) -> Self {
        Self {
            log: Arc::new(CallLog::default()),
            latency,
            fail_with: None,
            build_limit: None,
            built: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, kind: ErrorKind) -> Self {
        self.fail_with = Some(kind);
        self
    }

    /// Client construction fails once `limit` clients exist.
    pub fn with_build_limit(mut self, limit: usize) -> Self {
        self.build_limit = Some(limit);
        self
    }
}

impl ClientFactory for MockFactory {
    fn build(&self) -> Result<Box<dyn InvocationClient>> {
        let built = self.built.fetch_add(1, Ordering::SeqCst);
        if self.build_limit.is_some_and(|limit| built >= limit) {
            return Err(anyhow!("no credentials available"));
        }
        Ok(Box::new(MockClient {
            log: Arc::clone(&self.log),
            latency: self.latency,
            fail_with: self.fail_with,
        }))
    }
}
