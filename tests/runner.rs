mod common;

use std::sync::Arc;
use std::time::Duration;

use bedrockbench_rs::{
    BenchmarkConfig, ConcurrencyRamp, ErrorKind, InvocationMode, ProgressReporter, Runner, Stats,
};
use common::MockFactory;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingReporter {
    events: Mutex<Vec<String>>,
}

impl RecordingReporter {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl ProgressReporter for RecordingReporter {
    fn header(&self, config: &BenchmarkConfig) {
        self.events
            .lock()
            .push(format!("header {}..{}", config.ramp.start, config.ramp.end));
    }

    fn section(&self, mode: InvocationMode) {
        self.events.lock().push(format!("section {}", mode));
    }

    fn level_started(&self, level: usize, mode: InvocationMode) {
        self.events.lock().push(format!("start {} {}", mode, level));
    }

    fn progress(&self, _stats: &Stats, level: usize) {
        self.events.lock().push(format!("progress {}", level));
    }

    fn level_finished(&self, _stats: &Stats, level: usize) {
        self.events.lock().push(format!("finish {}", level));
    }
}

fn benchmark(start: usize, end: usize, step: usize, window_ms: u64) -> BenchmarkConfig {
    let ramp = ConcurrencyRamp::try_new(start, end, step).unwrap();
    BenchmarkConfig::try_new("hello bedrock", ramp, Duration::from_millis(window_ms))
        .unwrap()
        .with_progress_interval(Duration::from_secs(60))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweeps_streaming_then_non_streaming_in_level_order() {
    let factory = Arc::new(MockFactory::new(Duration::from_millis(5)));
    let reporter = Arc::new(RecordingReporter::default());
    let runner = Runner::new(benchmark(1, 3, 2, 80), factory.clone()).with_reporter(reporter.clone());

    let levels = runner.run(&CancellationToken::new()).await.unwrap();

    let order: Vec<_> = levels.iter().map(|l| (l.mode, l.concurrency)).collect();
    assert_eq!(
        order,
        vec![
            (InvocationMode::Streaming, 1),
            (InvocationMode::Streaming, 3),
            (InvocationMode::NonStreaming, 1),
            (InvocationMode::NonStreaming, 3),
        ]
    );
    for level in &levels {
        assert!(level.stats.total_requests > 0);
        assert_eq!(level.stats.failure_count, 0);
        assert_eq!(level.stats.has_ttft, level.mode.is_streaming());
        assert!(level.stats.duration >= Duration::from_millis(80));
    }
    assert!(factory.log.peak() <= 3);

    assert_eq!(
        reporter.events(),
        vec![
            "header 1..3",
            "section streaming",
            "start streaming 1",
            "finish 1",
            "start streaming 3",
            "finish 3",
            "section non-streaming",
            "start non-streaming 1",
            "finish 1",
            "start non-streaming 3",
            "finish 3",
        ]
    );
}

#[tokio::test]
async fn single_mode_runs_only_that_mode() {
    let factory = Arc::new(MockFactory::new(Duration::from_millis(5)));
    let config = benchmark(2, 2, 1, 50).with_modes(false, true).unwrap();
    let levels = Runner::new(config, factory).run(&CancellationToken::new()).await.unwrap();

    assert_eq!(levels.len(), 1);
    assert_eq!(levels[0].mode, InvocationMode::NonStreaming);
    assert_eq!(levels[0].concurrency, 2);
}

#[tokio::test]
async fn progress_is_reported_while_a_level_runs() {
    let factory = Arc::new(MockFactory::new(Duration::from_millis(5)));
    let reporter = Arc::new(RecordingReporter::default());
    let config = benchmark(1, 1, 1, 130)
        .with_modes(true, false)
        .unwrap()
        .with_progress_interval(Duration::from_millis(50));
    Runner::new(config, factory)
        .with_reporter(reporter.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap();

    let ticks = reporter
        .events()
        .iter()
        .filter(|event| event.as_str() == "progress 1")
        .count();
    assert_eq!(ticks, 2);
}

#[tokio::test]
async fn failures_are_counted_not_fatal() {
    let factory = Arc::new(MockFactory::new(Duration::from_millis(5)).failing(ErrorKind::ThrottlingError));
    let config = benchmark(1, 1, 1, 60).with_modes(true, false).unwrap();
    let levels = Runner::new(config, factory).run(&CancellationToken::new()).await.unwrap();

    let stats = &levels[0].stats;
    assert!(stats.failure_count > 0);
    assert_eq!(stats.success_count, 0);
    assert_eq!(stats.success_rate, 0.0);
    assert_eq!(
        stats.errors_by_kind.get(&ErrorKind::ThrottlingError),
        Some(&stats.failure_count)
    );
    assert!(!stats.has_ttft);
}

#[tokio::test]
async fn cancelled_before_start_returns_no_levels() {
    let factory = Arc::new(MockFactory::new(Duration::from_millis(5)));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let levels = Runner::new(benchmark(1, 5, 1, 50), factory.clone())
        .run(&cancel)
        .await
        .unwrap();
    assert!(levels.is_empty());
    assert_eq!(factory.log.started(), 0);
}

#[tokio::test]
async fn cancellation_keeps_completed_levels() {
    let factory = Arc::new(MockFactory::new(Duration::from_millis(5)));
    let config = benchmark(1, 3, 1, 100).with_modes(true, false).unwrap();
    let runner = Runner::new(config, factory);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let levels = runner.run(&cancel).await.unwrap();
    assert!(!levels.is_empty() && levels.len() < 3);
    assert_eq!(levels[0].concurrency, 1);
}

#[tokio::test]
async fn client_build_failure_aborts_the_run() {
    let factory = Arc::new(MockFactory::new(Duration::from_millis(5)).with_build_limit(1));
    let runner = Runner::new(benchmark(1, 2, 1, 50), factory);

    let err = runner.run(&CancellationToken::new()).await.unwrap_err();
    let chain = format!("{:#}", err);
    assert!(chain.contains("streaming test failed"));
    assert!(chain.contains("concurrency level 2 failed"));
}

#[tokio::test]
async fn cancelled_sweep_prints_no_further_sections() {
    let factory = Arc::new(MockFactory::new(Duration::from_millis(5)));
    let reporter = Arc::new(RecordingReporter::default());
    let runner = Runner::new(benchmark(1, 3, 1, 100), factory).with_reporter(reporter.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let levels = runner.run(&cancel).await.unwrap();
    assert!(levels.iter().all(|level| level.mode == InvocationMode::Streaming));

    let events = reporter.events();
    assert!(events.contains(&"section streaming".to_string()));
    assert!(!events.contains(&"section non-streaming".to_string()));
}
