use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;

use crate::config::{BenchmarkConfig, Config, InvocationMode};
use crate::metrics::{ConcurrencyLevelStats, Stats, Summary};
use crate::result::ErrorKind;
use crate::runner::ProgressReporter;

const WIDE_RULE: usize = 80;

/// Live console output driven by the runner.
pub struct ConsoleReporter {
    config: Config,
}

impl ConsoleReporter {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn report_saved(&self, path: &Path) {
        println!();
        println!("{}", "=".repeat(WIDE_RULE));
        println!("Report saved to: {}", path.display());
        println!("{}", "=".repeat(WIDE_RULE));
    }
}

impl ProgressReporter for ConsoleReporter {
    fn header(&self, plan: &BenchmarkConfig) {
        let rule = "=".repeat(WIDE_RULE);
        println!("{}", rule);
        println!("AWS Bedrock Performance Benchmark Tool");
        println!("{}", rule);
        println!("Model: {}", self.config.model.id);
        println!("Region: {}", self.config.aws.region);
        println!("Prompt Size: {} characters", self.config.test.prompt_size);
        println!("Max Tokens: {}", self.config.test.max_tokens);
        println!("Temperature: {:.2}", self.config.test.temperature);
        println!(
            "Concurrency Range: {} -> {} (step: {})",
            plan.ramp.start, plan.ramp.end, plan.ramp.step
        );
        println!("Duration per Level: {:?}", plan.window);
        println!("{}", rule);
        println!();
    }

    fn section(&self, mode: InvocationMode) {
        let title = match mode {
            InvocationMode::Streaming => "Streaming Mode Test",
            InvocationMode::NonStreaming => "Non-Streaming Mode Test",
        };
        println!();
        println!("{}", "-".repeat(WIDE_RULE));
        println!(">>> {}", title);
        println!("{}", "-".repeat(WIDE_RULE));
        println!();
    }

    fn level_started(&self, level: usize, _mode: InvocationMode) {
        println!("\n[Concurrency Level: {}]", level);
        println!("Starting test...");
    }

    fn progress(&self, stats: &Stats, _level: usize) {
        println!("{}", progress_line(stats));
    }

    fn level_finished(&self, stats: &Stats, _level: usize) {
        print!("{}", format_stats(stats));
    }
}

pub fn progress_line(stats: &Stats) -> String {
    format!(
        "  Progress: {} requests | Success: {} | Failures: {} | Req/s: {:.2} | Tokens/s: {:.2}",
        stats.total_requests,
        stats.success_count,
        stats.failure_count,
        stats.requests_per_second,
        stats.token_throughput
    )
}

/// Multi-line results block printed when a level completes.
pub fn format_stats(stats: &Stats) -> String {
    let rule = "─".repeat(WIDE_RULE);
    let mut out = String::new();

    let _ = writeln!(out, "\nResults:");
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "  Total Requests:     {}", stats.total_requests);
    let _ = writeln!(
        out,
        "  Successful:         {} ({:.2}%)",
        stats.success_count, stats.success_rate
    );
    let _ = writeln!(out, "  Failed:             {}", stats.failure_count);
    let _ = writeln!(out, "  Duration:           {:.2?}", stats.duration);

    let _ = writeln!(out, "\n  Throughput:");
    let _ = writeln!(out, "    Requests/sec:     {:.2}", stats.requests_per_second);
    let _ = writeln!(out, "    Tokens/sec:       {:.2}", stats.token_throughput);

    let _ = writeln!(out, "\n  Token Usage:");
    let _ = writeln!(out, "    Input Tokens:     {}", stats.total_input_tokens);
    let _ = writeln!(out, "    Output Tokens:    {}", stats.total_output_tokens);
    let _ = writeln!(out, "    Total Tokens:     {}", stats.total_tokens);

    if stats.success_count > 0 {
        let _ = writeln!(out, "\n  Latency (ms):");
        write_summary(&mut out, &stats.latency);
    }
    if stats.has_ttft {
        let _ = writeln!(out, "\n  Time to First Token (ms):");
        write_summary(&mut out, &stats.ttft);
    }
    if !stats.errors_by_kind.is_empty() {
        let _ = writeln!(out, "\n  Error Distribution:");
        for (kind, count) in &stats.errors_by_kind {
            let _ = writeln!(out, "    {}: {}", kind, count);
        }
    }

    let _ = writeln!(out, "{}", rule);
    out
}

fn write_summary(out: &mut String, summary: &Summary) {
    let _ = writeln!(out, "    Average:          {:.2}", summary.avg);
    let _ = writeln!(out, "    Min:              {:.2}", summary.min);
    let _ = writeln!(out, "    Max:              {:.2}", summary.max);
    let _ = writeln!(out, "    P50:              {:.2}", summary.p50);
    let _ = writeln!(out, "    P95:              {:.2}", summary.p95);
    let _ = writeln!(out, "    P99:              {:.2}", summary.p99);
}

/// Markdown report over every level of a finished benchmark.
pub struct MarkdownReport<'a> {
    config: &'a Config,
}

impl<'a> MarkdownReport<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn render(&self, levels: &[ConcurrencyLevelStats]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# AWS Bedrock Performance Benchmark Report\n");
        let _ = writeln!(
            out,
            "Generated: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );

        self.write_configuration(&mut out);
        write_overall_summary(&mut out, levels);
        write_detailed_results(&mut out, levels);
        write_distribution(
            &mut out,
            "## Latency Analysis\n\n### Latency Distribution by Concurrency Level",
            levels.iter().filter(|level| level.stats.success_count > 0),
            |stats| &stats.latency,
        );
        if levels.iter().any(|level| level.stats.has_ttft) {
            write_distribution(
                &mut out,
                "## Time to First Token (TTFT) Analysis\n\n### TTFT Distribution by Concurrency Level (Streaming Mode)",
                levels.iter().filter(|level| level.stats.has_ttft),
                |stats| &stats.ttft,
            );
        }
        write_error_analysis(&mut out, levels);
        out
    }

    pub fn save(&self, content: &str, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, content)
            .with_context(|| format!("failed to write report {}", path.display()))
    }

    fn write_configuration(&self, out: &mut String) {
        let c = self.config;
        let _ = writeln!(out, "## Test Configuration\n");
        let _ = writeln!(out, "| Parameter | Value |");
        let _ = writeln!(out, "|-----------|-------|");
        let _ = writeln!(out, "| Model | {} |", c.model.id);
        let _ = writeln!(out, "| Region | {} |", c.aws.region);
        let _ = writeln!(out, "| Quota | {} |", c.model.quota);
        let _ = writeln!(out, "| Prompt Size | {} characters |", c.test.prompt_size);
        let _ = writeln!(out, "| Max Tokens | {} |", c.test.max_tokens);
        let _ = writeln!(out, "| Temperature | {:.2} |", c.test.temperature);
        let _ = writeln!(out, "| Service Tier | {} |", c.test.service_tier.as_str());
        let _ = writeln!(out, "| Streaming Enabled | {} |", c.test.streaming);
        let _ = writeln!(out, "| Non-Streaming Enabled | {} |", c.test.non_streaming);
        let _ = writeln!(
            out,
            "| Concurrency Range | {} - {} (step: {}) |",
            c.concurrency.start, c.concurrency.end, c.concurrency.step
        );
        let _ = writeln!(
            out,
            "| Duration per Level | {} seconds |\n",
            c.concurrency.duration_seconds
        );
    }
}

fn mode_label(mode: InvocationMode) -> &'static str {
    match mode {
        InvocationMode::Streaming => "Streaming",
        InvocationMode::NonStreaming => "Non-Streaming",
    }
}

fn write_overall_summary(out: &mut String, levels: &[ConcurrencyLevelStats]) {
    let total_requests: u64 = levels.iter().map(|l| l.stats.total_requests).sum();
    let total_success: u64 = levels.iter().map(|l| l.stats.success_count).sum();
    let total_failures: u64 = levels.iter().map(|l| l.stats.failure_count).sum();
    let total_tokens: u64 = levels.iter().map(|l| l.stats.total_tokens).sum();
    let success_rate = if total_requests > 0 {
        total_success as f64 / total_requests as f64 * 100.0
    } else {
        0.0
    };

    let _ = writeln!(out, "## Overall Summary\n");
    let _ = writeln!(out, "| Metric | Value |");
    let _ = writeln!(out, "|--------|-------|");
    let _ = writeln!(out, "| Total Requests | {} |", total_requests);
    let _ = writeln!(
        out,
        "| Successful Requests | {} ({:.2}%) |",
        total_success, success_rate
    );
    let _ = writeln!(out, "| Failed Requests | {} |", total_failures);
    let _ = writeln!(out, "| Total Tokens Processed | {} |\n", total_tokens);
}

fn write_detailed_results(out: &mut String, levels: &[ConcurrencyLevelStats]) {
    let _ = writeln!(out, "## Detailed Results by Concurrency Level\n");
    let _ = writeln!(out, "| Mode | Concurrency | Requests | Success Rate | Req/s | Tokens/s | Avg Latency (ms) | P50 (ms) | P95 (ms) | P99 (ms) |");
    let _ = writeln!(out, "|------|-------------|----------|--------------|-------|----------|------------------|----------|----------|----------|");
    for level in levels {
        let s = &level.stats;
        let _ = writeln!(
            out,
            "| {} | {} | {} | {:.2}% | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} |",
            mode_label(level.mode),
            level.concurrency,
            s.total_requests,
            s.success_rate,
            s.requests_per_second,
            s.token_throughput,
            s.latency.avg,
            s.latency.p50,
            s.latency.p95,
            s.latency.p99,
        );
    }
    out.push('\n');
}

fn write_distribution<'s>(
    out: &mut String,
    heading: &str,
    levels: impl Iterator<Item = &'s ConcurrencyLevelStats>,
    pick: impl Fn(&Stats) -> &Summary,
) {
    let _ = writeln!(out, "{}\n", heading);
    let _ = writeln!(out, "| Mode | Concurrency | Min (ms) | Avg (ms) | Max (ms) | P50 (ms) | P95 (ms) | P99 (ms) |");
    let _ = writeln!(out, "|------|-------------|----------|----------|----------|----------|----------|----------|");
    for level in levels {
        let s = pick(&level.stats);
        let _ = writeln!(
            out,
            "| {} | {} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} |",
            mode_label(level.mode),
            level.concurrency,
            s.min,
            s.avg,
            s.max,
            s.p50,
            s.p95,
            s.p99,
        );
    }
    out.push('\n');
}

fn write_error_analysis(out: &mut String, levels: &[ConcurrencyLevelStats]) {
    let mut all_errors: BTreeMap<ErrorKind, u64> = BTreeMap::new();
    for level in levels {
        for (kind, count) in &level.stats.errors_by_kind {
            *all_errors.entry(*kind).or_insert(0) += count;
        }
    }

    let _ = writeln!(out, "## Error Analysis\n");
    if all_errors.is_empty() {
        let _ = writeln!(out, "No errors occurred during the test. ✓\n");
        return;
    }

    let _ = writeln!(out, "### Error Distribution\n");
    let _ = writeln!(out, "| Error Type | Count |");
    let _ = writeln!(out, "|------------|-------|");
    for (kind, count) in &all_errors {
        let _ = writeln!(out, "| {} | {} |", kind, count);
    }
    out.push('\n');

    let _ = writeln!(out, "### Errors by Concurrency Level\n");
    let _ = writeln!(out, "| Mode | Concurrency | Total Errors | Error Types |");
    let _ = writeln!(out, "|------|-------------|--------------|-------------|");
    for level in levels.iter().filter(|level| level.stats.failure_count > 0) {
        let kinds = level
            .stats
            .errors_by_kind
            .iter()
            .map(|(kind, count)| format!("{}({})", kind, count))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            mode_label(level.mode),
            level.concurrency,
            level.stats.failure_count,
            kinds
        );
    }
    out.push('\n');
}
