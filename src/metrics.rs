//! Metrics collected during a run.
//!
//! Each completed tick produces one [`MetricSample`]. Samples are appended, in tick
//! order, to a [`SampleSeries`] that any number of subscribers can follow while the run
//! is in progress. Separately, every individual request latency is kept for the whole
//! run so that the [`RunSummary`] percentiles are computed over all requests, not over
//! per-tick aggregates.
//!
//! Percentiles are deliberately simple: sort the latencies ascending and take the value
//! at index `floor(count * pct)`. An empty list has every statistic at 0.

use chrono::prelude::*;
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::client::RequestOutcome;
use crate::util;
use crate::RunState;

/// Longest error message shown in the summary table.
const ERROR_WIDTH: usize = 50;

/// Returns the value at index `floor(len * pct)` of an ascending-sorted slice, or 0.
///
/// # Example
/// ```rust
/// use gosling::metrics::percentile;
///
/// let latencies: Vec<f64> = (1..=100).map(|l| l as f64).collect();
/// assert_eq!(percentile(&latencies, 0.95), 96.0);
/// assert_eq!(percentile(&latencies, 0.99), 100.0);
/// assert_eq!(percentile(&[], 0.95), 0.0);
/// ```
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64 * pct).floor() as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Returns the mean of all values, or 0 for an empty slice.
pub fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Latency statistics over one list of latencies.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct LatencyStats {
    pub(crate) average: f64,
    pub(crate) min: f64,
    pub(crate) max: f64,
    pub(crate) p95: f64,
    pub(crate) p99: f64,
}
impl LatencyStats {
    pub(crate) fn from_latencies(latencies: &[f64]) -> Self {
        if latencies.is_empty() {
            return LatencyStats::default();
        }
        let mut sorted = latencies.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let (min, max) = (sorted[0], sorted[sorted.len() - 1]);
        LatencyStats {
            // Rounding can push the mean of equal values one ulp past them.
            average: average(&sorted).max(min).min(max),
            min,
            max,
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        }
    }
}

/// Metrics for one completed tick. Latencies are in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// 1-based tick index.
    pub tick: usize,
    /// When the tick's fan-out joined.
    pub timestamp: DateTime<Utc>,
    /// Average latency of this tick's requests.
    pub average_latency: f64,
    /// 95th percentile latency of this tick's requests.
    pub p95_latency: f64,
    /// 99th percentile latency of this tick's requests.
    pub p99_latency: f64,
    /// Requests so far divided by ticks so far.
    pub requests_per_second: f64,
    /// Errors so far as a percentage of requests so far.
    pub error_rate: f64,
    /// Virtual users active during this tick.
    pub active_users: usize,
    /// Requests issued during this tick.
    pub requests: usize,
    /// Transport failures during this tick.
    pub errors: usize,
}
impl fmt::Display for MetricSample {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "tick {:>4} | users {:>5} | avg {:>9.2} ms | p95 {:>9.2} ms | p99 {:>9.2} ms | {:>9.2} rps | {:>6.2}% errors",
            self.tick,
            self.active_users,
            self.average_latency,
            self.p95_latency,
            self.p99_latency,
            self.requests_per_second,
            self.error_rate,
        )
    }
}

/// The final summary of a run, produced once when the run completes or is canceled.
///
/// `success_count + error_count == total_requests` always holds, and when any request
/// was made `min_latency <= average_latency <= max_latency`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// `Completed` or `Cancelled`.
    pub state: RunState,
    /// Number of ticks that produced a sample.
    pub ticks: usize,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub total_requests: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub average_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    /// Total requests divided by the configured duration.
    pub requests_per_second: f64,
    /// How many responses were received per status code.
    pub status_codes: BTreeMap<u16, usize>,
    /// How many times each distinct transport failure happened.
    pub errors: BTreeMap<String, usize>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            " === SUMMARY ({}, {} ticks) ===",
            self.state,
            self.ticks.to_formatted_string(&Locale::en)
        )?;
        writeln!(
            f,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            f,
            " {:<14} | {:>12} | {:>12} | {:>12} | {:>10}",
            "Requests", "# total", "# success", "# errors", "req/s"
        )?;
        writeln!(
            f,
            " {:<14} | {:>12} | {:>12} | {:>12} | {:>10.2}",
            "",
            self.total_requests.to_formatted_string(&Locale::en),
            self.success_count.to_formatted_string(&Locale::en),
            self.error_count.to_formatted_string(&Locale::en),
            self.requests_per_second,
        )?;
        writeln!(
            f,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            f,
            " {:<14} | {:>10} | {:>10} | {:>10} | {:>10} | {:>10}",
            "Latency (ms)", "average", "min", "max", "p95", "p99"
        )?;
        writeln!(
            f,
            " {:<14} | {:>10.2} | {:>10.2} | {:>10.2} | {:>10.2} | {:>10.2}",
            "",
            self.average_latency,
            self.min_latency,
            self.max_latency,
            self.p95_latency,
            self.p99_latency,
        )?;
        if !self.status_codes.is_empty() {
            writeln!(
            f,
            " ------------------------------------------------------------------------------"
        )?;
            let codes: Vec<String> = self
                .status_codes
                .iter()
                .map(|(code, count)| {
                    format!("{} [{}]", count.to_formatted_string(&Locale::en), code)
                })
                .collect();
            writeln!(f, " {:<14} | {}", "Status codes", codes.join(", "))?;
        }
        if !self.errors.is_empty() {
            writeln!(
            f,
            " ------------------------------------------------------------------------------"
        )?;
            for (error, count) in &self.errors {
                writeln!(
                    f,
                    " {:<14} | {:>8} | {}",
                    "Errors",
                    count.to_formatted_string(&Locale::en),
                    util::truncate_string(error, ERROR_WIDTH)
                )?;
            }
        }
        write!(f, " ------------------------------------------------------------------------------")
    }
}

/// Accumulates every request of a run, tick by tick.
#[derive(Debug)]
pub(crate) struct Aggregator {
    started: DateTime<Utc>,
    latencies: Vec<f64>,
    total_requests: usize,
    total_errors: usize,
    ticks_completed: usize,
    duration: usize,
    status_codes: BTreeMap<u16, usize>,
    errors: BTreeMap<String, usize>,
}

impl Aggregator {
    /// `duration` is the configured number of ticks, the summary rps denominator.
    pub(crate) fn new(duration: usize) -> Self {
        Aggregator {
            started: Utc::now(),
            latencies: Vec::new(),
            total_requests: 0,
            total_errors: 0,
            ticks_completed: 0,
            duration: duration.max(1),
            status_codes: BTreeMap::new(),
            errors: BTreeMap::new(),
        }
    }

    // Fold outcomes into the run history, returning this batch's latencies and errors.
    fn record(&mut self, outcomes: &[RequestOutcome]) -> (Vec<f64>, usize) {
        let mut latencies = Vec::with_capacity(outcomes.len());
        let mut errors = 0;
        for outcome in outcomes {
            latencies.push(outcome.latency_ms);
            if let Some(status_code) = outcome.status_code {
                *self.status_codes.entry(status_code).or_insert(0) += 1;
            }
            if let Some(failure) = &outcome.failure {
                errors += 1;
                *self.errors.entry(failure.detail.clone()).or_insert(0) += 1;
            }
        }
        self.latencies.extend_from_slice(&latencies);
        self.total_requests += outcomes.len();
        self.total_errors += errors;
        (latencies, errors)
    }

    /// Record a fully joined tick and build its sample.
    pub(crate) fn complete_tick(
        &mut self,
        active_users: usize,
        outcomes: &[RequestOutcome],
    ) -> MetricSample {
        let (latencies, errors) = self.record(outcomes);
        self.ticks_completed += 1;
        let stats = LatencyStats::from_latencies(&latencies);
        MetricSample {
            tick: self.ticks_completed,
            timestamp: Utc::now(),
            average_latency: stats.average,
            p95_latency: stats.p95,
            p99_latency: stats.p99,
            requests_per_second: self.total_requests as f64 / self.ticks_completed as f64,
            error_rate: error_rate(self.total_errors, self.total_requests),
            active_users,
            requests: outcomes.len(),
            errors,
        }
    }

    /// Record requests from a tick that was interrupted by cancellation. They count
    /// towards the summary but no sample is produced.
    pub(crate) fn record_partial_tick(&mut self, outcomes: &[RequestOutcome]) {
        self.record(outcomes);
    }

    pub(crate) fn summarize(&self, state: RunState) -> RunSummary {
        let stats = LatencyStats::from_latencies(&self.latencies);
        RunSummary {
            state,
            ticks: self.ticks_completed,
            started: self.started,
            finished: Utc::now(),
            total_requests: self.total_requests,
            success_count: self.total_requests - self.total_errors,
            error_count: self.total_errors,
            average_latency: stats.average,
            min_latency: stats.min,
            max_latency: stats.max,
            p95_latency: stats.p95,
            p99_latency: stats.p99,
            // Over the configured duration, also when canceled early.
            requests_per_second: self.total_requests as f64 / self.duration as f64,
            status_codes: self.status_codes.clone(),
            errors: self.errors.clone(),
        }
    }
}

fn error_rate(errors: usize, requests: usize) -> f64 {
    if requests == 0 {
        0.0
    } else {
        errors as f64 / requests as f64 * 100.0
    }
}

#[derive(Debug, Default)]
struct SeriesInner {
    samples: Vec<MetricSample>,
    subscribers: Vec<flume::Sender<MetricSample>>,
    closed: bool,
}

/// The live, append-only time series of a run.
///
/// Only the run task appends. Readers either take a snapshot or subscribe; a
/// subscription first replays every sample already published, then receives new ones
/// as they are appended, and ends when the series is closed.
#[derive(Debug, Default)]
pub(crate) struct SampleSeries {
    inner: Mutex<SeriesInner>,
}

impl SampleSeries {
    pub(crate) fn new() -> Self {
        SampleSeries::default()
    }

    // A panic while holding the lock can't leave the series half-written, so a
    // poisoned lock is still safe to read.
    fn lock(&self) -> MutexGuard<'_, SeriesInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn publish(&self, sample: MetricSample) {
        let mut inner = self.lock();
        if inner.closed {
            warn!("dropping sample for tick {}, series is closed", sample.tick);
            return;
        }
        // Forget subscribers that hung up.
        inner
            .subscribers
            .retain(|subscriber| subscriber.send(sample.clone()).is_ok());
        inner.samples.push(sample);
    }

    pub(crate) fn subscribe(&self) -> flume::Receiver<MetricSample> {
        let mut inner = self.lock();
        let (tx, rx) = flume::unbounded();
        for sample in &inner.samples {
            // The receiver is held right here, sending can't fail.
            let _ = tx.send(sample.clone());
        }
        if !inner.closed {
            inner.subscribers.push(tx);
        }
        rx
    }

    pub(crate) fn snapshot(&self) -> Vec<MetricSample> {
        self.lock().samples.clone()
    }

    /// Stop accepting samples and end every subscription.
    pub(crate) fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn successes(latencies: &[f64]) -> Vec<RequestOutcome> {
        latencies
            .iter()
            .map(|latency| RequestOutcome::success(*latency, 200))
            .collect()
    }

    #[test]
    fn percentiles() {
        assert_eq!(percentile(&[], 0.95), 0.0);
        assert_eq!(percentile(&[7.0], 0.95), 7.0);
        assert_eq!(percentile(&[7.0], 0.99), 7.0);
        // 10 values: index 9 for both.
        let sorted: Vec<f64> = (1..=10).map(|l| l as f64).collect();
        assert_eq!(percentile(&sorted, 0.95), 10.0);
        assert_eq!(percentile(&sorted, 0.99), 10.0);
        // 20 values: index 19 and 19.
        let sorted: Vec<f64> = (1..=20).map(|l| l as f64).collect();
        assert_eq!(percentile(&sorted, 0.95), 20.0);
        // 200 values: index 190 and 198.
        let sorted: Vec<f64> = (1..=200).map(|l| l as f64).collect();
        assert_eq!(percentile(&sorted, 0.95), 191.0);
        assert_eq!(percentile(&sorted, 0.99), 199.0);
    }

    #[test]
    fn empty_statistics() {
        let stats = LatencyStats::from_latencies(&[]);
        assert_eq!(stats, LatencyStats::default());
        assert_eq!(average(&[]), 0.0);

        let summary = Aggregator::new(5).summarize(RunState::Cancelled);
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.average_latency, 0.0);
        assert_eq!(summary.p95_latency, 0.0);
        assert_eq!(summary.p99_latency, 0.0);
        assert_eq!(summary.requests_per_second, 0.0);
    }

    #[test]
    fn unsorted_latencies() {
        let stats = LatencyStats::from_latencies(&[30.0, 10.0, 20.0]);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.average, 20.0);
        assert_eq!(stats.p95, 30.0);
    }

    #[test]
    fn cumulative_samples() {
        let mut aggregator = Aggregator::new(2);

        let sample = aggregator.complete_tick(2, &successes(&[10.0, 30.0]));
        assert_eq!(sample.tick, 1);
        assert_eq!(sample.active_users, 2);
        assert_eq!(sample.average_latency, 20.0);
        assert_eq!(sample.requests_per_second, 2.0);
        assert_eq!(sample.error_rate, 0.0);

        let outcomes = vec![
            RequestOutcome::success(40.0, 500),
            RequestOutcome::failure(5.0, "connect error"),
            RequestOutcome::failure(5.0, "connect error"),
            RequestOutcome::success(50.0, 200),
        ];
        let sample = aggregator.complete_tick(4, &outcomes);
        assert_eq!(sample.tick, 2);
        assert_eq!(sample.requests, 4);
        assert_eq!(sample.errors, 2);
        // 6 requests over 2 ticks.
        assert_eq!(sample.requests_per_second, 3.0);
        // 2 errors out of 6 requests.
        assert!((sample.error_rate - 100.0 / 3.0).abs() < 1e-9);

        let summary = aggregator.summarize(RunState::Completed);
        assert_eq!(summary.total_requests, 6);
        assert_eq!(summary.success_count, 4);
        assert_eq!(summary.error_count, 2);
        assert_eq!(summary.min_latency, 5.0);
        assert_eq!(summary.max_latency, 50.0);
        assert_eq!(summary.requests_per_second, 3.0);
        assert_eq!(summary.status_codes.get(&200), Some(&3));
        assert_eq!(summary.status_codes.get(&500), Some(&1));
        assert_eq!(summary.errors.get("connect error"), Some(&2));
    }

    #[test]
    fn partial_tick_counts_without_sample() {
        let mut aggregator = Aggregator::new(10);
        aggregator.complete_tick(1, &successes(&[10.0]));
        aggregator.record_partial_tick(&successes(&[20.0, 30.0, 40.0]));

        let summary = aggregator.summarize(RunState::Cancelled);
        assert_eq!(summary.ticks, 1);
        assert_eq!(summary.total_requests, 4);
        // Canceled runs still divide by the configured 10 seconds.
        assert_eq!(summary.requests_per_second, 0.4);
        assert_eq!(summary.success_count + summary.error_count, summary.total_requests);
    }

    fn sample(tick: usize) -> MetricSample {
        MetricSample {
            tick,
            timestamp: Utc::now(),
            average_latency: 0.0,
            p95_latency: 0.0,
            p99_latency: 0.0,
            requests_per_second: 0.0,
            error_rate: 0.0,
            active_users: 1,
            requests: 0,
            errors: 0,
        }
    }

    #[test]
    fn series_replays_then_streams() {
        let series = SampleSeries::new();
        series.publish(sample(1));
        series.publish(sample(2));

        let early = series.subscribe();
        series.publish(sample(3));
        let late = series.subscribe();
        series.close();

        let early_ticks: Vec<usize> = early.drain().map(|s| s.tick).collect();
        let late_ticks: Vec<usize> = late.drain().map(|s| s.tick).collect();
        assert_eq!(early_ticks, vec![1, 2, 3]);
        assert_eq!(late_ticks, vec![1, 2, 3]);
        // Closed series end every subscription.
        assert!(early.recv().is_err());

        // Subscribing after close still replays everything, then ends.
        let after = series.subscribe();
        assert_eq!(after.iter().count(), 3);

        // Nothing is appended once closed.
        series.publish(sample(4));
        assert_eq!(series.snapshot().len(), 3);
    }

    #[test]
    fn summary_display() {
        let mut aggregator = Aggregator::new(1);
        let long_error = format!("connect error: {}", "x".repeat(80));
        let mut outcomes = successes(&[1_000.0; 3]);
        outcomes.push(RequestOutcome::failure(1.0, "timeout error"));
        outcomes.push(RequestOutcome::failure(1.0, &long_error));
        aggregator.complete_tick(5, &outcomes);
        let summary = aggregator.summarize(RunState::Completed);
        let output = summary.to_string();
        assert!(output.contains("SUMMARY (completed, 1 ticks)"));
        assert!(output.contains("3 [200]"));
        assert!(output.contains("timeout error"));
        // Long errors are shortened in the table but kept whole in the summary.
        assert!(!output.contains(&long_error));
        assert!(output.contains(&util::truncate_string(&long_error, ERROR_WIDTH)));
        assert!(summary.errors.contains_key(&long_error));
    }

    #[test]
    fn average_stays_within_bounds() {
        // 0.1 isn't exactly representable, so the plain mean can land past the max.
        let stats = LatencyStats::from_latencies(&[0.1, 0.1, 0.1]);
        assert!(stats.min <= stats.average);
        assert!(stats.average <= stats.max);
        assert_eq!(stats.average, 0.1);

        let mut aggregator = Aggregator::new(1);
        let sample = aggregator.complete_tick(3, &successes(&[0.1, 0.1, 0.1]));
        assert!(sample.average_latency <= 0.1);
        let summary = aggregator.summarize(RunState::Completed);
        assert!(summary.min_latency <= summary.average_latency);
        assert!(summary.average_latency <= summary.max_latency);
    }
}
