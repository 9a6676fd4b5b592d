//! Collects per-submission events on a channel and aggregates them into
//! request counts, latency percentiles, and failure categories.

use chrono::{DateTime, Utc};
use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use log::*;
use std::collections::BTreeMap;
use std::thread::{self, Builder, JoinHandle};
use std::time::Duration;

pub const REQUEST_TYPE_SOLANA: &str = "solana";
pub const SEND_EVENT_NAME: &str = "send_neon";

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// One submission attempt, successful or not.
#[derive(Debug, Clone)]
pub struct SubmitEvent {
    pub request_type: &'static str,
    pub name: &'static str,
    pub start_time: DateTime<Utc>,
    pub response_time: Duration,
    /// Size of the submitted payload in bytes.
    pub response_length: usize,
    /// Free-form context, e.g. the sender address.
    pub context: Option<String>,
    /// The returned signature, when the submission was accepted.
    pub response: Option<String>,
    pub exception: Option<Failure>,
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub category: String,
    pub message: String,
}

/// Cloneable sink the workers fire events into.
#[derive(Clone)]
pub struct EventSink {
    sender: Sender<SubmitEvent>,
}

impl EventSink {
    pub fn fire(&self, event: SubmitEvent) {
        // a dropped reporter only loses metrics, never blocks a worker
        let _ = self.sender.send(event);
    }
}

#[derive(Debug, Default, Clone)]
pub struct RequestStats {
    pub count: u64,
    pub failures: u64,
    pub bytes: u64,
    pub failure_categories: BTreeMap<String, u64>,
    latencies_us: Vec<u64>,
}

impl RequestStats {
    fn record(&mut self, event: &SubmitEvent) {
        self.count += 1;
        self.bytes += event.response_length as u64;
        self.latencies_us.push(event.response_time.as_micros() as u64);
        if let Some(failure) = &event.exception {
            self.failures += 1;
            *self
                .failure_categories
                .entry(failure.category.clone())
                .or_default() += 1;
        }
    }

    pub fn successes(&self) -> u64 {
        self.count - self.failures
    }

    /// Latency percentile in microseconds over all recorded events.
    pub fn percentile_us(&self, pct: f64) -> u64 {
        if self.latencies_us.is_empty() {
            return 0;
        }
        let mut sorted = self.latencies_us.clone();
        sorted.sort_unstable();
        let rank = (pct / 100.0 * (sorted.len() - 1) as f64).round() as usize;
        sorted[rank.min(sorted.len() - 1)]
    }

    pub fn max_us(&self) -> u64 {
        self.latencies_us.iter().copied().max().unwrap_or(0)
    }
}

#[derive(Debug, Default, Clone)]
pub struct Summary {
    pub requests: BTreeMap<&'static str, RequestStats>,
}

impl Summary {
    fn record(&mut self, event: &SubmitEvent) {
        self.requests.entry(event.name).or_default().record(event);
    }

    pub fn total(&self) -> u64 {
        self.requests.values().map(|stats| stats.count).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.requests.values().map(|stats| stats.failures).sum()
    }

    fn log(&self) {
        info!(
            "{:<12} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "name", "count", "fails", "p50(ms)", "p90(ms)", "p99(ms)", "max(ms)"
        );
        for (name, stats) in &self.requests {
            info!(
                "{:<12} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
                name,
                stats.count,
                stats.failures,
                stats.percentile_us(50.0) / 1000,
                stats.percentile_us(90.0) / 1000,
                stats.percentile_us(99.0) / 1000,
                stats.max_us() / 1000,
            );
            for (category, count) in &stats.failure_categories {
                info!("  {:<24} {:>10}", category, count);
            }
        }
    }
}

/// Aggregation thread. Consumes events until every sink clone is dropped,
/// logging a progress line along the way, then logs and returns the
/// final summary.
pub struct ReporterService {
    thread: JoinHandle<Summary>,
}

impl ReporterService {
    pub fn new() -> (Self, EventSink) {
        let (sender, receiver): (Sender<SubmitEvent>, Receiver<SubmitEvent>) = unbounded();
        let thread = Builder::new()
            .name("neonReporter".to_string())
            .spawn(move || Self::run(receiver))
            .expect("spawn reporter thread");
        (Self { thread }, EventSink { sender })
    }

    fn run(receiver: Receiver<SubmitEvent>) -> Summary {
        let mut summary = Summary::default();
        let mut last_total = 0u64;
        let progress = tick(PROGRESS_INTERVAL);
        loop {
            select! {
                recv(receiver) -> maybe_event => match maybe_event {
                    Ok(event) => summary.record(&event),
                    Err(_) => break,
                },
                recv(progress) -> _ => {
                    let total = summary.total();
                    info!(
                        "{} submissions ({} failed), +{} since last report",
                        total,
                        summary.total_failures(),
                        total - last_total,
                    );
                    last_total = total;
                }
            }
        }
        summary.log();
        summary
    }

    pub fn join(self) -> thread::Result<Summary> {
        self.thread.join()
    }
}
