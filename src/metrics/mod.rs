// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};

use crate::intake::WorkerState;
use crate::upstream::PollCategory;

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Poll cycles per category and their outcome
// - Event processing (throughput, latency, failures, duplicates)
// - Worker state and consecutive failures
// - Cash alerts and callback handler failures
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Poll Metrics
    pub polls_total: IntCounterVec,
    pub poll_consecutive_failures: IntGaugeVec,
    pub worker_state: IntGaugeVec,

    // Event Metrics
    pub events_processed: IntCounterVec,
    pub events_failed: IntCounterVec,
    pub events_duplicate: IntCounterVec,
    pub event_processing_duration: HistogramVec,

    // Side Effects
    pub cash_alerts_total: IntCounter,
    pub callback_failures: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Poll Metrics
        let polls_total = IntCounterVec::new(
            Opts::new("polls_total", "Poll cycles by category and outcome"),
            &["category", "outcome"],
        )?;
        registry.register(Box::new(polls_total.clone()))?;

        let poll_consecutive_failures = IntGaugeVec::new(
            Opts::new("poll_consecutive_failures", "Consecutive failed polls per category"),
            &["category"],
        )?;
        registry.register(Box::new(poll_consecutive_failures.clone()))?;

        let worker_state = IntGaugeVec::new(
            Opts::new(
                "worker_state",
                "Poll worker state (0=Idle, 1=Fetching, 2=Processing, 3=Acknowledging, 4=Stopped)",
            ),
            &["category"],
        )?;
        registry.register(Box::new(worker_state.clone()))?;

        // Event Metrics
        let events_processed = IntCounterVec::new(
            Opts::new("events_processed_total", "Events applied by the lifecycle engine"),
            &["category", "code"],
        )?;
        registry.register(Box::new(events_processed.clone()))?;

        let events_failed = IntCounterVec::new(
            Opts::new("events_failed_total", "Events that failed processing"),
            &["category", "reason"],
        )?;
        registry.register(Box::new(events_failed.clone()))?;

        let events_duplicate = IntCounterVec::new(
            Opts::new("events_duplicate_total", "Events skipped as already processed"),
            &["category"],
        )?;
        registry.register(Box::new(events_duplicate.clone()))?;

        let event_processing_duration = HistogramVec::new(
            HistogramOpts::new("event_processing_duration_seconds", "Event processing duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["category"],
        )?;
        registry.register(Box::new(event_processing_duration.clone()))?;

        // Side Effects
        let cash_alerts_total = IntCounter::new("cash_alerts_total", "Cash alerts raised")?;
        registry.register(Box::new(cash_alerts_total.clone()))?;

        let callback_failures = IntCounterVec::new(
            Opts::new("callback_failures_total", "Callback handler failures by callback category"),
            &["category"],
        )?;
        registry.register(Box::new(callback_failures.clone()))?;

        Ok(Self {
            registry,
            polls_total,
            poll_consecutive_failures,
            worker_state,
            events_processed,
            events_failed,
            events_duplicate,
            event_processing_duration,
            cash_alerts_total,
            callback_failures,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record the outcome of one poll cycle
    pub fn record_poll(&self, category: PollCategory, outcome: &str, consecutive_failures: u32) {
        self.polls_total
            .with_label_values(&[category.as_str(), outcome])
            .inc();
        self.poll_consecutive_failures
            .with_label_values(&[category.as_str()])
            .set(i64::from(consecutive_failures));
    }

    /// Helper to record one event run through the engine
    pub fn record_event(&self, category: PollCategory, code: &str, duration_secs: f64, failure: Option<&str>) {
        match failure {
            None => self
                .events_processed
                .with_label_values(&[category.as_str(), code])
                .inc(),
            Some(reason) => self
                .events_failed
                .with_label_values(&[category.as_str(), reason])
                .inc(),
        }
        self.event_processing_duration
            .with_label_values(&[category.as_str()])
            .observe(duration_secs);
    }

    pub fn record_duplicate(&self, category: PollCategory) {
        self.events_duplicate.with_label_values(&[category.as_str()]).inc();
    }

    pub fn record_worker_state(&self, category: PollCategory, state: WorkerState) {
        self.worker_state
            .with_label_values(&[category.as_str()])
            .set(state.as_gauge());
    }

    pub fn record_alerts(&self, count: usize) {
        self.cash_alerts_total.inc_by(count as u64);
    }

    pub fn record_callback_failures(&self, callback_category: &str, count: usize) {
        if count > 0 {
            self.callback_failures
                .with_label_values(&[callback_category])
                .inc_by(count as u64);
        }
    }
}
