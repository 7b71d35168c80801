use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::dedup::EventDeduplicator;
use super::dispatcher::{CallbackCategory, CallbackDispatcher};
use super::engine::{Applied, OrderLifecycleEngine};
use super::error::ProcessingError;
use super::status::{PollReport, StatusBoard, WorkerState};
use crate::config::Config;
use crate::metrics::Metrics;
use crate::upstream::{Event, PollCategory, UpstreamClient, UpstreamError};
use crate::utils::RetryConfig;

// ============================================================================
// Poll Worker
// ============================================================================
//
// One worker per poll category:
//
//   Idle -> Fetching -> Processing -> Acknowledging -> Idle (sleep) -> ...
//
// Stopped is terminal, reached on the shared stop signal or a fatal auth
// failure. A fatal failure cancels the shared signal so every other worker
// stops too.
//
// Each worker watches a child of the shared signal, so a single worker can
// be stopped and replaced without touching the others.
//
// The stop signal is observed while fetching, between events, while
// acknowledging and while sleeping. An event already handed to the engine
// runs to completion so a store transaction is never abandoned halfway.
//
// ============================================================================

/// Collaborators shared by every worker
#[derive(Clone)]
pub struct IntakeContext {
    pub upstream: Arc<dyn UpstreamClient>,
    pub engine: Arc<OrderLifecycleEngine>,
    pub dedup: Arc<EventDeduplicator>,
    pub dispatcher: Arc<CallbackDispatcher>,
    pub status: Arc<StatusBoard>,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub interval: Duration,
    pub page_size: usize,
    pub backoff: RetryConfig,
    /// Merchants whose status is polled; empty means every listed merchant
    pub merchant_ids: Vec<String>,
}

impl WorkerConfig {
    pub fn for_category(config: &Config, category: PollCategory) -> Self {
        Self {
            interval: config.poll_settings(category).interval,
            page_size: config.page_size,
            backoff: config.backoff.retry_config(),
            merchant_ids: config.merchant_ids.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("stop requested")]
    Cancelled,
}

impl PollError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PollError::Upstream(err) if err.is_fatal())
    }
}

/// Why a worker loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerExit {
    Cancelled,
    Fatal(String),
}

/// What happened to one event of a batch
#[derive(Debug, Clone, Copy, PartialEq)]
enum Disposition {
    Applied,
    Duplicate,
    Ignored,
    Rejected,
    Retry,
}

pub struct PollWorker {
    category: PollCategory,
    config: WorkerConfig,
    ctx: IntakeContext,
    stop: CancellationToken,
    shared_stop: CancellationToken,
    consecutive_failures: u32,
}

impl PollWorker {
    pub fn new(
        category: PollCategory,
        config: WorkerConfig,
        ctx: IntakeContext,
        shared_stop: CancellationToken,
    ) -> Self {
        ctx.status.register(category);
        Self {
            category,
            config,
            ctx,
            stop: shared_stop.child_token(),
            shared_stop,
            consecutive_failures: 0,
        }
    }

    pub fn category(&self) -> PollCategory {
        self.category
    }

    /// Stops this worker only
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Delay before the next fetch given the current failure streak
    pub fn next_delay(&self) -> Duration {
        if self.consecutive_failures == 0 {
            self.config.interval
        } else {
            self.config.backoff.delay_for(self.consecutive_failures)
        }
    }

    pub async fn run(mut self) -> WorkerExit {
        tracing::info!(category = %self.category, interval_secs = self.config.interval.as_secs(), "🚀 Poll worker started");

        let exit = loop {
            if self.stop.is_cancelled() {
                break WorkerExit::Cancelled;
            }

            match self.poll_once().await {
                Ok(_) => {}
                Err(PollError::Cancelled) => break WorkerExit::Cancelled,
                Err(err) if err.is_fatal() => {
                    let diagnostic = err.to_string();
                    tracing::error!(
                        category = %self.category,
                        error = %diagnostic,
                        "❌ Authentication failed, stopping all poll workers"
                    );
                    self.shared_stop.cancel();
                    break WorkerExit::Fatal(diagnostic);
                }
                Err(_) => {}
            }

            let delay = self.next_delay();
            self.set_state(WorkerState::Idle);
            tokio::select! {
                _ = self.stop.cancelled() => break WorkerExit::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        };

        self.set_state(WorkerState::Stopped);
        tracing::info!(category = %self.category, exit = ?exit, "🛑 Poll worker stopped");
        exit
    }

    /// One fetch-process-acknowledge cycle. Records the outcome on the
    /// status board and in metrics.
    pub async fn poll_once(&mut self) -> Result<PollReport, PollError> {
        let result = self.cycle().await;

        match &result {
            Ok(report) => {
                self.consecutive_failures = 0;
                self.ctx.status.record_success(self.category, report);
                self.ctx.metrics.record_poll(self.category, "success", 0);
                if report.fetched > 0 {
                    tracing::info!(
                        category = %self.category,
                        fetched = report.fetched,
                        applied = report.applied,
                        duplicates = report.duplicates,
                        rejected = report.rejected,
                        retryable = report.retryable,
                        "Poll cycle completed"
                    );
                }
            }
            Err(PollError::Cancelled) => {}
            Err(err) if err.is_fatal() => {
                self.ctx.status.record_fatal(self.category, &err.to_string());
                self.ctx.metrics.record_poll(self.category, "fatal", self.consecutive_failures);
                self.notify_poll_error(err).await;
            }
            Err(err) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.ctx.status.record_failure(self.category, &err.to_string());
                self.ctx
                    .metrics
                    .record_poll(self.category, "failure", self.consecutive_failures);
                tracing::warn!(
                    category = %self.category,
                    error = %err,
                    consecutive_failures = self.consecutive_failures,
                    delay_ms = self.next_delay().as_millis() as u64,
                    "⚠️ Poll failed, backing off"
                );
                self.notify_poll_error(err).await;
            }
        }

        result
    }

    async fn cycle(&self) -> Result<PollReport, PollError> {
        self.set_state(WorkerState::Fetching);
        let events = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return Err(PollError::Cancelled),
            fetched = self.fetch() => fetched?,
        };

        let mut report = PollReport {
            fetched: events.len(),
            ..PollReport::default()
        };
        if events.is_empty() {
            return Ok(report);
        }

        self.set_state(WorkerState::Processing);
        let mut to_ack = Vec::new();
        for event in &events {
            if self.stop.is_cancelled() {
                return Err(PollError::Cancelled);
            }

            let disposition = self.process(event).await?;
            match disposition {
                Disposition::Applied => report.applied += 1,
                Disposition::Duplicate => report.duplicates += 1,
                Disposition::Ignored => report.ignored += 1,
                Disposition::Rejected => report.rejected += 1,
                Disposition::Retry => report.retryable += 1,
            }
            if disposition != Disposition::Retry {
                if let Some(id) = &event.id {
                    to_ack.push(id.clone());
                }
            }
        }

        if self.category == PollCategory::Orders && !to_ack.is_empty() {
            if self.stop.is_cancelled() {
                return Err(PollError::Cancelled);
            }
            self.set_state(WorkerState::Acknowledging);
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Err(PollError::Cancelled),
                acked = self.ctx.upstream.acknowledge(&to_ack) => acked?,
            }
            report.acknowledged = to_ack.len();
        }

        Ok(report)
    }

    async fn fetch(&self) -> Result<Vec<Event>, UpstreamError> {
        match self.category {
            PollCategory::Orders => self.ctx.upstream.poll_events(self.config.page_size).await,
            PollCategory::Merchant => {
                let merchant_ids = if self.config.merchant_ids.is_empty() {
                    self.ctx
                        .upstream
                        .list_merchants()
                        .await?
                        .into_iter()
                        .map(|merchant| merchant.id)
                        .collect()
                } else {
                    self.config.merchant_ids.clone()
                };

                let mut events = Vec::new();
                for merchant_id in merchant_ids.iter().take(self.config.page_size) {
                    match self.ctx.upstream.merchant_status(merchant_id).await {
                        Ok(status) => events.push(Event::merchant_status(&status)),
                        Err(UpstreamError::NotFound(_)) => {
                            tracing::warn!(merchant_id = %merchant_id, "No status reported for merchant");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(events)
            }
        }
    }

    async fn process(&self, event: &Event) -> Result<Disposition, PollError> {
        let key = event.key();
        if self.ctx.dedup.seen(&key) {
            tracing::debug!(category = %self.category, event_id = ?event.id, code = %event.code, "Duplicate event skipped");
            self.ctx.metrics.record_duplicate(self.category);
            return Ok(Disposition::Duplicate);
        }

        let started = Instant::now();
        let result = self.ctx.engine.apply(event).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(applied) => {
                self.ctx.dedup.record(key);
                self.ctx
                    .metrics
                    .record_event(self.category, event.code.as_str(), elapsed, None);
                self.ctx.metrics.record_alerts(applied.alerts().len());
                self.notify(&applied).await;

                Ok(match applied {
                    Applied::Ignored(_) => Disposition::Ignored,
                    _ => Disposition::Applied,
                })
            }
            Err(ProcessingError::Upstream(err)) if err.is_fatal() => Err(PollError::Upstream(err)),
            Err(err) if err.is_retryable() => {
                tracing::warn!(
                    category = %self.category,
                    event_id = ?event.id,
                    order_id = ?event.order_id,
                    code = %event.code,
                    error = %err,
                    "Event left for redelivery"
                );
                self.ctx
                    .metrics
                    .record_event(self.category, event.code.as_str(), elapsed, Some(err.reason()));
                Ok(Disposition::Retry)
            }
            Err(err) => {
                tracing::error!(
                    category = %self.category,
                    event_id = ?event.id,
                    order_id = ?event.order_id,
                    code = %event.code,
                    error = %err,
                    "Event rejected"
                );
                self.ctx.dedup.record(key);
                self.ctx
                    .metrics
                    .record_event(self.category, event.code.as_str(), elapsed, Some(err.reason()));

                if let ProcessingError::Rejected { alert: Some(alert), .. } = &err {
                    self.ctx.metrics.record_alerts(1);
                    self.dispatch(CallbackCategory::Alert, serde_json::json!({ "alert": alert }))
                        .await;
                }
                Ok(Disposition::Rejected)
            }
        }
    }

    async fn notify(&self, applied: &Applied) {
        for (category, payload) in applied.notifications() {
            self.dispatch(category, payload).await;
        }
    }

    async fn notify_poll_error(&self, err: &PollError) {
        let payload = serde_json::json!({
            "category": self.category,
            "error": err.to_string(),
            "fatal": err.is_fatal(),
            "consecutive_failures": self.consecutive_failures,
        });
        self.dispatch(CallbackCategory::PollError, payload).await;
    }

    async fn dispatch(&self, category: CallbackCategory, payload: serde_json::Value) {
        let report = self.ctx.dispatcher.dispatch(category, payload).await;
        self.ctx
            .metrics
            .record_callback_failures(category.as_str(), report.failures.len());
    }

    fn set_state(&self, state: WorkerState) {
        self.ctx.status.set_state(self.category, state);
        self.ctx.metrics.record_worker_state(self.category, state);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
