use futures_util::stream::{FuturesUnordered, StreamExt};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::status::{HealthStatus, WorkerState};
use super::worker::{IntakeContext, PollWorker, WorkerConfig, WorkerExit};
use crate::config::Config;
use crate::upstream::PollCategory;

// ============================================================================
// Intake Coordinator - Owns the poll workers
// ============================================================================
//
// Responsibilities:
// - Spawns one worker task per enabled poll category
// - Holds the shared stop signal
// - Logs overall health periodically
// - Replaces a single worker when its settings change at runtime
// - Joins every worker on shutdown; a crashed worker stops the rest
//
//   Coordinator
//   ├── PollWorker(orders)
//   ├── PollWorker(merchant)
//   └── health reporter
//
// ============================================================================

const HEALTH_REPORT_INTERVAL: Duration = Duration::from_secs(30);

struct RunningWorker {
    category: PollCategory,
    stop: CancellationToken,
    handle: JoinHandle<WorkerExit>,
}

pub struct Coordinator {
    ctx: IntakeContext,
    stop: CancellationToken,
    workers: Vec<RunningWorker>,
    reporter: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Spawn workers for every enabled category in `config`
    pub fn start(ctx: IntakeContext, config: &Config) -> Self {
        let workers = PollCategory::ALL
            .into_iter()
            .filter(|category| {
                let enabled = config.poll_settings(*category).enabled;
                if !enabled {
                    tracing::info!(category = %category, "Polling disabled for category");
                }
                enabled
            })
            .map(|category| (category, WorkerConfig::for_category(config, category)))
            .collect();

        Self::with_workers(ctx, workers)
    }

    pub fn with_workers(ctx: IntakeContext, workers: Vec<(PollCategory, WorkerConfig)>) -> Self {
        let stop = CancellationToken::new();

        let workers: Vec<_> = workers
            .into_iter()
            .map(|(category, worker_config)| spawn_worker(category, worker_config, &ctx, &stop))
            .collect();

        let reporter = tokio::spawn(report_health(ctx.clone(), stop.clone()));

        tracing::info!(workers = workers.len(), "✅ Intake coordinator started");
        Self {
            ctx,
            stop,
            workers,
            reporter: Some(reporter),
        }
    }

    /// Handle for the shared stop signal (e.g. for a ctrl-c listener)
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn context(&self) -> &IntakeContext {
        &self.ctx
    }

    /// Stop the worker for `category` and start a new one with `worker_config`.
    /// Returns how the previous worker ended, or `None` if the category was
    /// not running.
    pub async fn restart(
        &mut self,
        category: PollCategory,
        worker_config: WorkerConfig,
    ) -> anyhow::Result<Option<WorkerExit>> {
        if self.stop.is_cancelled() {
            anyhow::bail!("coordinator is shutting down, {category} worker not restarted");
        }

        let previous = match self.workers.iter().position(|w| w.category == category) {
            Some(index) => {
                let running = self.workers.swap_remove(index);
                running.stop.cancel();
                Some(match running.handle.await {
                    Ok(exit) => exit,
                    Err(e) => WorkerExit::Fatal(format!("worker task failed: {e}")),
                })
            }
            None => None,
        };

        // The old worker may have hit a fatal error while we waited for it
        if self.stop.is_cancelled() {
            anyhow::bail!("coordinator stopped while restarting the {category} worker");
        }

        tracing::info!(
            category = %category,
            interval_secs = worker_config.interval.as_secs(),
            "🔄 Restarting poll worker with new settings"
        );
        self.workers
            .push(spawn_worker(category, worker_config, &self.ctx, &self.stop));
        Ok(previous)
    }

    /// Wait until every worker has stopped, by stop signal or fatal error.
    /// A worker task that panics counts as fatal and stops the others.
    pub async fn wait(mut self) -> Vec<(PollCategory, WorkerExit)> {
        let mut running: FuturesUnordered<_> = self
            .workers
            .drain(..)
            .map(|w| async move { (w.category, w.handle.await) })
            .collect();

        let mut exits = Vec::with_capacity(running.len());
        while let Some((category, joined)) = running.next().await {
            let exit = match joined {
                Ok(exit) => exit,
                Err(e) => {
                    let diagnostic = format!("worker task failed: {e}");
                    tracing::error!(category = %category, error = %e, "❌ Poll worker task failed, stopping all poll workers");
                    self.ctx.status.record_fatal(category, &diagnostic);
                    self.ctx.status.set_state(category, WorkerState::Stopped);
                    self.stop.cancel();
                    WorkerExit::Fatal(diagnostic)
                }
            };
            exits.push((category, exit));
        }

        self.stop.cancel();
        if let Some(reporter) = self.reporter.take() {
            let _ = reporter.await;
        }
        exits
    }

    pub async fn shutdown(self) -> Vec<(PollCategory, WorkerExit)> {
        tracing::info!("🛑 Intake coordinator stopping - initiating graceful shutdown");
        self.stop.cancel();
        self.wait().await
    }
}

fn spawn_worker(
    category: PollCategory,
    worker_config: WorkerConfig,
    ctx: &IntakeContext,
    stop: &CancellationToken,
) -> RunningWorker {
    let worker = PollWorker::new(category, worker_config, ctx.clone(), stop.clone());
    RunningWorker {
        category,
        stop: worker.stop_handle(),
        handle: tokio::spawn(worker.run()),
    }
}

async fn report_health(ctx: IntakeContext, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(HEALTH_REPORT_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match ctx.status.health() {
            HealthStatus::Healthy => tracing::debug!("System health check: Healthy"),
            HealthStatus::Degraded(msg) => tracing::warn!("System health check: Degraded - {}", msg),
            HealthStatus::Unhealthy(msg) => tracing::error!("System health check: Unhealthy - {}", msg),
        }
    }
}
