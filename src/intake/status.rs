use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

use crate::upstream::PollCategory;

// ============================================================================
// Status Board
// ============================================================================
//
// Shared, read-mostly view of every poll worker: its state machine position,
// poll statistics and the fatal diagnostic, if any. Workers write to it,
// the HTTP server and the binary read snapshots.
//
// ============================================================================

/// Position of a poll worker in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Fetching,
    Processing,
    Acknowledging,
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Fetching => "fetching",
            WorkerState::Processing => "processing",
            WorkerState::Acknowledging => "acknowledging",
            WorkerState::Stopped => "stopped",
        }
    }

    /// Gauge encoding (0=Idle ... 4=Stopped)
    pub fn as_gauge(&self) -> i64 {
        match self {
            WorkerState::Idle => 0,
            WorkerState::Fetching => 1,
            WorkerState::Processing => 2,
            WorkerState::Acknowledging => 3,
            WorkerState::Stopped => 4,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of the intake as a whole
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }
}

/// Counts from one completed poll cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollReport {
    pub fetched: usize,
    pub applied: usize,
    pub duplicates: usize,
    pub ignored: usize,
    pub rejected: usize,
    /// Left unacknowledged for redelivery
    pub retryable: usize,
    pub acknowledged: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStatus {
    pub category: PollCategory,
    pub state: WorkerState,
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub consecutive_failures: u32,
    pub events_applied: u64,
    pub events_duplicate: u64,
    pub events_rejected: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_report: Option<PollReport>,
}

impl CategoryStatus {
    fn new(category: PollCategory) -> Self {
        Self {
            category,
            state: WorkerState::Idle,
            total_polls: 0,
            successful_polls: 0,
            failed_polls: 0,
            consecutive_failures: 0,
            events_applied: 0,
            events_duplicate: 0,
            events_rejected: 0,
            last_success: None,
            last_error: None,
            last_report: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub health: HealthStatus,
    pub fatal_error: Option<String>,
    pub categories: Vec<CategoryStatus>,
}

#[derive(Default)]
struct BoardState {
    categories: BTreeMap<PollCategory, CategoryStatus>,
    fatal: Option<String>,
}

pub struct StatusBoard {
    started_at: DateTime<Utc>,
    state: RwLock<BoardState>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            state: RwLock::new(BoardState::default()),
        }
    }

    pub fn register(&self, category: PollCategory) {
        self.write()
            .categories
            .entry(category)
            .or_insert_with(|| CategoryStatus::new(category));
    }

    pub fn set_state(&self, category: PollCategory, state: WorkerState) {
        self.update(category, |status| status.state = state);
    }

    pub fn record_success(&self, category: PollCategory, report: &PollReport) {
        self.update(category, |status| {
            status.total_polls += 1;
            status.successful_polls += 1;
            status.consecutive_failures = 0;
            status.events_applied += report.applied as u64;
            status.events_duplicate += report.duplicates as u64;
            status.events_rejected += report.rejected as u64;
            status.last_success = Some(Utc::now());
            status.last_report = Some(report.clone());
        });
    }

    pub fn record_failure(&self, category: PollCategory, error: &str) {
        self.update(category, |status| {
            status.total_polls += 1;
            status.failed_polls += 1;
            status.consecutive_failures += 1;
            status.last_error = Some(error.to_string());
        });
    }

    /// Terminal failure shared by every worker; the first diagnostic wins
    pub fn record_fatal(&self, category: PollCategory, diagnostic: &str) {
        let mut state = self.write();
        if state.fatal.is_none() {
            state.fatal = Some(format!("{category}: {diagnostic}"));
        }
        if let Some(status) = state.categories.get_mut(&category) {
            status.total_polls += 1;
            status.failed_polls += 1;
            status.last_error = Some(diagnostic.to_string());
        }
    }

    pub fn fatal_error(&self) -> Option<String> {
        self.read().fatal.clone()
    }

    pub fn category(&self, category: PollCategory) -> Option<CategoryStatus> {
        self.read().categories.get(&category).cloned()
    }

    pub fn health(&self) -> HealthStatus {
        let state = self.read();
        Self::health_of(&state)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let state = self.read();
        let now = Utc::now();
        StatusSnapshot {
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds(),
            health: Self::health_of(&state),
            fatal_error: state.fatal.clone(),
            categories: state.categories.values().cloned().collect(),
        }
    }

    fn health_of(state: &BoardState) -> HealthStatus {
        if let Some(fatal) = &state.fatal {
            return HealthStatus::Unhealthy(fatal.clone());
        }

        let mut problems = Vec::new();
        for status in state.categories.values() {
            if status.state == WorkerState::Stopped {
                problems.push(format!("{} worker stopped", status.category));
            } else if status.consecutive_failures > 0 {
                problems.push(format!(
                    "{}: {} consecutive poll failures",
                    status.category, status.consecutive_failures
                ));
            }
        }

        if problems.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded(problems.join("; "))
        }
    }

    fn update(&self, category: PollCategory, f: impl FnOnce(&mut CategoryStatus)) {
        let mut state = self.write();
        let status = state
            .categories
            .entry(category)
            .or_insert_with(|| CategoryStatus::new(category));
        f(status);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BoardState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BoardState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_track_polls() {
        let board = StatusBoard::new();
        board.register(PollCategory::Orders);

        let report = PollReport {
            fetched: 3,
            applied: 2,
            duplicates: 1,
            ..PollReport::default()
        };
        board.record_failure(PollCategory::Orders, "timeout");
        board.record_success(PollCategory::Orders, &report);

        let status = board.category(PollCategory::Orders).unwrap();
        assert_eq!(status.total_polls, 2);
        assert_eq!(status.successful_polls, 1);
        assert_eq!(status.failed_polls, 1);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.events_applied, 2);
        assert!(status.last_success.is_some());
        assert_eq!(status.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_health_degrades_then_fails() {
        let board = StatusBoard::new();
        board.register(PollCategory::Orders);
        board.register(PollCategory::Merchant);
        assert!(board.health().is_healthy());

        board.record_failure(PollCategory::Merchant, "502");
        assert!(matches!(board.health(), HealthStatus::Degraded(reason) if reason.contains("merchant")));

        board.record_fatal(PollCategory::Orders, "invalid client credentials");
        board.record_fatal(PollCategory::Merchant, "invalid client credentials");
        let health = board.health();
        assert!(health.is_unhealthy());
        assert_eq!(
            board.fatal_error().as_deref(),
            Some("orders: invalid client credentials")
        );
    }

    #[test]
    fn test_snapshot_serializes_health_tag() {
        let board = StatusBoard::new();
        board.register(PollCategory::Orders);
        board.set_state(PollCategory::Orders, WorkerState::Fetching);

        let json = serde_json::to_value(board.snapshot()).unwrap();
        assert_eq!(json["health"]["status"], "healthy");
        assert_eq!(json["categories"][0]["category"], "orders");
        assert_eq!(json["categories"][0]["state"], "fetching");
    }
}
