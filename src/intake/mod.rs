// ============================================================================
// Event Intake
// ============================================================================
//
// Poll Worker → Upstream Client → Deduplicator → Lifecycle Engine →
// Order Store → Callback Dispatcher → acknowledge
//
// - dedup: time-windowed set of processed event keys
// - engine: classifies events and drives the order state machine
// - dispatcher: per-category callback registry
// - worker: fetch/process/acknowledge loop with backoff
// - coordinator: one worker per category, shared stop signal
// - status: worker states, poll statistics, health
//
// ============================================================================

pub mod coordinator;
pub mod dedup;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod status;
pub mod worker;

pub use coordinator::Coordinator;
pub use dedup::EventDeduplicator;
pub use dispatcher::{CallbackCategory, CallbackDispatcher, CallbackHandler, DispatchReport, FnHandler, HandlerFailure};
pub use engine::{Applied, OrderLifecycleEngine};
pub use error::ProcessingError;
pub use status::{CategoryStatus, HealthStatus, PollReport, StatusBoard, StatusSnapshot, WorkerState};
pub use worker::{IntakeContext, PollError, PollWorker, WorkerConfig, WorkerExit};
