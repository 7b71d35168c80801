use crate::models::{CashAlert, OrderId};
use crate::store::StoreError;
use crate::upstream::UpstreamError;
use crate::utils::IsTransient;

// ============================================================================
// Processing Errors
// ============================================================================

/// Failure to apply one event. Isolated to that event by the poll worker;
/// only an upstream auth failure escapes the worker as fatal.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("upstream: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// Business rule violation; the event is acknowledged and an operator
    /// alert was raised when possible.
    #[error("event for order {order_id} rejected: {reason}")]
    Rejected {
        order_id: OrderId,
        reason: String,
        alert: Option<CashAlert>,
    },

    #[error("malformed event: {0}")]
    Malformed(String),
}

impl ProcessingError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProcessingError::Upstream(err) if err.is_fatal())
    }

    /// The event should stay unacknowledged and be delivered again
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessingError::Upstream(err) => err.is_transient(),
            ProcessingError::Store(err) => err.is_retryable(),
            ProcessingError::Rejected { .. } | ProcessingError::Malformed(_) => false,
        }
    }

    /// Short label for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            ProcessingError::Upstream(err) => err.kind(),
            ProcessingError::Store(StoreError::InsufficientStock { .. }) => "insufficient_stock",
            ProcessingError::Store(err) if err.is_retryable() => "store_unavailable",
            ProcessingError::Store(_) => "store",
            ProcessingError::Rejected { .. } => "rejected",
            ProcessingError::Malformed(_) => "malformed",
        }
    }
}
