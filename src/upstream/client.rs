use async_trait::async_trait;

use super::error::UpstreamError;
use super::types::{Event, MerchantStatus, MerchantSummary, OrderDetail};
use crate::models::OrderId;

/// Request functions against the upstream commerce platform.
///
/// Implementations hold no per-call state besides the shared credential, so
/// one instance is shared by every worker.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Pending order events, at most `limit`. Events beyond the page stay
    /// unacknowledged upstream and come back on the next poll.
    async fn poll_events(&self, limit: usize) -> Result<Vec<Event>, UpstreamError>;

    async fn acknowledge(&self, event_ids: &[String]) -> Result<(), UpstreamError>;

    async fn order_detail(&self, order_id: &OrderId) -> Result<OrderDetail, UpstreamError>;

    async fn confirm_order(&self, order_id: &OrderId) -> Result<(), UpstreamError>;

    async fn request_cancellation(
        &self,
        order_id: &OrderId,
        reason: &str,
        cancellation_code: &str,
    ) -> Result<(), UpstreamError>;

    async fn list_merchants(&self) -> Result<Vec<MerchantSummary>, UpstreamError>;

    async fn merchant_status(&self, merchant_id: &str) -> Result<MerchantStatus, UpstreamError>;
}
