// ============================================================================
// Upstream Platform
// ============================================================================
//
// Wire types, the request trait the engine and workers depend on, and the
// reqwest-backed implementation.
//
// ============================================================================

pub mod client;
pub mod error;
pub mod http;
pub mod types;

pub use client::UpstreamClient;
pub use error::UpstreamError;
pub use http::HttpUpstreamClient;
pub use types::{
    to_cents, CustomerDetail, Event, EventCode, EventKey, ItemDetail, MerchantState,
    MerchantStatus, MerchantSummary, OrderDetail, PaymentMethodDetail, PollCategory, RawEvent,
};
