use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::order::OrderStatus;
use crate::models::OrderId;

// ============================================================================
// Poll Categories & Event Codes
// ============================================================================

/// Independently polled upstream stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollCategory {
    Orders,
    Merchant,
}

impl PollCategory {
    pub const ALL: [PollCategory; 2] = [PollCategory::Orders, PollCategory::Merchant];

    pub fn as_str(&self) -> &'static str {
        match self {
            PollCategory::Orders => "orders",
            PollCategory::Merchant => "merchant",
        }
    }
}

impl fmt::Display for PollCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream event code. Unrecognized codes are preserved so they can be
/// acknowledged and logged instead of failing the batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventCode {
    Placed,
    Confirmed,
    PreparationStarted,
    ReadyToPickup,
    Dispatched,
    Concluded,
    Canceled,
    CancellationRequested,
    Integrated,
    OrderPatched,
    DriverAssigned,
    Negotiation,
    DeliveryGroup,
    ReturnCodeRequested,
    /// Synthesized from a merchant status poll
    MerchantStatus,
    Unknown(String),
}

impl EventCode {
    /// Codes requested from the events endpoint
    pub const POLLED: &'static [&'static str] = &[
        "PLC", "CFM", "CAN", "DIS", "RTP", "CON", "PST", "OPA", "ADR", "NEG", "CAR", "DGR", "RQC",
    ];

    pub fn from_wire(code: &str) -> Self {
        match code {
            "PLC" => EventCode::Placed,
            "CFM" => EventCode::Confirmed,
            "PST" => EventCode::PreparationStarted,
            "RTP" => EventCode::ReadyToPickup,
            // Driver-created events arrive as DDCR on some channels
            "DIS" | "DDCR" => EventCode::Dispatched,
            "CON" => EventCode::Concluded,
            "CAN" => EventCode::Canceled,
            "CAR" => EventCode::CancellationRequested,
            "INT" => EventCode::Integrated,
            "OPA" => EventCode::OrderPatched,
            "ADR" => EventCode::DriverAssigned,
            "NEG" => EventCode::Negotiation,
            "DGR" => EventCode::DeliveryGroup,
            "RQC" => EventCode::ReturnCodeRequested,
            "MERCHANT_STATUS" => EventCode::MerchantStatus,
            other => EventCode::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventCode::Placed => "PLC",
            EventCode::Confirmed => "CFM",
            EventCode::PreparationStarted => "PST",
            EventCode::ReadyToPickup => "RTP",
            EventCode::Dispatched => "DIS",
            EventCode::Concluded => "CON",
            EventCode::Canceled => "CAN",
            EventCode::CancellationRequested => "CAR",
            EventCode::Integrated => "INT",
            EventCode::OrderPatched => "OPA",
            EventCode::DriverAssigned => "ADR",
            EventCode::Negotiation => "NEG",
            EventCode::DeliveryGroup => "DGR",
            EventCode::ReturnCodeRequested => "RQC",
            EventCode::MerchantStatus => "MERCHANT_STATUS",
            EventCode::Unknown(code) => code,
        }
    }

    /// Local order status a lifecycle code moves the order to
    pub fn target_status(&self) -> Option<OrderStatus> {
        match self {
            EventCode::Confirmed | EventCode::PreparationStarted | EventCode::ReadyToPickup => {
                Some(OrderStatus::Preparing)
            }
            EventCode::Dispatched => Some(OrderStatus::EnRoute),
            EventCode::Concluded => Some(OrderStatus::Delivered),
            _ => None,
        }
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Events
// ============================================================================

/// Event as returned by the polling endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub id: Option<String>,
    pub code: String,
    pub full_code: Option<String>,
    pub order_id: Option<String>,
    pub merchant_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: Option<String>,
    pub category: PollCategory,
    pub code: EventCode,
    pub order_id: Option<OrderId>,
    pub merchant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Identity used for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    Upstream(String),
    Composite {
        category: PollCategory,
        subject: String,
        code: String,
        at: DateTime<Utc>,
    },
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKey::Upstream(id) => write!(f, "{}", id),
            EventKey::Composite {
                category,
                subject,
                code,
                at,
            } => write!(f, "{}:{}:{}:{}", category, subject, code, at.timestamp_millis()),
        }
    }
}

impl Event {
    pub fn from_raw(category: PollCategory, raw: RawEvent) -> Self {
        Self {
            id: raw.id.filter(|id| !id.is_empty()),
            category,
            code: EventCode::from_wire(&raw.code),
            order_id: raw.order_id.filter(|id| !id.is_empty()).map(OrderId::from),
            merchant_id: raw.merchant_id,
            created_at: raw.created_at.unwrap_or_else(Utc::now),
            payload: raw.metadata,
        }
    }

    /// Event carrying a merchant status observation
    pub fn merchant_status(status: &MerchantStatus) -> Self {
        Self {
            id: None,
            category: PollCategory::Merchant,
            code: EventCode::MerchantStatus,
            order_id: None,
            merchant_id: Some(status.merchant_id.clone()),
            created_at: Utc::now(),
            payload: serde_json::to_value(status).unwrap_or(serde_json::Value::Null),
        }
    }

    /// The upstream id when present, otherwise
    /// (category, order or merchant, code, timestamp).
    pub fn key(&self) -> EventKey {
        match &self.id {
            Some(id) => EventKey::Upstream(id.clone()),
            None => EventKey::Composite {
                category: self.category,
                subject: self
                    .order_id
                    .as_ref()
                    .map(|id| id.to_string())
                    .or_else(|| self.merchant_id.clone())
                    .unwrap_or_default(),
                code: self.code.as_str().to_string(),
                at: self.created_at,
            },
        }
    }
}

// ============================================================================
// Order Detail
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub id: String,
    pub display_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total: OrderTotal,
    pub customer: Option<CustomerDetail>,
    #[serde(default)]
    pub items: Vec<ItemDetail>,
    #[serde(default)]
    pub payments: PaymentDetails,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotal {
    #[serde(default)]
    pub order_amount: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomerDetail {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub phone: Option<PhoneDetail>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhoneDetail {
    pub number: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetail {
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub quantity: i32,
    #[serde(default)]
    pub unit_price: f64,
    #[serde(default)]
    pub total_price: f64,
    pub observations: Option<String>,
    pub external_code: Option<String>,
}

impl ItemDetail {
    /// Local product reference: the merchant's external code when set,
    /// falling back to the upstream item id, then the item name.
    pub fn product_id(&self) -> &str {
        self.external_code
            .as_deref()
            .filter(|code| !code.is_empty())
            .or(self.id.as_deref().filter(|id| !id.is_empty()))
            .unwrap_or(self.name.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PaymentDetails {
    #[serde(default)]
    pub methods: Vec<PaymentMethodDetail>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentMethodDetail {
    #[serde(default)]
    pub method: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub prepaid: bool,
}

impl OrderDetail {
    pub fn total_cents(&self) -> i64 {
        to_cents(self.total.order_amount)
    }

    pub fn payment_method(&self) -> String {
        self.payments
            .methods
            .first()
            .map(|m| m.method.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }

    pub fn payment_type(&self) -> String {
        self.payments
            .methods
            .first()
            .and_then(|m| m.kind.clone())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }
}

/// Currency amount to integer cents
pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

// ============================================================================
// Merchant
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MerchantState {
    Ok,
    Warning,
    Closed,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StatusMessage {
    pub title: Option<String>,
    pub subtitle: Option<String>,
}

impl StatusMessage {
    pub fn text(&self) -> Option<&str> {
        self.subtitle
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.title.as_deref().filter(|s| !s.is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StatusValidation {
    #[serde(default)]
    pub id: String,
    pub state: Option<MerchantState>,
    pub message: Option<StatusMessage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantStatus {
    /// Not part of the upstream body; filled in by the client
    #[serde(default)]
    pub merchant_id: String,
    pub operation: Option<String>,
    pub state: MerchantState,
    pub available: Option<bool>,
    pub message: Option<StatusMessage>,
    #[serde(default)]
    pub validations: Vec<StatusValidation>,
}

impl MerchantStatus {
    pub fn is_offline(&self) -> bool {
        self.state == MerchantState::Closed
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub corporate_name: Option<String>,
}
