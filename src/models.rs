use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::order::{AlertStatus, OrderStatus, PaymentStatus};

// ============================================================================
// Persisted Models
// ============================================================================
//
// Entities owned by the order store. Upstream identifiers (orders, customers,
// drivers, products) are kept as opaque strings; locally generated rows
// (payments, alerts) use UUIDs. Money is stored as integer cents.
//
// ============================================================================

/// Upstream order identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for OrderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Driver {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InventoryRecord {
    pub product_id: String,
    pub stock_quantity: i32,
    pub expiration_date: Option<NaiveDate>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub display_id: Option<String>,
    pub customer_id: String,
    pub driver_id: Option<String>,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderItem {
    pub order_id: OrderId,
    pub product_id: String,
    pub quantity: i32,
    pub note: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: OrderId,
    pub status: PaymentStatus,
    pub payment_type: String,
    pub updated_at: DateTime<Utc>,
}

/// Operator-facing alert. References the order by identifier only, so an
/// alert can outlive (or predate) the order row.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CashAlert {
    pub id: Uuid,
    pub order_id: OrderId,
    pub message: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}

impl CashAlert {
    pub fn new(order_id: OrderId, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            message: message.into(),
            status: AlertStatus::Active,
            created_at: Utc::now(),
        }
    }
}
