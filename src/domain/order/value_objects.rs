use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::OrderError;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Local order status. Declaration order is the lifecycle order, so the
/// derived `Ord` is the monotonic ordering Preparing < EnRoute < Delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Preparing,
    EnRoute,
    Delivered,
}

/// How a requested status relates to the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusStep {
    /// Requested status is already recorded
    Same,
    /// Requested status is the legal next step
    Next,
    /// Requested status is ahead of the next step (intermediate events missed)
    Skip,
    /// Requested status is behind the current one
    Backward,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Preparing => "Preparing",
            OrderStatus::EnRoute => "EnRoute",
            OrderStatus::Delivered => "Delivered",
        }
    }

    pub fn next(self) -> Option<Self> {
        match self {
            OrderStatus::Preparing => Some(OrderStatus::EnRoute),
            OrderStatus::EnRoute => Some(OrderStatus::Delivered),
            OrderStatus::Delivered => None,
        }
    }

    pub fn step_to(self, target: OrderStatus) -> StatusStep {
        if target == self {
            StatusStep::Same
        } else if target < self {
            StatusStep::Backward
        } else if self.next() == Some(target) {
            StatusStep::Next
        } else {
            StatusStep::Skip
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Preparing" => Ok(OrderStatus::Preparing),
            "EnRoute" => Ok(OrderStatus::EnRoute),
            "Delivered" => Ok(OrderStatus::Delivered),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Confirmed => "Confirmed",
            PaymentStatus::Canceled => "Canceled",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PaymentStatus::Pending),
            "Confirmed" => Ok(PaymentStatus::Confirmed),
            "Canceled" => Ok(PaymentStatus::Canceled),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AlertStatus::Active),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
