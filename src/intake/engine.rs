use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::dispatcher::CallbackCategory;
use super::error::ProcessingError;
use crate::config::EngineOptions;
use crate::domain::order::{validate_lines, OrderStatus, PaymentStatus, StatusStep};
use crate::models::{CashAlert, Customer, Driver, Order, OrderId, OrderItem, Payment, Product};
use crate::store::{NewOrder, OrderStore, StoreError};
use crate::upstream::{to_cents, Event, EventCode, MerchantStatus, OrderDetail, UpstreamClient, UpstreamError};

// ============================================================================
// Order Lifecycle Engine
// ============================================================================
//
// Classifies one event and applies it to the store:
//
//   PLC          fetch detail, validate, create order + items + payment and
//                decrement stock in one transaction
//   CFM/PST/RTP  -> Preparing
//   DIS          -> EnRoute
//   CON          -> Delivered, Pending payment -> Confirmed
//   CAN          payment -> Canceled, stock returned
//   ADR          driver upserted and assigned
//   others       acknowledged and ignored
//
// Status changes are compare-and-set against the status we read, retried a
// few times when another writer wins. Re-applying an event that already took
// effect is a no-op. A target behind the current status is stale and ignored;
// a target past the next legal step is applied and flagged with a CashAlert,
// since upstream does not guarantee ordering.
//
// ============================================================================

const MAX_CAS_ATTEMPTS: usize = 3;

/// Fallback customer id when the detail carries none
const ANONYMOUS_CUSTOMER: &str = "anonymous";

/// What applying an event changed
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Created {
        order: Order,
        confirmed_upstream: bool,
    },
    Transitioned {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        code: EventCode,
        alerts: Vec<CashAlert>,
    },
    Canceled {
        order_id: OrderId,
        restocked: bool,
        alerts: Vec<CashAlert>,
    },
    DriverAssigned {
        order_id: OrderId,
        driver: Driver,
    },
    Merchant(MerchantStatus),
    /// Already in effect (duplicate or stale delivery)
    Unchanged {
        order_id: OrderId,
        reason: &'static str,
    },
    Ignored(EventCode),
}

impl Applied {
    pub fn alerts(&self) -> &[CashAlert] {
        match self {
            Applied::Transitioned { alerts, .. } | Applied::Canceled { alerts, .. } => alerts,
            _ => &[],
        }
    }

    /// Callbacks to fire for this outcome, in order
    pub fn notifications(&self) -> Vec<(CallbackCategory, serde_json::Value)> {
        let mut out = Vec::new();

        match self {
            Applied::Created {
                order,
                confirmed_upstream,
            } => out.push((
                CallbackCategory::NewOrder,
                json!({ "order": order, "confirmed_upstream": confirmed_upstream }),
            )),
            Applied::Transitioned {
                order_id,
                from,
                to,
                code,
                ..
            } => out.push((
                CallbackCategory::StatusChanged,
                json!({ "order_id": order_id, "from": from, "to": to, "code": code.as_str() }),
            )),
            Applied::Canceled {
                order_id,
                restocked: true,
                ..
            } => out.push((CallbackCategory::OrderCanceled, json!({ "order_id": order_id }))),
            Applied::DriverAssigned { order_id, driver } => out.push((
                CallbackCategory::DriverAssigned,
                json!({ "order_id": order_id, "driver": driver }),
            )),
            Applied::Merchant(status) => {
                let payload = json!({ "status": status });
                if status.is_offline() {
                    out.push((CallbackCategory::MerchantOffline, payload.clone()));
                }
                out.push((CallbackCategory::MerchantStatus, payload));
            }
            _ => {}
        }

        for alert in self.alerts() {
            out.push((CallbackCategory::Alert, json!({ "alert": alert })));
        }
        out
    }
}

pub struct OrderLifecycleEngine {
    store: Arc<dyn OrderStore>,
    upstream: Arc<dyn UpstreamClient>,
    options: EngineOptions,
}

impl OrderLifecycleEngine {
    pub fn new(store: Arc<dyn OrderStore>, upstream: Arc<dyn UpstreamClient>, options: EngineOptions) -> Self {
        Self {
            store,
            upstream,
            options,
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    pub async fn apply(&self, event: &Event) -> Result<Applied, ProcessingError> {
        match &event.code {
            EventCode::MerchantStatus => {
                let status: MerchantStatus = serde_json::from_value(event.payload.clone())
                    .map_err(|e| ProcessingError::Malformed(format!("merchant status payload: {e}")))?;
                Ok(Applied::Merchant(status))
            }
            EventCode::Placed => self.place(required_order(event)?, event).await,
            EventCode::Canceled => self.cancel(required_order(event)?).await,
            EventCode::DriverAssigned => self.assign_driver(required_order(event)?, event).await,
            code => match code.target_status() {
                Some(target) => self.transition(required_order(event)?, code, target).await,
                None => {
                    tracing::debug!(code = %code, order_id = ?event.order_id, "Event code has no local effect");
                    Ok(Applied::Ignored(code.clone()))
                }
            },
        }
    }

    // ------------------------------------------------------------------------
    // Placement
    // ------------------------------------------------------------------------

    async fn place(&self, order_id: &OrderId, event: &Event) -> Result<Applied, ProcessingError> {
        if self.store.find_order(order_id).await?.is_some() {
            return Ok(Applied::Unchanged {
                order_id: order_id.clone(),
                reason: "already placed",
            });
        }

        let detail = match self.upstream.order_detail(order_id).await {
            Ok(detail) => detail,
            Err(err @ (UpstreamError::NotFound(_) | UpstreamError::Decode(_) | UpstreamError::Rejected { .. })) => {
                return Err(self
                    .reject(order_id, format!("order detail unavailable: {err}"))
                    .await);
            }
            Err(err) => return Err(err.into()),
        };

        if let Err(rule) = validate_lines(
            detail.items.iter().map(|item| (item.product_id(), item.quantity)),
            detail.total_cents(),
        ) {
            return Err(self.reject(order_id, rule.to_string()).await);
        }

        let new_order = build_new_order(order_id, &detail, event);
        let order = new_order.order.clone();

        match self.store.place_order(new_order).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists { .. }) => {
                return Ok(Applied::Unchanged {
                    order_id: order_id.clone(),
                    reason: "already placed",
                });
            }
            Err(StoreError::InsufficientStock {
                product_id,
                requested,
                available,
            }) => {
                let reason = format!(
                    "insufficient stock for {product_id}: requested {requested}, available {available}"
                );
                tracing::warn!(order_id = %order_id, product_id = %product_id, requested, available, "Stock shortfall, order not created");
                self.cancel_upstream(order_id).await;
                return Err(self.reject(order_id, reason).await);
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            order_id = %order_id,
            items = detail.items.len(),
            total_cents = order.total_cents,
            "✅ Order created"
        );

        let confirmed_upstream = self.options.auto_confirm && self.confirm_upstream(order_id).await;

        Ok(Applied::Created {
            order,
            confirmed_upstream,
        })
    }

    async fn confirm_upstream(&self, order_id: &OrderId) -> bool {
        match self.upstream.confirm_order(order_id).await {
            Ok(()) => {
                tracing::info!(order_id = %order_id, "Order confirmed upstream");
                true
            }
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "Upstream confirmation failed");
                false
            }
        }
    }

    async fn cancel_upstream(&self, order_id: &OrderId) {
        if !self.options.cancel_on_stock_shortfall {
            return;
        }
        if let Err(e) = self
            .upstream
            .request_cancellation(order_id, "Item indisponível", &self.options.cancellation_reason_code)
            .await
        {
            tracing::warn!(order_id = %order_id, error = %e, "Upstream cancellation request failed");
        }
    }

    // ------------------------------------------------------------------------
    // Status transitions
    // ------------------------------------------------------------------------

    async fn transition(
        &self,
        order_id: &OrderId,
        code: &EventCode,
        target: OrderStatus,
    ) -> Result<Applied, ProcessingError> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(order) = self.store.find_order(order_id).await? else {
                return Err(self.reject(order_id, format!("{code} received for unknown order")).await);
            };
            let current = order.status;
            let step = current.step_to(target);

            match step {
                StatusStep::Same => {
                    if target == OrderStatus::Delivered {
                        // Finish a payment confirmation an earlier attempt may have missed
                        self.settle_payment(order_id, false).await?;
                    }
                    return Ok(Applied::Unchanged {
                        order_id: order_id.clone(),
                        reason: "status already recorded",
                    });
                }
                StatusStep::Backward => {
                    tracing::debug!(order_id = %order_id, code = %code, current = %current, "Stale lifecycle event ignored");
                    return Ok(Applied::Unchanged {
                        order_id: order_id.clone(),
                        reason: "stale status",
                    });
                }
                StatusStep::Next | StatusStep::Skip => {
                    if !self.store.transition_status(order_id, current, target).await? {
                        tracing::debug!(order_id = %order_id, attempt, "Concurrent status change, re-reading order");
                        continue;
                    }

                    let mut alerts = Vec::new();
                    if step == StatusStep::Skip {
                        tracing::warn!(order_id = %order_id, code = %code, from = %current, to = %target, "⚠️ Out-of-order transition applied");
                        alerts.extend(
                            self.raise_alert(
                                order_id,
                                format!("out-of-order transition {current} -> {target} on {code}"),
                            )
                            .await?,
                        );
                    }
                    if target == OrderStatus::Delivered {
                        if let Some(alert) = self.settle_payment(order_id, true).await? {
                            alerts.push(alert);
                        }
                    }

                    tracing::info!(order_id = %order_id, code = %code, from = %current, to = %target, "Order status changed");
                    return Ok(Applied::Transitioned {
                        order_id: order_id.clone(),
                        from: current,
                        to: target,
                        code: code.clone(),
                        alerts,
                    });
                }
            }
        }

        Err(StoreError::Conflict(format!("order {order_id} kept changing during {code}")).into())
    }

    /// Pending -> Confirmed on delivery. A canceled payment on a delivered
    /// order is an inconsistency worth an alert.
    async fn settle_payment(
        &self,
        order_id: &OrderId,
        alert_on_canceled: bool,
    ) -> Result<Option<CashAlert>, ProcessingError> {
        let Some(payment) = self.store.find_payment(order_id).await? else {
            tracing::warn!(order_id = %order_id, "Delivered order has no payment row");
            return Ok(None);
        };

        match payment.status {
            PaymentStatus::Pending => {
                self.store
                    .set_payment_status(order_id, PaymentStatus::Pending, PaymentStatus::Confirmed)
                    .await?;
                Ok(None)
            }
            PaymentStatus::Confirmed => Ok(None),
            PaymentStatus::Canceled if alert_on_canceled => Ok(self
                .raise_alert(order_id, "order delivered with a canceled payment".to_string())
                .await?),
            PaymentStatus::Canceled => Ok(None),
        }
    }

    // ------------------------------------------------------------------------
    // Cancellation & driver
    // ------------------------------------------------------------------------

    async fn cancel(&self, order_id: &OrderId) -> Result<Applied, ProcessingError> {
        let Some(order) = self.store.find_order(order_id).await? else {
            return Err(self.reject(order_id, "cancellation for unknown order".to_string()).await);
        };

        if order.status == OrderStatus::Delivered {
            let Some(alert) = self
                .raise_alert(order_id, "cancellation received for a delivered order".to_string())
                .await?
            else {
                return Ok(Applied::Unchanged {
                    order_id: order_id.clone(),
                    reason: "cancellation already flagged",
                });
            };
            return Ok(Applied::Canceled {
                order_id: order_id.clone(),
                restocked: false,
                alerts: vec![alert],
            });
        }

        if !self.store.cancel_order(order_id).await? {
            return Ok(Applied::Unchanged {
                order_id: order_id.clone(),
                reason: "already canceled",
            });
        }

        tracing::info!(order_id = %order_id, "Order canceled, stock returned");
        Ok(Applied::Canceled {
            order_id: order_id.clone(),
            restocked: true,
            alerts: Vec::new(),
        })
    }

    async fn assign_driver(&self, order_id: &OrderId, event: &Event) -> Result<Applied, ProcessingError> {
        let Some(driver) = driver_from_metadata(&event.payload) else {
            tracing::debug!(order_id = %order_id, "Driver event without driver data");
            return Ok(Applied::Ignored(event.code.clone()));
        };

        let Some(order) = self.store.find_order(order_id).await? else {
            return Err(self.reject(order_id, "driver assigned to unknown order".to_string()).await);
        };
        if order.driver_id.as_deref() == Some(driver.id.as_str()) {
            return Ok(Applied::Unchanged {
                order_id: order_id.clone(),
                reason: "driver already assigned",
            });
        }

        self.store.upsert_driver(&driver).await?;
        self.store.assign_driver(order_id, &driver.id).await?;

        tracing::info!(order_id = %order_id, driver_id = %driver.id, "Driver assigned");
        Ok(Applied::DriverAssigned {
            order_id: order_id.clone(),
            driver,
        })
    }

    // ------------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------------

    /// Returns `None` when the same alert is already active for the order,
    /// so a redelivered event does not flag the order twice.
    async fn raise_alert(&self, order_id: &OrderId, message: String) -> Result<Option<CashAlert>, StoreError> {
        if let Some(existing) = self.store.find_active_alert(order_id, &message).await? {
            tracing::debug!(order_id = %order_id, alert_id = %existing.id, "Cash alert already active");
            return Ok(None);
        }

        let alert = CashAlert::new(order_id.clone(), message);
        self.store.create_alert(&alert).await?;
        tracing::warn!(order_id = %order_id, alert_id = %alert.id, message = %alert.message, "🚨 Cash alert raised");
        Ok(Some(alert))
    }

    /// Record an alert and turn the reason into a rejection
    async fn reject(&self, order_id: &OrderId, reason: String) -> ProcessingError {
        match self.raise_alert(order_id, reason.clone()).await {
            Ok(alert) => ProcessingError::Rejected {
                order_id: order_id.clone(),
                reason,
                alert,
            },
            Err(e) => e.into(),
        }
    }
}

fn required_order(event: &Event) -> Result<&OrderId, ProcessingError> {
    event
        .order_id
        .as_ref()
        .ok_or_else(|| ProcessingError::Malformed(format!("{} event without order id", event.code)))
}

fn build_new_order(order_id: &OrderId, detail: &OrderDetail, event: &Event) -> NewOrder {
    let customer = match &detail.customer {
        Some(c) => Customer {
            id: c.id.clone(),
            name: c.name.clone(),
            phone: c.phone.as_ref().and_then(|p| p.number.clone()),
        },
        None => Customer {
            id: ANONYMOUS_CUSTOMER.to_string(),
            name: "Anonymous".to_string(),
            phone: None,
        },
    };

    let mut products: BTreeMap<String, Product> = BTreeMap::new();
    let mut items = Vec::with_capacity(detail.items.len());
    for item in &detail.items {
        let product_id = item.product_id().to_string();
        products.entry(product_id.clone()).or_insert_with(|| Product {
            id: product_id.clone(),
            name: item.name.clone(),
            price_cents: to_cents(item.unit_price).max(0),
        });
        items.push(OrderItem {
            order_id: order_id.clone(),
            product_id,
            quantity: item.quantity,
            note: item.observations.clone().filter(|note| !note.is_empty()),
        });
    }

    let created_at = detail.created_at.unwrap_or(event.created_at);

    NewOrder {
        order: Order {
            id: order_id.clone(),
            display_id: detail.display_id.clone(),
            customer_id: customer.id.clone(),
            driver_id: None,
            status: OrderStatus::Preparing,
            total_cents: detail.total_cents(),
            payment_method: detail.payment_method(),
            created_at,
        },
        payment: Payment {
            id: uuid::Uuid::new_v4(),
            order_id: order_id.clone(),
            status: PaymentStatus::Pending,
            payment_type: detail.payment_type(),
            updated_at: created_at,
        },
        customer,
        products: products.into_values().collect(),
        items,
    }
}

fn driver_from_metadata(metadata: &serde_json::Value) -> Option<Driver> {
    let id = metadata.get("workerExternalUuid")?.as_str()?.trim();
    if id.is_empty() {
        return None;
    }
    Some(Driver {
        id: id.to_string(),
        name: metadata
            .get("workerName")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown driver")
            .to_string(),
        phone: metadata
            .get("workerPhone")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

// ============================================================================
// Unit Tests
// ============================================================================
