//! Test doubles and fixtures shared by the unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::auth::{CredentialError, IssuedToken, TokenSource};
use crate::domain::order::{OrderStatus, PaymentStatus};
use crate::models::{Customer, InventoryRecord, Order, OrderId, OrderItem, Payment, Product};
use crate::store::{InMemoryOrderStore, NewOrder, OrderStore};
use crate::upstream::{
    Event, EventCode, ItemDetail, MerchantStatus, MerchantSummary, OrderDetail, PollCategory,
    UpstreamClient, UpstreamError,
};

const UNIT_PRICE_CENTS: i64 = 2500;

// ============================================================================
// Token source
// ============================================================================

/// Issues "token-1", "token-2", ... after an optional delay, failing first
/// with any queued errors.
pub struct ScriptedTokenSource {
    lifetime: Duration,
    delay: Duration,
    failures: Mutex<VecDeque<CredentialError>>,
    reject_always: bool,
    calls: AtomicUsize,
}

impl ScriptedTokenSource {
    pub fn issuing(lifetime: Duration) -> Self {
        Self {
            lifetime,
            delay: Duration::ZERO,
            failures: Mutex::new(VecDeque::new()),
            reject_always: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject_always: true,
            ..Self::issuing(Duration::from_secs(3600))
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_first(self, errors: Vec<CredentialError>) -> Self {
        *self.failures.lock().unwrap() = errors.into();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for ScriptedTokenSource {
    async fn fetch_token(&self) -> Result<IssuedToken, CredentialError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.reject_always {
            return Err(CredentialError::Rejected("invalid client credentials".to_string()));
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(IssuedToken {
            access_token: format!("token-{n}"),
            expires_in: self.lifetime,
        })
    }
}

// ============================================================================
// Upstream
// ============================================================================

/// In-process upstream: queued poll batches, canned order details and
/// merchant statuses, and a record of every side-effecting call.
#[derive(Default)]
pub struct ScriptedUpstream {
    batches: Mutex<VecDeque<Result<Vec<Event>, UpstreamError>>>,
    details: Mutex<HashMap<OrderId, Result<OrderDetail, UpstreamError>>>,
    merchants: Mutex<Vec<MerchantSummary>>,
    statuses: Mutex<HashMap<String, MerchantStatus>>,
    acked: Mutex<Vec<String>>,
    confirmed: Mutex<Vec<OrderId>>,
    cancellations: Mutex<Vec<OrderId>>,
    auth_failure: AtomicBool,
    hang_polls: AtomicBool,
    hang_acks: AtomicBool,
    panic_polls: AtomicBool,
    calls: AtomicUsize,
    poll_calls: AtomicUsize,
    detail_calls: AtomicUsize,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, batch: Result<Vec<Event>, UpstreamError>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn add_order(&self, detail: OrderDetail) {
        self.details
            .lock()
            .unwrap()
            .insert(OrderId::new(detail.id.as_str()), Ok(detail));
    }

    pub fn fail_detail(&self, order_id: &str, err: UpstreamError) {
        self.details.lock().unwrap().insert(OrderId::new(order_id), Err(err));
    }

    pub fn add_merchant(&self, status: MerchantStatus) {
        self.merchants.lock().unwrap().push(MerchantSummary {
            id: status.merchant_id.clone(),
            name: format!("Merchant {}", status.merchant_id),
            corporate_name: None,
        });
        self.statuses
            .lock()
            .unwrap()
            .insert(status.merchant_id.clone(), status);
    }

    /// Every call fails with an auth error from now on
    pub fn revoke_credentials(&self) {
        self.auth_failure.store(true, Ordering::SeqCst);
    }

    /// Poll requests never complete
    pub fn hang_polls(&self) {
        self.hang_polls.store(true, Ordering::SeqCst);
    }

    /// Acknowledgements never complete
    pub fn hang_acks(&self) {
        self.hang_acks.store(true, Ordering::SeqCst);
    }

    /// The next poll request panics, taking its worker task down
    pub fn panic_on_poll(&self) {
        self.panic_polls.store(true, Ordering::SeqCst);
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn confirmed(&self) -> Vec<OrderId> {
        self.confirmed.lock().unwrap().clone()
    }

    pub fn cancellations(&self) -> Vec<OrderId> {
        self.cancellations.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.auth_failure.load(Ordering::SeqCst) {
            return Err(UpstreamError::Auth("invalid client credentials".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn poll_events(&self, limit: usize) -> Result<Vec<Event>, UpstreamError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.enter()?;
        if self.panic_polls.swap(false, Ordering::SeqCst) {
            panic!("scripted poll failure");
        }
        if self.hang_polls.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(Ok(mut events)) => {
                events.truncate(limit);
                Ok(events)
            }
            Some(Err(err)) => Err(err),
            None => Ok(Vec::new()),
        }
    }

    async fn acknowledge(&self, event_ids: &[String]) -> Result<(), UpstreamError> {
        self.enter()?;
        if self.hang_acks.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.acked.lock().unwrap().extend(event_ids.iter().cloned());
        Ok(())
    }

    async fn order_detail(&self, order_id: &OrderId) -> Result<OrderDetail, UpstreamError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.enter()?;
        self.details
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .unwrap_or_else(|| Err(UpstreamError::NotFound(format!("order {order_id}"))))
    }

    async fn confirm_order(&self, order_id: &OrderId) -> Result<(), UpstreamError> {
        self.enter()?;
        self.confirmed.lock().unwrap().push(order_id.clone());
        Ok(())
    }

    async fn request_cancellation(
        &self,
        order_id: &OrderId,
        _reason: &str,
        _cancellation_code: &str,
    ) -> Result<(), UpstreamError> {
        self.enter()?;
        self.cancellations.lock().unwrap().push(order_id.clone());
        Ok(())
    }

    async fn list_merchants(&self) -> Result<Vec<MerchantSummary>, UpstreamError> {
        self.enter()?;
        Ok(self.merchants.lock().unwrap().clone())
    }

    async fn merchant_status(&self, merchant_id: &str) -> Result<MerchantStatus, UpstreamError> {
        self.enter()?;
        self.statuses
            .lock()
            .unwrap()
            .get(merchant_id)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(format!("merchant {merchant_id}")))
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Order event with an upstream id
pub fn order_event(id: &str, code: EventCode, order_id: &str) -> Event {
    Event {
        id: Some(id.to_string()),
        category: PollCategory::Orders,
        code,
        order_id: Some(OrderId::new(order_id)),
        merchant_id: Some("m-1".to_string()),
        created_at: Utc::now(),
        payload: serde_json::Value::Null,
    }
}

/// Upstream detail with one line per item at a fixed unit price
pub fn order_detail(id: &str, customer_id: &str, items: &[(&str, i32)]) -> OrderDetail {
    let unit = UNIT_PRICE_CENTS as f64 / 100.0;
    let total: f64 = items.iter().map(|(_, qty)| unit * f64::from(*qty)).sum();

    serde_json::from_value(serde_json::json!({
        "id": id,
        "displayId": format!("#{id}"),
        "createdAt": Utc::now(),
        "total": { "orderAmount": total },
        "customer": { "id": customer_id, "name": "Ana", "phone": { "number": "0800 123" } },
        "items": [],
        "payments": { "methods": [{ "method": "CASH", "type": "OFFLINE", "value": total }] }
    }))
    .map(|mut detail: OrderDetail| {
        detail.items = items
            .iter()
            .map(|(product, qty)| ItemDetail {
                id: Some(format!("item-{product}")),
                name: product.to_string(),
                quantity: *qty,
                unit_price: unit,
                total_price: unit * f64::from(*qty),
                observations: None,
                external_code: Some(product.to_string()),
            })
            .collect();
        detail
    })
    .unwrap()
}

/// Everything `place_order` needs for the given lines, status Preparing
pub fn new_order(id: &str, customer_id: &str, items: &[(&str, i32)]) -> NewOrder {
    let order_id = OrderId::new(id);
    let now = Utc::now();
    let total: i64 = items
        .iter()
        .map(|(_, qty)| UNIT_PRICE_CENTS * i64::from(*qty))
        .sum();

    let mut products: Vec<Product> = Vec::new();
    for (product, _) in items {
        if !products.iter().any(|p| p.id == *product) {
            products.push(Product {
                id: product.to_string(),
                name: product.to_string(),
                price_cents: UNIT_PRICE_CENTS,
            });
        }
    }

    NewOrder {
        customer: Customer {
            id: customer_id.to_string(),
            name: "Ana".to_string(),
            phone: None,
        },
        products,
        order: Order {
            id: order_id.clone(),
            display_id: None,
            customer_id: customer_id.to_string(),
            driver_id: None,
            status: OrderStatus::Preparing,
            total_cents: total,
            payment_method: "CASH".to_string(),
            created_at: now,
        },
        items: items
            .iter()
            .map(|(product, qty)| OrderItem {
                order_id: order_id.clone(),
                product_id: product.to_string(),
                quantity: *qty,
                note: None,
            })
            .collect(),
        payment: Payment {
            id: uuid::Uuid::new_v4(),
            order_id,
            status: PaymentStatus::Pending,
            payment_type: "OFFLINE".to_string(),
            updated_at: now,
        },
    }
}

/// Store with the given products tracked at the given stock levels
pub async fn stocked_store(stock: &[(&str, i32)]) -> InMemoryOrderStore {
    let store = InMemoryOrderStore::new();
    for (product, quantity) in stock {
        store
            .upsert_product(&Product {
                id: product.to_string(),
                name: product.to_string(),
                price_cents: UNIT_PRICE_CENTS,
            })
            .await
            .unwrap();
        store
            .upsert_inventory(&InventoryRecord {
                product_id: product.to_string(),
                stock_quantity: *quantity,
                expiration_date: None,
            })
            .await
            .unwrap();
    }
    store
}
