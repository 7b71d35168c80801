use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{NewOrder, OrderStore, StoreError};
use crate::domain::order::{demand_by_product, AlertStatus, OrderStatus, PaymentStatus};
use crate::models::{
    CashAlert, Customer, Driver, InventoryRecord, Order, OrderId, OrderItem, Payment, Product,
};

// ============================================================================
// In-Memory Order Store
// ============================================================================
//
// All tables live behind one lock, so every operation is a transaction.
// Enforces the same constraints as the Postgres schema: quantities > 0,
// stock >= 0, one payment per order, customer cascade.
//
// ============================================================================

#[derive(Default)]
struct Tables {
    customers: HashMap<String, Customer>,
    drivers: HashMap<String, Driver>,
    products: HashMap<String, Product>,
    inventory: HashMap<String, InventoryRecord>,
    orders: BTreeMap<OrderId, Order>,
    items: HashMap<OrderId, Vec<OrderItem>>,
    payments: HashMap<OrderId, Payment>,
    alerts: Vec<CashAlert>,
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    tables: Mutex<Tables>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted orders
    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn upsert_customer(&self, customer: &Customer) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.customers.insert(customer.id.clone(), customer.clone());
        Ok(())
    }

    async fn find_customer(&self, id: &str) -> Result<Option<Customer>, StoreError> {
        Ok(self.tables.lock().await.customers.get(id).cloned())
    }

    async fn delete_customer(&self, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.customers.remove(id).is_none() {
            return Ok(false);
        }

        let owned: Vec<OrderId> = tables
            .orders
            .values()
            .filter(|order| order.customer_id == id)
            .map(|order| order.id.clone())
            .collect();
        for order_id in &owned {
            tables.orders.remove(order_id);
            tables.items.remove(order_id);
            tables.payments.remove(order_id);
        }

        tracing::info!(customer_id = %id, orders = owned.len(), "Customer deleted with cascade");
        Ok(true)
    }

    async fn upsert_driver(&self, driver: &Driver) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.drivers.insert(driver.id.clone(), driver.clone());
        Ok(())
    }

    async fn find_driver(&self, id: &str) -> Result<Option<Driver>, StoreError> {
        Ok(self.tables.lock().await.drivers.get(id).cloned())
    }

    async fn upsert_product(&self, product: &Product) -> Result<(), StoreError> {
        if product.price_cents < 0 {
            return Err(StoreError::Constraint(format!(
                "product {} has negative price",
                product.id
            )));
        }
        let mut tables = self.tables.lock().await;
        tables.products.insert(product.id.clone(), product.clone());
        Ok(())
    }

    async fn find_product(&self, id: &str) -> Result<Option<Product>, StoreError> {
        Ok(self.tables.lock().await.products.get(id).cloned())
    }

    async fn upsert_inventory(&self, record: &InventoryRecord) -> Result<(), StoreError> {
        if record.stock_quantity < 0 {
            return Err(StoreError::Constraint(format!(
                "stock for {} cannot be negative",
                record.product_id
            )));
        }
        let mut tables = self.tables.lock().await;
        if !tables.products.contains_key(&record.product_id) {
            return Err(StoreError::Constraint(format!(
                "inventory references unknown product {}",
                record.product_id
            )));
        }
        tables.inventory.insert(record.product_id.clone(), record.clone());
        Ok(())
    }

    async fn find_inventory(&self, product_id: &str) -> Result<Option<InventoryRecord>, StoreError> {
        Ok(self.tables.lock().await.inventory.get(product_id).cloned())
    }

    async fn place_order(&self, new_order: NewOrder) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let order_id = new_order.order.id.clone();

        if tables.orders.contains_key(&order_id) {
            return Err(StoreError::AlreadyExists {
                entity: "order",
                id: order_id.to_string(),
            });
        }
        if let Some(item) = new_order.items.iter().find(|item| item.quantity <= 0) {
            return Err(StoreError::Constraint(format!(
                "quantity for {} must be positive",
                item.product_id
            )));
        }
        for item in &new_order.items {
            let known = tables.products.contains_key(&item.product_id)
                || new_order.products.iter().any(|p| p.id == item.product_id);
            if !known {
                return Err(StoreError::Constraint(format!(
                    "item references unknown product {}",
                    item.product_id
                )));
            }
        }

        // Check every tracked product before touching anything
        let demand = demand_by_product(
            new_order
                .items
                .iter()
                .map(|item| (item.product_id.as_str(), item.quantity)),
        );
        for (product_id, requested) in &demand {
            if let Some(record) = tables.inventory.get(product_id) {
                if record.stock_quantity < *requested {
                    return Err(StoreError::InsufficientStock {
                        product_id: product_id.clone(),
                        requested: *requested,
                        available: record.stock_quantity,
                    });
                }
            }
        }

        for (product_id, requested) in &demand {
            if let Some(record) = tables.inventory.get_mut(product_id) {
                record.stock_quantity -= requested;
            }
        }
        tables
            .customers
            .insert(new_order.customer.id.clone(), new_order.customer);
        for product in new_order.products {
            tables.products.insert(product.id.clone(), product);
        }
        tables.items.insert(order_id.clone(), new_order.items);
        tables.payments.insert(order_id.clone(), new_order.payment);
        tables.orders.insert(order_id, new_order.order);

        Ok(())
    }

    async fn find_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.tables.lock().await.orders.get(id).cloned())
    }

    async fn order_items(&self, id: &OrderId) -> Result<Vec<OrderItem>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .items
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn transition_status(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let order = tables
            .orders
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("order", id.as_str()))?;

        if order.status != expected {
            return Ok(false);
        }
        order.status = next;
        Ok(true)
    }

    async fn assign_driver(&self, id: &OrderId, driver_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.drivers.contains_key(driver_id) {
            return Err(StoreError::Constraint(format!("unknown driver {driver_id}")));
        }
        let order = tables
            .orders
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("order", id.as_str()))?;
        order.driver_id = Some(driver_id.to_string());
        Ok(())
    }

    async fn find_payment(&self, order_id: &OrderId) -> Result<Option<Payment>, StoreError> {
        Ok(self.tables.lock().await.payments.get(order_id).cloned())
    }

    async fn set_payment_status(
        &self,
        order_id: &OrderId,
        expected: PaymentStatus,
        next: PaymentStatus,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let payment = tables
            .payments
            .get_mut(order_id)
            .ok_or_else(|| StoreError::not_found("payment", order_id.as_str()))?;

        if payment.status != expected {
            return Ok(false);
        }
        payment.status = next;
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn cancel_order(&self, id: &OrderId) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let tables = &mut *tables;

        let payment = tables
            .payments
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("payment", id.as_str()))?;
        if payment.status == PaymentStatus::Canceled {
            return Ok(false);
        }
        payment.status = PaymentStatus::Canceled;
        payment.updated_at = Utc::now();

        if let Some(items) = tables.items.get(id) {
            let returned = demand_by_product(
                items
                    .iter()
                    .map(|item| (item.product_id.as_str(), item.quantity)),
            );
            for (product_id, quantity) in returned {
                if let Some(record) = tables.inventory.get_mut(&product_id) {
                    record.stock_quantity += quantity;
                }
            }
        }
        Ok(true)
    }

    async fn create_alert(&self, alert: &CashAlert) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.alerts.iter().any(|a| a.id == alert.id) {
            return Err(StoreError::AlreadyExists {
                entity: "cash_alert",
                id: alert.id.to_string(),
            });
        }
        tables.alerts.push(alert.clone());
        Ok(())
    }

    async fn list_alerts(&self, status: Option<AlertStatus>) -> Result<Vec<CashAlert>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .alerts
            .iter()
            .filter(|alert| status.map_or(true, |s| alert.status == s))
            .cloned()
            .collect())
    }

    async fn find_active_alert(&self, order_id: &OrderId, message: &str) -> Result<Option<CashAlert>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .alerts
            .iter()
            .find(|alert| alert.status == AlertStatus::Active && &alert.order_id == order_id && alert.message == message)
            .cloned())
    }

    async fn resolve_alert(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let alert = tables
            .alerts
            .iter_mut()
            .find(|alert| alert.id == id)
            .ok_or_else(|| StoreError::not_found("cash_alert", id.to_string()))?;

        if alert.status == AlertStatus::Resolved {
            return Ok(false);
        }
        alert.status = AlertStatus::Resolved;
        Ok(true)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
