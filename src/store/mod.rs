// ============================================================================
// Order Store
// ============================================================================
//
// Persistence boundary of the lifecycle engine. Two implementations:
// - InMemoryOrderStore: one lock over all tables, used by tests and when no
//   DATABASE_URL is configured
// - PgOrderStore: sqlx/Postgres, schema in migrations/
//
// Concurrency contract shared by both:
// - place_order is all-or-nothing, including the inventory decrement
// - status and payment changes are compare-and-set on the expected previous
//   value, so two writers cannot both advance the same order
//
// ============================================================================

pub mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::{AlertStatus, OrderStatus, PaymentStatus};
use crate::models::{
    CashAlert, Customer, Driver, InventoryRecord, Order, OrderId, OrderItem, Payment, Product,
};

pub use error::StoreError;
pub use memory::InMemoryOrderStore;
pub use postgres::PgOrderStore;

/// Everything created by a placed order, written in one transaction
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer: Customer,
    pub products: Vec<Product>,
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payment: Payment,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    // --- customers ---
    async fn upsert_customer(&self, customer: &Customer) -> Result<(), StoreError>;
    async fn find_customer(&self, id: &str) -> Result<Option<Customer>, StoreError>;
    /// Removes the customer and, by cascade, their orders, items and payments.
    /// Returns whether the customer existed.
    async fn delete_customer(&self, id: &str) -> Result<bool, StoreError>;

    // --- drivers ---
    async fn upsert_driver(&self, driver: &Driver) -> Result<(), StoreError>;
    async fn find_driver(&self, id: &str) -> Result<Option<Driver>, StoreError>;

    // --- products & inventory ---
    async fn upsert_product(&self, product: &Product) -> Result<(), StoreError>;
    async fn find_product(&self, id: &str) -> Result<Option<Product>, StoreError>;
    async fn upsert_inventory(&self, record: &InventoryRecord) -> Result<(), StoreError>;
    async fn find_inventory(&self, product_id: &str) -> Result<Option<InventoryRecord>, StoreError>;

    // --- orders ---
    /// Fails with `AlreadyExists` if the order id is taken and with
    /// `InsufficientStock` if a tracked product would go negative. On any
    /// error nothing is written.
    async fn place_order(&self, new_order: NewOrder) -> Result<(), StoreError>;
    async fn find_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;
    async fn order_items(&self, id: &OrderId) -> Result<Vec<OrderItem>, StoreError>;
    /// Set the status to `next` only if it is currently `expected`.
    /// Returns false when another writer changed it first.
    async fn transition_status(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<bool, StoreError>;
    async fn assign_driver(&self, id: &OrderId, driver_id: &str) -> Result<(), StoreError>;

    // --- payments ---
    async fn find_payment(&self, order_id: &OrderId) -> Result<Option<Payment>, StoreError>;
    /// Compare-and-set on the payment status
    async fn set_payment_status(
        &self,
        order_id: &OrderId,
        expected: PaymentStatus,
        next: PaymentStatus,
    ) -> Result<bool, StoreError>;
    /// Mark the payment Canceled and return the item quantities to tracked
    /// inventory, atomically. Returns false if it was already canceled.
    async fn cancel_order(&self, id: &OrderId) -> Result<bool, StoreError>;

    // --- alerts ---
    async fn create_alert(&self, alert: &CashAlert) -> Result<(), StoreError>;
    async fn list_alerts(&self, status: Option<AlertStatus>) -> Result<Vec<CashAlert>, StoreError>;
    /// Active alert with exactly this order and message, if any
    async fn find_active_alert(&self, order_id: &OrderId, message: &str) -> Result<Option<CashAlert>, StoreError>;
    /// active → resolved. Returns false if it was already resolved.
    async fn resolve_alert(&self, id: Uuid) -> Result<bool, StoreError>;
}
