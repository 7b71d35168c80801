use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use super::{NewOrder, OrderStore, StoreError};
use crate::domain::order::{demand_by_product, AlertStatus, OrderError, OrderStatus, PaymentStatus};
use crate::models::{
    CashAlert, Customer, Driver, InventoryRecord, Order, OrderId, OrderItem, Payment, Product,
};

// ============================================================================
// Postgres Order Store
// ============================================================================
//
// Row-level concurrency:
// - place_order runs in one transaction and locks the tracked inventory rows
//   with SELECT ... FOR UPDATE in product-id order, so concurrent placements
//   serialize on the products they share and cannot deadlock
// - status/payment changes are UPDATE ... WHERE status = expected
// - cancel_order locks the payment row, then restocks in product-id order
//
// ============================================================================

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

type OrderRow = (
    String,
    Option<String>,
    String,
    Option<String>,
    String,
    i64,
    String,
    DateTime<Utc>,
);

type PaymentRow = (Uuid, String, String, String, DateTime<Utc>);

type AlertRow = (Uuid, String, String, String, DateTime<Utc>);

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        tracing::info!("Connected to Postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("Database schema is up to date");
        Ok(())
    }
}

fn order_from_row(row: OrderRow) -> Result<Order, StoreError> {
    let (id, display_id, customer_id, driver_id, status, total_cents, payment_method, created_at) =
        row;
    Ok(Order {
        id: OrderId::new(id),
        display_id,
        customer_id,
        driver_id,
        status: status
            .parse()
            .map_err(|e: OrderError| StoreError::Constraint(e.to_string()))?,
        total_cents,
        payment_method,
        created_at,
    })
}

fn payment_from_row(row: PaymentRow) -> Result<Payment, StoreError> {
    let (id, order_id, status, payment_type, updated_at) = row;
    Ok(Payment {
        id,
        order_id: OrderId::new(order_id),
        status: status
            .parse()
            .map_err(|e: OrderError| StoreError::Constraint(e.to_string()))?,
        payment_type,
        updated_at,
    })
}

fn alert_from_row(row: AlertRow) -> Result<CashAlert, StoreError> {
    let (id, order_id, message, status, created_at) = row;
    Ok(CashAlert {
        id,
        order_id: OrderId::new(order_id),
        message,
        status: status
            .parse()
            .map_err(|e: OrderError| StoreError::Constraint(e.to_string()))?,
        created_at,
    })
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn upsert_customer(&self, customer: &Customer) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO customers (id, name, phone) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, phone = EXCLUDED.phone",
        )
        .bind(&customer.id)
        .bind(&customer.name)
        .bind(&customer.phone)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_customer(&self, id: &str) -> Result<Option<Customer>, StoreError> {
        let row: Option<(String, String, Option<String>)> =
            sqlx::query_as("SELECT id, name, phone FROM customers WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name, phone)| Customer { id, name, phone }))
    }

    async fn delete_customer(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM customers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_driver(&self, driver: &Driver) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO delivery_drivers (id, name, phone) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, phone = EXCLUDED.phone",
        )
        .bind(&driver.id)
        .bind(&driver.name)
        .bind(&driver.phone)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_driver(&self, id: &str) -> Result<Option<Driver>, StoreError> {
        let row: Option<(String, String, Option<String>)> =
            sqlx::query_as("SELECT id, name, phone FROM delivery_drivers WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name, phone)| Driver { id, name, phone }))
    }

    async fn upsert_product(&self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO products (id, name, price_cents) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, price_cents = EXCLUDED.price_cents",
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(product.price_cents)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_product(&self, id: &str) -> Result<Option<Product>, StoreError> {
        let row: Option<(String, String, i64)> =
            sqlx::query_as("SELECT id, name, price_cents FROM products WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name, price_cents)| Product {
            id,
            name,
            price_cents,
        }))
    }

    async fn upsert_inventory(&self, record: &InventoryRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO inventory (product_id, stock_quantity, expiration_date) VALUES ($1, $2, $3)
             ON CONFLICT (product_id) DO UPDATE
             SET stock_quantity = EXCLUDED.stock_quantity, expiration_date = EXCLUDED.expiration_date",
        )
        .bind(&record.product_id)
        .bind(record.stock_quantity)
        .bind(record.expiration_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_inventory(&self, product_id: &str) -> Result<Option<InventoryRecord>, StoreError> {
        let row: Option<(String, i32, Option<NaiveDate>)> = sqlx::query_as(
            "SELECT product_id, stock_quantity, expiration_date FROM inventory WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(product_id, stock_quantity, expiration_date)| InventoryRecord {
            product_id,
            stock_quantity,
            expiration_date,
        }))
    }

    async fn place_order(&self, new_order: NewOrder) -> Result<(), StoreError> {
        let NewOrder {
            customer,
            products,
            order,
            items,
            payment,
        } = new_order;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO customers (id, name, phone) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, phone = EXCLUDED.phone",
        )
        .bind(&customer.id)
        .bind(&customer.name)
        .bind(&customer.phone)
        .execute(&mut *tx)
        .await?;

        for product in &products {
            sqlx::query(
                "INSERT INTO products (id, name, price_cents) VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, price_cents = EXCLUDED.price_cents",
            )
            .bind(&product.id)
            .bind(&product.name)
            .bind(product.price_cents)
            .execute(&mut *tx)
            .await?;
        }

        // A concurrent placement of the same id blocks here until the other
        // transaction finishes, then sees the conflict.
        let inserted: Option<(String,)> = sqlx::query_as(
            "INSERT INTO orders (id, display_id, customer_id, driver_id, status, total_cents, payment_method, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO NOTHING
             RETURNING id",
        )
        .bind(order.id.as_str())
        .bind(&order.display_id)
        .bind(&order.customer_id)
        .bind(&order.driver_id)
        .bind(order.status.as_str())
        .bind(order.total_cents)
        .bind(&order.payment_method)
        .bind(order.created_at)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            return Err(StoreError::AlreadyExists {
                entity: "order",
                id: order.id.to_string(),
            });
        }

        let demand = demand_by_product(
            items
                .iter()
                .map(|item| (item.product_id.as_str(), item.quantity)),
        );
        for (product_id, requested) in &demand {
            let stock: Option<(i32,)> = sqlx::query_as(
                "SELECT stock_quantity FROM inventory WHERE product_id = $1 FOR UPDATE",
            )
            .bind(product_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some((available,)) = stock else {
                continue;
            };
            if available < *requested {
                return Err(StoreError::InsufficientStock {
                    product_id: product_id.clone(),
                    requested: *requested,
                    available,
                });
            }

            sqlx::query("UPDATE inventory SET stock_quantity = stock_quantity - $2 WHERE product_id = $1")
                .bind(product_id)
                .bind(*requested)
                .execute(&mut *tx)
                .await?;
        }

        for item in &items {
            sqlx::query(
                "INSERT INTO order_items (order_id, product_id, quantity, note) VALUES ($1, $2, $3, $4)",
            )
            .bind(item.order_id.as_str())
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(&item.note)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO payments (id, order_id, status, payment_type, updated_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(payment.id)
        .bind(payment.order_id.as_str())
        .bind(payment.status.as_str())
        .bind(&payment.payment_type)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(order_id = %order.id, items = items.len(), "Order persisted");
        Ok(())
    }

    async fn find_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(
            "SELECT id, display_id, customer_id, driver_id, status, total_cents, payment_method, created_at
             FROM orders WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(order_from_row).transpose()
    }

    async fn order_items(&self, id: &OrderId) -> Result<Vec<OrderItem>, StoreError> {
        let rows: Vec<(String, String, i32, Option<String>)> = sqlx::query_as(
            "SELECT order_id, product_id, quantity, note FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(order_id, product_id, quantity, note)| OrderItem {
                order_id: OrderId::new(order_id),
                product_id,
                quantity,
                note,
            })
            .collect())
    }

    async fn transition_status(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE orders SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id.as_str())
            .bind(expected.as_str())
            .bind(next.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.find_order(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("order", id.as_str())),
        }
    }

    async fn assign_driver(&self, id: &OrderId, driver_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE orders SET driver_id = $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(driver_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("order", id.as_str()));
        }
        Ok(())
    }

    async fn find_payment(&self, order_id: &OrderId) -> Result<Option<Payment>, StoreError> {
        let row: Option<PaymentRow> = sqlx::query_as(
            "SELECT id, order_id, status, payment_type, updated_at FROM payments WHERE order_id = $1",
        )
        .bind(order_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(payment_from_row).transpose()
    }

    async fn set_payment_status(
        &self,
        order_id: &OrderId,
        expected: PaymentStatus,
        next: PaymentStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE payments SET status = $3, updated_at = $4 WHERE order_id = $1 AND status = $2",
        )
        .bind(order_id.as_str())
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.find_payment(order_id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("payment", order_id.as_str())),
        }
    }

    async fn cancel_order(&self, id: &OrderId) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM payments WHERE order_id = $1 FOR UPDATE")
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await?;

        let Some((status,)) = current else {
            return Err(StoreError::not_found("payment", id.as_str()));
        };
        if status == PaymentStatus::Canceled.as_str() {
            return Ok(false);
        }

        sqlx::query("UPDATE payments SET status = $2, updated_at = $3 WHERE order_id = $1")
            .bind(id.as_str())
            .bind(PaymentStatus::Canceled.as_str())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        let returned: Vec<(String, i32)> = sqlx::query_as(
            "SELECT product_id, SUM(quantity)::INTEGER FROM order_items
             WHERE order_id = $1 GROUP BY product_id ORDER BY product_id",
        )
        .bind(id.as_str())
        .fetch_all(&mut *tx)
        .await?;

        for (product_id, quantity) in &returned {
            sqlx::query("UPDATE inventory SET stock_quantity = stock_quantity + $2 WHERE product_id = $1")
                .bind(product_id)
                .bind(*quantity)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn create_alert(&self, alert: &CashAlert) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO cash_alerts (id, order_id, message, status, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(alert.id)
        .bind(alert.order_id.as_str())
        .bind(&alert.message)
        .bind(alert.status.as_str())
        .bind(alert.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::Conflict(_) => StoreError::AlreadyExists {
                entity: "cash_alert",
                id: alert.id.to_string(),
            },
            other => other,
        })?;
        Ok(())
    }

    async fn list_alerts(&self, status: Option<AlertStatus>) -> Result<Vec<CashAlert>, StoreError> {
        let rows: Vec<AlertRow> = sqlx::query_as(
            "SELECT id, order_id, message, status, created_at FROM cash_alerts
             WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY created_at",
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(alert_from_row).collect()
    }

    async fn find_active_alert(&self, order_id: &OrderId, message: &str) -> Result<Option<CashAlert>, StoreError> {
        let row: Option<AlertRow> = sqlx::query_as(
            "SELECT id, order_id, message, status, created_at FROM cash_alerts
             WHERE order_id = $1 AND message = $2 AND status = 'active'
             ORDER BY created_at LIMIT 1",
        )
        .bind(order_id.as_str())
        .bind(message)
        .fetch_optional(&self.pool)
        .await?;
        row.map(alert_from_row).transpose()
    }

    async fn resolve_alert(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE cash_alerts SET status = 'resolved' WHERE id = $1 AND status = 'active'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM cash_alerts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("cash_alert", id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_status_in_row_is_a_constraint_error() {
        let row: OrderRow = (
            "1".to_string(),
            None,
            "c-1".to_string(),
            None,
            "Shipped".to_string(),
            100,
            "CREDIT".to_string(),
            Utc::now(),
        );
        assert!(matches!(order_from_row(row), Err(StoreError::Constraint(_))));
    }

    #[test]
    fn test_alert_row_conversion() {
        let id = Uuid::new_v4();
        let alert = alert_from_row((
            id,
            "7".to_string(),
            "skipped transition".to_string(),
            "active".to_string(),
            Utc::now(),
        ))
        .unwrap();
        assert_eq!(alert.id, id);
        assert_eq!(alert.status, AlertStatus::Active);
    }

    #[test]
    fn test_schema_declares_every_table() {
        for table in [
            "customers",
            "delivery_drivers",
            "products",
            "inventory",
            "orders",
            "order_items",
            "payments",
            "cash_alerts",
        ] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "missing table {table}"
            );
        }
    }

    // Needs a reachable Postgres: DATABASE_URL=... cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_postgres_place_and_cancel() {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return;
        };
        let store = PgOrderStore::connect(&url).await.unwrap();
        store.migrate().await.unwrap();

        let product = format!("p-{}", Uuid::new_v4());
        let order_id = Uuid::new_v4().to_string();
        store
            .upsert_product(&Product {
                id: product.clone(),
                name: "Pizza".to_string(),
                price_cents: 2500,
            })
            .await
            .unwrap();
        store
            .upsert_inventory(&InventoryRecord {
                product_id: product.clone(),
                stock_quantity: 3,
                expiration_date: None,
            })
            .await
            .unwrap();

        let new_order = crate::testing::new_order(&order_id, "c-pg", &[(product.as_str(), 2)]);
        store.place_order(new_order.clone()).await.unwrap();
        assert!(matches!(
            store.place_order(new_order).await,
            Err(StoreError::AlreadyExists { .. })
        ));
        assert_eq!(store.find_inventory(&product).await.unwrap().unwrap().stock_quantity, 1);

        assert!(store.cancel_order(&OrderId::new(order_id.as_str())).await.unwrap());
        assert_eq!(store.find_inventory(&product).await.unwrap().unwrap().stock_quantity, 3);
    }
}
