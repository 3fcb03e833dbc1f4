//! Postgres order store.
//!
//! Orders and invoices are stored as JSONB documents next to the columns
//! needed for lookups; both rows are written in one transaction.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{info, instrument};
use uuid::Uuid;
use crate::domain::aggregates::{Invoice, Order, OrderStatus};
use crate::ports::{OrderStore, StoreError};

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    /// Connects and applies pending migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("order store migrations applied");
        Ok(Self { pool })
    }
}

const ORDER_NUMBER_KEY: &str = "fulfillment_orders_order_number_key";

fn is_order_number_clash(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation() && db.constraint() == Some(ORDER_NUMBER_KEY))
}

fn store_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(db.message().to_string()),
        sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => StoreError::Corrupt(e.to_string()),
        _ => StoreError::Unavailable(e.to_string()),
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    #[instrument(skip_all, fields(order_id = %order.id()))]
    async fn create_order_and_invoice(&self, order: &Order, invoice: &Invoice) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        sqlx::query(
            "INSERT INTO fulfillment_orders (id, order_number, customer_id, status, total, currency, reservation_id, document, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(order.id())
        .bind(order.order_number())
        .bind(order.customer_id().as_str())
        .bind(order.status().as_str())
        .bind(order.total().amount())
        .bind(order.currency())
        .bind(order.reservation_id())
        .bind(Json(order))
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_order_number_clash(&e) {
                StoreError::DuplicateOrderNumber(order.order_number().to_string())
            } else {
                store_error(e)
            }
        })?;
        sqlx::query(
            "INSERT INTO fulfillment_invoices (id, order_id, payment_status, total, due_date, document, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(invoice.id())
        .bind(invoice.order_id())
        .bind(invoice.payment_status().as_str())
        .bind(invoice.total().amount())
        .bind(invoice.due_date())
        .bind(Json(invoice))
        .bind(invoice.created_at())
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;
        tx.commit().await.map_err(store_error)
    }

    #[instrument(skip_all, fields(order_id = %order.id()))]
    async fn update_order_and_invoice(&self, order: &Order, invoice: &Invoice) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let updated = sqlx::query(
            "UPDATE fulfillment_orders SET status = $2, reservation_id = $3, document = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(order.id())
        .bind(order.status().as_str())
        .bind(order.reservation_id())
        .bind(Json(order))
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("order {} does not exist", order.id())));
        }
        sqlx::query("UPDATE fulfillment_invoices SET payment_status = $2, document = $3 WHERE order_id = $1")
            .bind(order.id())
            .bind(invoice.payment_status().as_str())
            .bind(Json(invoice))
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        tx.commit().await.map_err(store_error)
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<(Order, Invoice)>, StoreError> {
        let row = sqlx::query(
            "SELECT o.document AS order_doc, i.document AS invoice_doc \
             FROM fulfillment_orders o JOIN fulfillment_invoices i ON i.order_id = o.id WHERE o.id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;
        let Some(row) = row else { return Ok(None) };
        let Json(order): Json<Order> = row.try_get("order_doc").map_err(store_error)?;
        let Json(invoice): Json<Invoice> = row.try_get("invoice_doc").map_err(store_error)?;
        Ok(Some((order, invoice)))
    }

    async fn find_orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query("SELECT document FROM fulfillment_orders WHERE status = $1 ORDER BY created_at")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        rows.iter()
            .map(|row| {
                let Json(order): Json<Order> = row.try_get("document").map_err(store_error)?;
                Ok(order)
            })
            .collect()
    }
}
