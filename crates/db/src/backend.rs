//! SQLite implementation of the core `CartBackend` seam.
//!
//! Both mutating operations run inside a single transaction. Stock
//! decrements are guarded (`stock >= ?`): a guard that matches zero rows
//! aborts the whole transaction with `StockConflict`, so two operations
//! racing over the same product can never jointly oversell it.

use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use chatcart_core::{
    BackendError, Cart, CartBackend, CartId, CartLine, CartLineRequest, Product, ProductId,
    StockDelta,
};

use crate::DbPool;

pub struct SqlCartBackend {
    pool: DbPool,
}

impl SqlCartBackend {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_cart(&self, cart_id: CartId) -> Result<Option<Cart>, BackendError> {
        let exists = sqlx::query("SELECT id FROM carts WHERE id = ?1")
            .bind(cart_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        if exists.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT ci.product_id, ci.qty, p.name, p.description, p.price, p.stock
             FROM cart_items ci
             JOIN products p ON p.id = ci.product_id
             WHERE ci.cart_id = ?1
             ORDER BY ci.product_id",
        )
        .bind(cart_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let lines = rows
            .into_iter()
            .map(|row| {
                let product_id = ProductId(row.get::<i64, _>("product_id"));
                Ok(CartLine {
                    product_id,
                    quantity: row.get::<i64, _>("qty"),
                    product: Product {
                        id: product_id,
                        name: row.get::<String, _>("name"),
                        description: row.get::<String, _>("description"),
                        price: parse_price(&row.get::<String, _>("price"))?,
                        stock: row.get::<i64, _>("stock"),
                    },
                })
            })
            .collect::<Result<Vec<_>, BackendError>>()?;

        Ok(Some(Cart { id: cart_id, lines }))
    }
}

#[async_trait]
impl CartBackend for SqlCartBackend {
    async fn find_products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, BackendError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, name, description, price, stock FROM products WHERE id IN ({placeholders}) ORDER BY id"
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id.0);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(unavailable)?;
        rows.into_iter().map(|row| product_from_row(&row)).collect()
    }

    async fn search_products(&self, query: Option<&str>) -> Result<Vec<Product>, BackendError> {
        let rows = match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(needle) => {
                sqlx::query(
                    "SELECT id, name, description, price, stock FROM products
                     WHERE lower(name) LIKE ?1 OR lower(description) LIKE ?1
                     ORDER BY id",
                )
                .bind(format!("%{}%", needle.to_lowercase()))
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT id, name, description, price, stock FROM products ORDER BY id")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(unavailable)?;

        rows.into_iter().map(|row| product_from_row(&row)).collect()
    }

    async fn create_cart_atomic(&self, lines: &[CartLineRequest]) -> Result<Cart, BackendError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let cart_id = sqlx::query("INSERT INTO carts DEFAULT VALUES")
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?
            .last_insert_rowid();

        for line in lines {
            sqlx::query("INSERT INTO cart_items (cart_id, product_id, qty) VALUES (?1, ?2, ?3)")
                .bind(cart_id)
                .bind(line.product_id.0)
                .bind(line.quantity)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;

            let decremented =
                sqlx::query("UPDATE products SET stock = stock - ?1 WHERE id = ?2 AND stock >= ?1")
                    .bind(line.quantity)
                    .bind(line.product_id.0)
                    .execute(&mut *tx)
                    .await
                    .map_err(unavailable)?;
            if decremented.rows_affected() != 1 {
                tx.rollback().await.ok();
                return Err(BackendError::StockConflict);
            }
        }

        tx.commit().await.map_err(unavailable)?;
        debug!(cart_id, lines = lines.len(), "cart created");

        self.fetch_cart(CartId(cart_id)).await?.ok_or_else(|| {
            BackendError::Decode(format!("cart {cart_id} missing immediately after insert"))
        })
    }

    async fn update_cart_atomic(
        &self,
        cart_id: CartId,
        delete_ids: &[ProductId],
        upserts: &[CartLineRequest],
        stock_deltas: &[StockDelta],
    ) -> Result<Cart, BackendError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let cart_exists = sqlx::query("SELECT id FROM carts WHERE id = ?1")
            .bind(cart_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unavailable)?;
        if cart_exists.is_none() {
            tx.rollback().await.ok();
            return Err(BackendError::Unavailable(format!("cart {cart_id} no longer exists")));
        }

        for product_id in delete_ids {
            sqlx::query("DELETE FROM cart_items WHERE cart_id = ?1 AND product_id = ?2")
                .bind(cart_id.0)
                .bind(product_id.0)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
        }

        for upsert in upserts {
            sqlx::query(
                "INSERT INTO cart_items (cart_id, product_id, qty) VALUES (?1, ?2, ?3)
                 ON CONFLICT (cart_id, product_id) DO UPDATE SET qty = excluded.qty",
            )
            .bind(cart_id.0)
            .bind(upsert.product_id.0)
            .bind(upsert.quantity)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }

        for delta in stock_deltas {
            // positive delta consumes stock and must be guarded; negative
            // delta releases stock unconditionally
            let adjusted = if delta.delta > 0 {
                sqlx::query("UPDATE products SET stock = stock - ?1 WHERE id = ?2 AND stock >= ?1")
                    .bind(delta.delta)
                    .bind(delta.product_id.0)
                    .execute(&mut *tx)
                    .await
            } else {
                sqlx::query("UPDATE products SET stock = stock - ?1 WHERE id = ?2")
                    .bind(delta.delta)
                    .bind(delta.product_id.0)
                    .execute(&mut *tx)
                    .await
            }
            .map_err(unavailable)?;

            if adjusted.rows_affected() != 1 {
                tx.rollback().await.ok();
                return Err(BackendError::StockConflict);
            }
        }

        tx.commit().await.map_err(unavailable)?;
        debug!(cart_id = cart_id.0, deltas = stock_deltas.len(), "cart updated");

        self.fetch_cart(cart_id).await?.ok_or_else(|| {
            BackendError::Decode(format!("cart {cart_id} missing immediately after update"))
        })
    }

    async fn get_cart_with_lines(&self, cart_id: CartId) -> Result<Option<Cart>, BackendError> {
        self.fetch_cart(cart_id).await
    }
}

fn product_from_row(row: &SqliteRow) -> Result<Product, BackendError> {
    Ok(Product {
        id: ProductId(row.get::<i64, _>("id")),
        name: row.get::<String, _>("name"),
        description: row.get::<String, _>("description"),
        price: parse_price(&row.get::<String, _>("price"))?,
        stock: row.get::<i64, _>("stock"),
    })
}

fn parse_price(raw: &str) -> Result<Decimal, BackendError> {
    Decimal::from_str(raw)
        .map_err(|err| BackendError::Decode(format!("invalid price `{raw}`: {err}")))
}

fn unavailable(err: sqlx::Error) -> BackendError {
    BackendError::Unavailable(err.to_string())
}
