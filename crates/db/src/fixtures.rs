//! Deterministic demo catalog used by `chatcart seed` and the integration
//! suites.

use rust_decimal::Decimal;

use chatcart_core::{Product, ProductId};

use crate::DbPool;

pub fn demo_products() -> Vec<Product> {
    vec![
        Product {
            id: ProductId(1),
            name: "Ham and cheese empanada".to_string(),
            description: "Baked empanada filled with ham and mozzarella".to_string(),
            price: Decimal::new(250, 2),
            stock: 24,
        },
        Product {
            id: ProductId(2),
            name: "Beef empanada".to_string(),
            description: "Hand-cut beef, olives and egg".to_string(),
            price: Decimal::new(275, 2),
            stock: 18,
        },
        Product {
            id: ProductId(3),
            name: "Spinach tart".to_string(),
            description: "Whole spinach tart with ricotta".to_string(),
            price: Decimal::new(1200, 2),
            stock: 6,
        },
        Product {
            id: ProductId(4),
            name: "Lemonade 500ml".to_string(),
            description: "Fresh lemonade with mint and ginger".to_string(),
            price: Decimal::new(180, 2),
            stock: 40,
        },
    ]
}

/// Inserts the demo catalog if the products table is empty. Returns the
/// number of rows inserted (zero when the catalog was already seeded).
pub async fn seed_demo_catalog(pool: &DbPool) -> Result<u64, sqlx::Error> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products").fetch_one(pool).await?;
    if existing > 0 {
        return Ok(0);
    }

    let mut inserted = 0;
    for product in demo_products() {
        sqlx::query(
            "INSERT INTO products (id, name, description, price, stock) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(product.id.0)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.to_string())
        .bind(product.stock)
        .execute(pool)
        .await?;
        inserted += 1;
    }
    Ok(inserted)
}
