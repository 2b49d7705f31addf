//! In-memory `CartBackend` with the same guard semantics as the SQL
//! implementation. Used by tests and anywhere a database is overkill.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use chatcart_core::{
    BackendError, Cart, CartBackend, CartId, CartLine, CartLineRequest, Product, ProductId,
    StockDelta,
};

#[derive(Default)]
struct MemoryState {
    products: BTreeMap<ProductId, Product>,
    carts: BTreeMap<CartId, BTreeMap<ProductId, i64>>,
    next_cart_id: i64,
}

#[derive(Default)]
pub struct InMemoryCartBackend {
    state: Mutex<MemoryState>,
}

impl InMemoryCartBackend {
    pub fn new() -> Self {
        Self { state: Mutex::new(MemoryState { next_cart_id: 1, ..MemoryState::default() }) }
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.state.try_lock().expect("fresh backend is uncontended");
            for product in products {
                state.products.insert(product.id, product);
            }
        }
        backend
    }

    pub async fn insert_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    pub async fn product_stock(&self, id: ProductId) -> Option<i64> {
        self.state.lock().await.products.get(&id).map(|product| product.stock)
    }

    pub async fn cart_count(&self) -> usize {
        self.state.lock().await.carts.len()
    }

    fn snapshot(state: &MemoryState, cart_id: CartId) -> Cart {
        let lines = state
            .carts
            .get(&cart_id)
            .map(|lines| {
                lines
                    .iter()
                    .map(|(product_id, quantity)| CartLine {
                        product_id: *product_id,
                        quantity: *quantity,
                        product: state.products[product_id].clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Cart { id: cart_id, lines }
    }
}

#[async_trait]
impl CartBackend for InMemoryCartBackend {
    async fn find_products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, BackendError> {
        let state = self.state.lock().await;
        Ok(ids.iter().filter_map(|id| state.products.get(id).cloned()).collect())
    }

    async fn search_products(&self, query: Option<&str>) -> Result<Vec<Product>, BackendError> {
        let state = self.state.lock().await;
        let needle = query.map(str::trim).filter(|q| !q.is_empty()).map(str::to_lowercase);
        Ok(state
            .products
            .values()
            .filter(|product| match &needle {
                Some(needle) => {
                    product.name.to_lowercase().contains(needle)
                        || product.description.to_lowercase().contains(needle)
                }
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn create_cart_atomic(&self, lines: &[CartLineRequest]) -> Result<Cart, BackendError> {
        let mut state = self.state.lock().await;

        for line in lines {
            let product = state
                .products
                .get(&line.product_id)
                .ok_or_else(|| BackendError::Unavailable(format!("product {} lost", line.product_id)))?;
            if product.stock < line.quantity {
                return Err(BackendError::StockConflict);
            }
        }

        for line in lines {
            state.products.get_mut(&line.product_id).expect("checked above").stock -= line.quantity;
        }

        let cart_id = CartId(state.next_cart_id);
        state.next_cart_id += 1;
        state.carts.insert(cart_id, lines.iter().map(|l| (l.product_id, l.quantity)).collect());
        Ok(Self::snapshot(&state, cart_id))
    }

    async fn update_cart_atomic(
        &self,
        cart_id: CartId,
        delete_ids: &[ProductId],
        upserts: &[CartLineRequest],
        stock_deltas: &[StockDelta],
    ) -> Result<Cart, BackendError> {
        let mut state = self.state.lock().await;

        if !state.carts.contains_key(&cart_id) {
            return Err(BackendError::Unavailable(format!("cart {cart_id} no longer exists")));
        }

        for delta in stock_deltas {
            let product = state
                .products
                .get(&delta.product_id)
                .ok_or_else(|| BackendError::Unavailable(format!("product {} lost", delta.product_id)))?;
            if delta.delta > 0 && product.stock < delta.delta {
                return Err(BackendError::StockConflict);
            }
        }

        for delta in stock_deltas {
            state.products.get_mut(&delta.product_id).expect("checked above").stock -= delta.delta;
        }

        let cart = state.carts.get_mut(&cart_id).expect("checked above");
        for product_id in delete_ids {
            cart.remove(product_id);
        }
        for upsert in upserts {
            cart.insert(upsert.product_id, upsert.quantity);
        }

        Ok(Self::snapshot(&state, cart_id))
    }

    async fn get_cart_with_lines(&self, cart_id: CartId) -> Result<Option<Cart>, BackendError> {
        let state = self.state.lock().await;
        Ok(state.carts.contains_key(&cart_id).then(|| Self::snapshot(&state, cart_id)))
    }
}
