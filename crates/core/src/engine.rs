//! The Cart Transaction Engine: stock validation, delta-based update, and
//! the shortfall negotiation semantics, all against an abstract backend.
//!
//! The backend owns atomicity. Every mutating call either commits the cart
//! change and its stock movements together or leaves both untouched; a
//! guarded mutation that loses a race reports [`BackendError::StockConflict`]
//! and the engine renegotiates instead of overselling.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::cart::{
    dedupe_lines, plan_update, Cart, CartId, CartLineRequest, CartOutcome, StockDelta,
    StockShortfall, UpdatePlan,
};
use crate::domain::product::{Product, ProductId};
use crate::errors::{BackendError, CartError};

/// The product/cart collaborator consumed by the engine. Implementations
/// must make `create_cart_atomic` and `update_cart_atomic` transactional:
/// cart rows and stock adjustments commit together or not at all.
#[async_trait]
pub trait CartBackend: Send + Sync {
    async fn find_products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, BackendError>;

    /// Catalog search over name/description; `None` lists everything.
    async fn search_products(&self, query: Option<&str>) -> Result<Vec<Product>, BackendError>;

    /// Persists a new cart with `lines` and decrements stock for each line,
    /// as one transaction. Guards must fail with `StockConflict` rather than
    /// drive stock negative.
    async fn create_cart_atomic(&self, lines: &[CartLineRequest]) -> Result<Cart, BackendError>;

    /// Applies a computed plan: deletes, upserts, then adjusts stock by
    /// `-delta` per changed product, as one transaction.
    async fn update_cart_atomic(
        &self,
        cart_id: CartId,
        delete_ids: &[ProductId],
        upserts: &[CartLineRequest],
        stock_deltas: &[StockDelta],
    ) -> Result<Cart, BackendError>;

    async fn get_cart_with_lines(&self, cart_id: CartId) -> Result<Option<Cart>, BackendError>;
}

/// Result of a batch stock check: the products that were found and the lines
/// that asked for more than is available. Missing ids never appear here;
/// they are a hard error.
#[derive(Clone, Debug)]
pub struct StockValidation {
    pub products: HashMap<ProductId, Product>,
    pub shortfalls: Vec<StockShortfall>,
}

pub struct CartEngine<B> {
    backend: Arc<B>,
}

impl<B> CartEngine<B>
where
    B: CartBackend,
{
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Fetches live stock for every referenced product in one batch. Ids not
    /// found are a `ProductsNotFound` error listing all of them; lines whose
    /// quantity exceeds available stock become shortfalls.
    pub async fn validate_stock(
        &self,
        lines: &[CartLineRequest],
    ) -> Result<StockValidation, CartError> {
        let ids: Vec<ProductId> = {
            let mut ids: Vec<ProductId> = lines.iter().map(|line| line.product_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };

        let products = self.backend.find_products_by_ids(&ids).await?;
        let by_id: HashMap<ProductId, Product> =
            products.into_iter().map(|product| (product.id, product)).collect();

        let missing: Vec<ProductId> =
            ids.iter().copied().filter(|id| !by_id.contains_key(id)).collect();
        if !missing.is_empty() {
            return Err(CartError::ProductsNotFound(missing));
        }

        let shortfalls = lines
            .iter()
            .filter_map(|line| {
                let product = &by_id[&line.product_id];
                (line.quantity > product.stock).then(|| StockShortfall {
                    product_id: line.product_id,
                    product_name: product.name.clone(),
                    available_stock: product.stock,
                    requested_quantity: line.quantity,
                })
            })
            .collect();

        Ok(StockValidation { products: by_id, shortfalls })
    }

    /// Creates a cart from the requested lines. Shortfalls come back as a
    /// result variant with nothing mutated; only a fully satisfiable request
    /// commits, atomically with its stock decrements.
    pub async fn create_cart(&self, lines: &[CartLineRequest]) -> Result<CartOutcome, CartError> {
        let effective: Vec<CartLineRequest> =
            dedupe_lines(lines).into_iter().filter(|line| line.quantity > 0).collect();
        if effective.is_empty() {
            return Err(CartError::InvalidRequest(
                "the request contains no purchasable lines".to_string(),
            ));
        }

        let validation = self.validate_stock(&effective).await?;
        if !validation.shortfalls.is_empty() {
            debug!(shortfalls = validation.shortfalls.len(), "create blocked by stock");
            return Ok(CartOutcome::Shortfall { shortfalls: validation.shortfalls });
        }

        match self.backend.create_cart_atomic(&effective).await {
            Ok(cart) => Ok(CartOutcome::Realized(cart)),
            Err(BackendError::StockConflict) => {
                warn!("stock moved under a cart create; revalidating");
                let revalidation = self.validate_stock(&effective).await?;
                if !revalidation.shortfalls.is_empty() {
                    return Ok(CartOutcome::Shortfall { shortfalls: revalidation.shortfalls });
                }
                let cart = self.backend.create_cart_atomic(&effective).await?;
                Ok(CartOutcome::Realized(cart))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Reconciles a cart toward `desired` as its final state. Only net
    /// additions are stock-checked; reductions and removals always succeed
    /// and release stock. Nothing is mutated when a shortfall is reported.
    pub async fn update_cart(
        &self,
        cart_id: CartId,
        desired: &[CartLineRequest],
    ) -> Result<CartOutcome, CartError> {
        if desired.is_empty() {
            return Err(CartError::InvalidRequest("no cart lines were requested".to_string()));
        }

        let current =
            self.backend.get_cart_with_lines(cart_id).await?.ok_or(CartError::CartNotFound(cart_id))?;
        let current_lines = current.line_requests();

        let plan = plan_update(&current_lines, desired);
        if plan.is_noop() {
            return Err(CartError::InvalidRequest(
                "the requested lines leave the cart unchanged".to_string(),
            ));
        }

        if let Some(shortfalls) = self.validate_update(&current_lines, desired, &plan).await? {
            debug!(cart_id = cart_id.0, shortfalls = shortfalls.len(), "update blocked by stock");
            return Ok(CartOutcome::Shortfall { shortfalls });
        }

        match self.apply_update(cart_id, &plan).await {
            Ok(cart) => Ok(CartOutcome::Realized(cart)),
            Err(BackendError::StockConflict) => {
                warn!(cart_id = cart_id.0, "stock moved under a cart update; revalidating");
                if let Some(shortfalls) =
                    self.validate_update(&current_lines, desired, &plan).await?
                {
                    return Ok(CartOutcome::Shortfall { shortfalls });
                }
                let cart = self.apply_update(cart_id, &plan).await?;
                Ok(CartOutcome::Realized(cart))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Checks the plan's net additions against live stock. Shortfalls are
    /// phrased in terms of the desired line: `available_stock` is what the
    /// cart could at most hold (current quantity plus free stock), so a
    /// confirmed `adjust_to_available` retry succeeds against unchanged
    /// stock.
    async fn validate_update(
        &self,
        current_lines: &[CartLineRequest],
        desired: &[CartLineRequest],
        plan: &UpdatePlan,
    ) -> Result<Option<Vec<StockShortfall>>, CartError> {
        let additions: Vec<CartLineRequest> = plan
            .positive_deltas()
            .map(|delta| CartLineRequest { product_id: delta.product_id, quantity: delta.delta })
            .collect();
        if additions.is_empty() {
            return Ok(None);
        }

        let validation = self.validate_stock(&additions).await?;
        if validation.shortfalls.is_empty() {
            return Ok(None);
        }

        let current_qty = |id: ProductId| {
            current_lines
                .iter()
                .find(|line| line.product_id == id)
                .map(|line| line.quantity)
                .unwrap_or(0)
        };
        let desired_qty = |id: ProductId| {
            desired
                .iter()
                .rev()
                .find(|line| line.product_id == id)
                .map(|line| line.quantity)
                .unwrap_or(0)
        };

        let shortfalls = validation
            .shortfalls
            .into_iter()
            .map(|shortfall| StockShortfall {
                available_stock: current_qty(shortfall.product_id) + shortfall.available_stock,
                requested_quantity: desired_qty(shortfall.product_id),
                ..shortfall
            })
            .collect();
        Ok(Some(shortfalls))
    }

    async fn apply_update(&self, cart_id: CartId, plan: &UpdatePlan) -> Result<Cart, BackendError> {
        self.backend
            .update_cart_atomic(cart_id, &plan.delete_ids, &plan.upserts, &plan.stock_deltas)
            .await
    }
}
