use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::product::{Product, ProductId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CartId(pub i64);

impl std::fmt::Display for CartId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One requested line of a cart. A non-positive quantity means "remove this
/// product from the cart".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineRequest {
    #[serde(alias = "productId")]
    pub product_id: ProductId,
    #[serde(alias = "qty")]
    pub quantity: i64,
}

/// A persisted cart line together with the product snapshot it referenced at
/// read time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub product: Product,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub lines: Vec<CartLine>,
}

impl Cart {
    /// The cart's lines reduced to `{product_id, quantity}` requests, the
    /// shape `plan_update` compares a desired state against.
    pub fn line_requests(&self) -> Vec<CartLineRequest> {
        self.lines
            .iter()
            .map(|line| CartLineRequest { product_id: line.product_id, quantity: line.quantity })
            .collect()
    }
}

/// A reported mismatch between a requested line and available stock.
/// Never an error: shortfalls are first-class negotiable outcomes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    pub product_id: ProductId,
    pub product_name: String,
    pub available_stock: i64,
    pub requested_quantity: i64,
}

/// Outcome of a cart operation: exactly one variant, no field-presence
/// guessing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CartOutcome {
    Realized(Cart),
    Shortfall { shortfalls: Vec<StockShortfall> },
}

impl CartOutcome {
    pub fn shortfalls(&self) -> Option<&[StockShortfall]> {
        match self {
            Self::Realized(_) => None,
            Self::Shortfall { shortfalls } => Some(shortfalls),
        }
    }
}

/// Signed stock movement for one product: positive when the cart grows
/// (stock must shrink), negative when it shrinks (stock is released).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub product_id: ProductId,
    pub delta: i64,
}

/// The minimal mutation set that turns a cart's current lines into a desired
/// state, plus the stock movements the mutation implies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdatePlan {
    pub delete_ids: Vec<ProductId>,
    pub upserts: Vec<CartLineRequest>,
    pub stock_deltas: Vec<StockDelta>,
}

impl UpdatePlan {
    pub fn is_noop(&self) -> bool {
        self.delete_ids.is_empty() && self.upserts.is_empty() && self.stock_deltas.is_empty()
    }

    /// Product ids whose cart quantity grows and therefore need stock.
    pub fn positive_deltas(&self) -> impl Iterator<Item = StockDelta> + '_ {
        self.stock_deltas.iter().copied().filter(|delta| delta.delta > 0)
    }
}

/// Collapses duplicate product ids in a requested line list; the last
/// occurrence wins.
pub fn dedupe_lines(lines: &[CartLineRequest]) -> Vec<CartLineRequest> {
    let mut by_id: BTreeMap<ProductId, i64> = BTreeMap::new();
    for line in lines {
        by_id.insert(line.product_id, line.quantity);
    }
    by_id
        .into_iter()
        .map(|(product_id, quantity)| CartLineRequest { product_id, quantity })
        .collect()
}

/// Computes the delta between a cart's current lines and a desired final
/// state over the union of product ids referenced by either side.
///
/// Desired quantities at or below zero mean removal. Quantities that did not
/// change produce no upsert and no stock movement, so applying the plan
/// consumes or releases exactly the net difference and nothing else.
pub fn plan_update(current: &[CartLineRequest], desired: &[CartLineRequest]) -> UpdatePlan {
    let current_by_id: BTreeMap<ProductId, i64> =
        current.iter().map(|line| (line.product_id, line.quantity)).collect();
    let desired_by_id: BTreeMap<ProductId, i64> =
        dedupe_lines(desired).into_iter().map(|line| (line.product_id, line.quantity)).collect();

    let mut plan = UpdatePlan::default();

    let mut ids: Vec<ProductId> = current_by_id.keys().chain(desired_by_id.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    for product_id in ids {
        let current_qty = current_by_id.get(&product_id).copied().unwrap_or(0);
        let desired_qty = desired_by_id.get(&product_id).copied().unwrap_or(0).max(0);
        let delta = desired_qty - current_qty;

        if desired_qty == 0 {
            if current_qty > 0 {
                plan.delete_ids.push(product_id);
            }
        } else if delta != 0 {
            plan.upserts.push(CartLineRequest { product_id, quantity: desired_qty });
        }

        if delta != 0 {
            plan.stock_deltas.push(StockDelta { product_id, delta });
        }
    }

    plan
}

/// Replaces each shortfalled line's quantity with the reported available
/// stock, leaving every other line untouched. Used only after the user
/// explicitly confirmed the adjustment.
pub fn adjust_to_available(
    lines: &[CartLineRequest],
    shortfalls: &[StockShortfall],
) -> Vec<CartLineRequest> {
    lines
        .iter()
        .map(|line| {
            match shortfalls.iter().find(|shortfall| shortfall.product_id == line.product_id) {
                Some(shortfall) => CartLineRequest {
                    product_id: line.product_id,
                    quantity: shortfall.available_stock,
                },
                None => *line,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        adjust_to_available, dedupe_lines, plan_update, CartLineRequest, ProductId, StockDelta,
        StockShortfall,
    };

    fn line(id: i64, quantity: i64) -> CartLineRequest {
        CartLineRequest { product_id: ProductId(id), quantity }
    }

    #[test]
    fn plan_reduces_line_and_releases_stock() {
        let plan = plan_update(&[line(1, 2)], &[line(1, 1)]);

        assert!(plan.delete_ids.is_empty());
        assert_eq!(plan.upserts, vec![line(1, 1)]);
        assert_eq!(plan.stock_deltas, vec![StockDelta { product_id: ProductId(1), delta: -1 }]);
    }

    #[test]
    fn plan_removes_lines_missing_from_desired_state() {
        let plan = plan_update(&[line(1, 2), line(2, 1)], &[line(1, 2)]);

        assert_eq!(plan.delete_ids, vec![ProductId(2)]);
        assert!(plan.upserts.is_empty());
        assert_eq!(plan.stock_deltas, vec![StockDelta { product_id: ProductId(2), delta: -1 }]);
    }

    #[test]
    fn plan_treats_non_positive_desired_quantity_as_removal() {
        let plan = plan_update(&[line(3, 4)], &[line(3, 0), line(5, -2)]);

        assert_eq!(plan.delete_ids, vec![ProductId(3)]);
        assert!(plan.upserts.is_empty());
        assert_eq!(plan.stock_deltas, vec![StockDelta { product_id: ProductId(3), delta: -4 }]);
    }

    #[test]
    fn plan_inserts_new_lines_and_keeps_unchanged_ones_silent() {
        let plan = plan_update(&[line(1, 2)], &[line(1, 2), line(2, 3)]);

        assert!(plan.delete_ids.is_empty());
        assert_eq!(plan.upserts, vec![line(2, 3)]);
        assert_eq!(plan.stock_deltas, vec![StockDelta { product_id: ProductId(2), delta: 3 }]);
    }

    #[test]
    fn plan_of_identical_states_is_a_noop() {
        let plan = plan_update(&[line(1, 2), line(2, 1)], &[line(1, 2), line(2, 1)]);
        assert!(plan.is_noop());
    }

    #[test]
    fn stock_movement_sums_to_net_difference() {
        let current = [line(1, 5), line(2, 2), line(3, 1)];
        let desired = [line(1, 1), line(2, 6), line(4, 2)];
        let plan = plan_update(&current, &desired);

        let total: i64 = plan.stock_deltas.iter().map(|d| d.delta).sum();
        let current_total: i64 = current.iter().map(|l| l.quantity).sum();
        let desired_total: i64 = desired.iter().map(|l| l.quantity).sum();
        assert_eq!(total, desired_total - current_total);
        assert_eq!(
            plan.positive_deltas().collect::<Vec<_>>(),
            vec![
                StockDelta { product_id: ProductId(2), delta: 4 },
                StockDelta { product_id: ProductId(4), delta: 2 },
            ]
        );
    }

    #[test]
    fn duplicate_desired_ids_collapse_to_last_occurrence() {
        assert_eq!(dedupe_lines(&[line(1, 2), line(1, 5)]), vec![line(1, 5)]);

        let plan = plan_update(&[], &[line(1, 2), line(1, 5)]);
        assert_eq!(plan.upserts, vec![line(1, 5)]);
    }

    #[test]
    fn adjust_replaces_only_shortfalled_lines() {
        let shortfalls = vec![StockShortfall {
            product_id: ProductId(1),
            product_name: "alfajor".to_string(),
            available_stock: 5,
            requested_quantity: 10,
        }];

        let adjusted = adjust_to_available(&[line(1, 10), line(2, 1)], &shortfalls);
        assert_eq!(adjusted, vec![line(1, 5), line(2, 1)]);
    }

    #[test]
    fn adjust_with_no_shortfalls_is_identity() {
        let lines = vec![line(1, 2), line(2, 3)];
        assert_eq!(adjust_to_available(&lines, &[]), lines);
    }
}
