use thiserror::Error;

use crate::domain::cart::CartId;
use crate::domain::product::ProductId;

/// Failures raised by a cart/product backend implementation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend returned malformed data: {0}")]
    Decode(String),
    /// A guarded stock mutation found less stock than validation saw.
    /// Recoverable: the engine re-validates and renegotiates.
    #[error("stock changed concurrently during the transaction")]
    StockConflict,
}

/// Errors the Cart Transaction Engine lets unwind to its caller. Shortfalls
/// are deliberately absent: they are a result variant, not an error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CartError {
    #[error("cart {0} does not exist")]
    CartNotFound(CartId),
    #[error("products not found: {}", format_ids(.0))]
    ProductsNotFound(Vec<ProductId>),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl CartError {
    /// Plain-language phrasing handed to the rephraser. Only NotFound and
    /// InvalidRequest carry detail to the user; backend trouble stays
    /// generic.
    pub fn user_message(&self) -> String {
        match self {
            Self::CartNotFound(id) => format!("I couldn't find cart number {id}."),
            Self::ProductsNotFound(ids) => {
                format!("These products don't exist in the catalog: {}.", format_ids(ids))
            }
            Self::InvalidRequest(reason) => format!("I couldn't act on that request: {reason}."),
            Self::Backend(_) => "The store is temporarily unavailable. Please try again.".to_string(),
        }
    }
}

fn format_ids(ids: &[ProductId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::{BackendError, CartError};
    use crate::domain::cart::CartId;
    use crate::domain::product::ProductId;

    #[test]
    fn products_not_found_lists_all_missing_ids() {
        let error = CartError::ProductsNotFound(vec![ProductId(3), ProductId(8)]);
        assert_eq!(error.to_string(), "products not found: 3, 8");
        assert!(error.user_message().contains("3, 8"));
    }

    #[test]
    fn backend_errors_stay_generic_for_users() {
        let error = CartError::from(BackendError::Unavailable("pool exhausted".to_string()));
        assert!(!error.user_message().contains("pool"));
    }

    #[test]
    fn cart_not_found_names_the_cart() {
        assert!(CartError::CartNotFound(CartId(5)).user_message().contains('5'));
    }
}
