//! Core domain of the chatcart shopping assistant.
//!
//! This crate holds everything the conversational layer and the persistence
//! layer agree on:
//!
//! - the domain model (products, carts, chat turns, pending actions)
//! - the closed [`intent::Intent`] enumeration and its pure text heuristics
//! - the [`engine::CartEngine`] that reconciles a desired cart state against
//!   live stock through the [`engine::CartBackend`] seam
//! - layered configuration and the error taxonomy
//!
//! Nothing in this crate performs I/O directly; collaborators are reached
//! through async traits implemented elsewhere.

pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod intent;

pub use config::{AppConfig, ConfigError, LoadOptions};
pub use domain::cart::{
    adjust_to_available, plan_update, Cart, CartId, CartLine, CartLineRequest, CartOutcome,
    StockDelta, StockShortfall, UpdatePlan,
};
pub use domain::product::{Product, ProductId};
pub use domain::session::{ChatRole, ChatTurn, LastIntent, PendingAction, SessionSnapshot};
pub use engine::{CartBackend, CartEngine, StockValidation};
pub use errors::{BackendError, CartError};
pub use intent::Intent;
