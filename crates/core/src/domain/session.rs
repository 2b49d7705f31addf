use serde::{Deserialize, Serialize};

use crate::domain::cart::CartId;
use crate::intent::Intent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One role-tagged message in a session's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
}

/// A confirmation the session is waiting on after a stock shortfall.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    AdjustStockAndCreateCart,
    AdjustStockAndUpdateCart,
}

impl PendingAction {
    /// The intent a confirmed pending action converts back into.
    pub fn originating_intent(&self) -> Intent {
        match self {
            Self::AdjustStockAndCreateCart => Intent::CreateCart,
            Self::AdjustStockAndUpdateCart => Intent::UpdateCart,
        }
    }
}

/// What the last dispatched turn did, including the error-shaped outcomes the
/// confirmation loop leaves behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastIntent {
    Dispatched(Intent),
    CreateCartError,
    UpdateCartError,
}

/// Point-in-time copy of a session handed to one turn's handlers. Handlers
/// never retain it; the store owns the live state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    pub history: Vec<ChatTurn>,
    pub pending_action: Option<PendingAction>,
    pub cart_id: Option<CartId>,
    pub last_intent: Option<LastIntent>,
}
