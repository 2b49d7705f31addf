//! Conversational layer of chatcart.
//!
//! This crate turns free text into structured work against the cart engine:
//!
//! 1. **Resolution** (`resolver`) — classify the message into an intent and
//!    pull out search queries, cart lines, and the target cart.
//! 2. **State** (`session`) — per-conversation history, pending
//!    confirmations, and the active cart id, bounded and TTL-evicted.
//! 3. **Orchestration** (`runtime`) — the turn loop that dispatches intents,
//!    runs the stock negotiation state machine, and degrades gracefully when
//!    a collaborator misbehaves.
//! 4. **Presentation** (`rephrase`) — structured results back into prose via
//!    the completion oracle.
//!
//! The oracle is strictly a translator: every decision that moves stock is
//! made by the deterministic engine in `chatcart-core`.

pub mod llm;
pub mod rephrase;
pub mod resolver;
pub mod runtime;
pub mod session;

pub use llm::{CompletionClient, CompletionError, OpenAiCompletionClient, ScriptedCompletionClient};
pub use resolver::IntentResolver;
pub use runtime::{ChatRuntime, Reply};
pub use session::SessionStore;
