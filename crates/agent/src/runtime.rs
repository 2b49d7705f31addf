//! The turn-by-turn orchestrator.
//!
//! `process_user_message` is the single entry point the transport layer
//! calls: it tracks the session, resolves the intent (overridden only when a
//! stock confirmation is pending and the user agrees), dispatches to the
//! matching handler, and records both sides of the exchange in history.
//!
//! Failure policy: not-found and invalid-request conditions become
//! plain-language replies; shortfalls are negotiated, never raised; any
//! oracle or backend failure degrades to a fixed apology with session state
//! left as it was.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use chatcart_core::config::SessionConfig;
use chatcart_core::intent::{cart_announcement, is_affirmative};
use chatcart_core::{
    adjust_to_available, Cart, CartBackend, CartEngine, CartError, CartOutcome, ChatTurn, Intent,
    LastIntent, PendingAction, Product, SessionSnapshot, StockShortfall,
};

use crate::llm::CompletionClient;
use crate::rephrase::{ReplyPayload, Rephraser, APOLOGY};
use crate::resolver::{IntentResolver, ResolvedIntent};
use crate::session::{SessionError, SessionStore};

const EMPTY_SESSION_REPLY: &str = "A session id, when provided, must not be empty.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub session_id: String,
    pub text: String,
}

pub struct ChatRuntime<C, B> {
    resolver: IntentResolver<C>,
    rephraser: Rephraser<C>,
    engine: CartEngine<B>,
    backend: Arc<B>,
    sessions: SessionStore,
}

impl<C, B> ChatRuntime<C, B>
where
    C: CompletionClient,
    B: CartBackend,
{
    pub fn new(oracle: Arc<C>, backend: Arc<B>, session_config: &SessionConfig) -> Self {
        Self {
            resolver: IntentResolver::new(Arc::clone(&oracle)),
            rephraser: Rephraser::new(oracle),
            engine: CartEngine::new(Arc::clone(&backend)),
            backend,
            sessions: SessionStore::new(session_config),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Processes one inbound message and returns the assistant's reply. A
    /// missing session id starts a fresh conversation under a generated one;
    /// the id is echoed back so the caller can keep the thread going.
    pub async fn process_user_message(&self, text: &str, session_id: Option<&str>) -> Reply {
        let session_id = match session_id {
            Some(id) if id.trim().is_empty() => {
                return Reply { session_id: String::new(), text: EMPTY_SESSION_REPLY.to_string() };
            }
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        let text = match self.process_turn(&session_id, text).await {
            Ok(reply) => reply,
            Err(SessionError::EmptySessionId) => EMPTY_SESSION_REPLY.to_string(),
        };
        Reply { session_id, text }
    }

    async fn process_turn(&self, session_id: &str, text: &str) -> Result<String, SessionError> {
        let snapshot = self.sessions.get_or_create(session_id).await?;
        self.sessions.append_turn(session_id, ChatTurn::user(text)).await?;

        // A pending stock confirmation answered affirmatively is the only
        // thing allowed to override classification; it converts back into
        // the originating intent with auto-adjustment armed. The classifier
        // result would be dead on this path, so the call is skipped.
        let mut auto_adjust = false;
        let resolved = match snapshot.pending_action.filter(|_| is_affirmative(text)) {
            Some(pending) => {
                auto_adjust = true;
                self.sessions.set_pending_action(session_id, None).await?;
                info!(session_id, pending = ?pending, "pending action confirmed by user");
                ResolvedIntent { intent: pending.originating_intent(), query: None }
            }
            None => self.resolver.classify(text, &snapshot.history).await,
        };

        info!(session_id, intent = %resolved.intent, "dispatching turn");
        self.sessions.set_last_intent(session_id, LastIntent::Dispatched(resolved.intent)).await?;

        let intent = resolved.intent;
        let reply = match intent {
            Intent::GetProducts | Intent::GetProduct => {
                self.handle_products(session_id, text, &snapshot, resolved).await?
            }
            Intent::CreateCart => {
                self.handle_create_cart(session_id, text, &snapshot, auto_adjust).await?
            }
            Intent::UpdateCart => {
                self.handle_update_cart(session_id, text, &snapshot, auto_adjust).await?
            }
            Intent::Fallback => self.handle_fallback(text, &snapshot).await,
        };

        self.sessions.append_turn(session_id, ChatTurn::assistant(reply.clone())).await?;
        Ok(reply)
    }

    /// Search-or-list. Shown products are also summarized into a system turn
    /// so later line extraction has names and ids to match against.
    async fn handle_products(
        &self,
        session_id: &str,
        text: &str,
        snapshot: &SessionSnapshot,
        resolved: ResolvedIntent,
    ) -> Result<String, SessionError> {
        let query = match resolved.query {
            Some(query) => Some(query),
            None => self.resolver.extract_search_query(text, &snapshot.history).await,
        };

        let products = match self.backend.search_products(query.as_deref()).await {
            Ok(products) => products,
            Err(backend_error) => {
                error!(session_id, %backend_error, "product search failed");
                return Ok(APOLOGY.to_string());
            }
        };

        if !products.is_empty() {
            self.sessions
                .append_turn(session_id, ChatTurn::system(product_summary(&products)))
                .await?;
        }

        let payload = match resolved.intent {
            Intent::GetProduct => {
                ReplyPayload::ProductDetail { products: &products, query: query.as_deref() }
            }
            _ => ReplyPayload::ProductList { products: &products, query: query.as_deref() },
        };
        self.reply_or_apology(payload, &snapshot.history).await
    }

    async fn handle_create_cart(
        &self,
        session_id: &str,
        text: &str,
        snapshot: &SessionSnapshot,
        auto_adjust: bool,
    ) -> Result<String, SessionError> {
        let lines = self.resolver.extract_cart_lines(text, &snapshot.history, None).await;
        if lines.is_empty() {
            return self.reply_or_apology(ReplyPayload::NoItemsDetected, &snapshot.history).await;
        }

        match self.engine.create_cart(&lines).await {
            Ok(CartOutcome::Realized(cart)) => self.finish_create(session_id, cart, snapshot).await,
            Ok(CartOutcome::Shortfall { shortfalls }) if auto_adjust => {
                let adjusted = adjust_to_available(&lines, &shortfalls);
                match self.engine.create_cart(&adjusted).await {
                    Ok(CartOutcome::Realized(cart)) => {
                        self.finish_create(session_id, cart, snapshot).await
                    }
                    Ok(CartOutcome::Shortfall { shortfalls }) => {
                        // stock moved again between confirmation and retry
                        self.park_shortfall(session_id, Intent::CreateCart, shortfalls, snapshot)
                            .await
                    }
                    Err(cart_error) => {
                        self.cart_error_reply(cart_error, Intent::CreateCart, snapshot).await
                    }
                }
            }
            Ok(CartOutcome::Shortfall { shortfalls }) => {
                self.park_shortfall(session_id, Intent::CreateCart, shortfalls, snapshot).await
            }
            Err(cart_error) => self.cart_error_reply(cart_error, Intent::CreateCart, snapshot).await,
        }
    }

    async fn handle_update_cart(
        &self,
        session_id: &str,
        text: &str,
        snapshot: &SessionSnapshot,
        auto_adjust: bool,
    ) -> Result<String, SessionError> {
        let target = match self
            .resolver
            .extract_target_cart(text, &snapshot.history, snapshot.cart_id, self.backend.as_ref())
            .await
        {
            Ok(Some(cart)) => cart,
            Ok(None) => {
                return self.reply_or_apology(ReplyPayload::NoCartFound, &snapshot.history).await;
            }
            Err(backend_error) => {
                error!(session_id, %backend_error, "target cart lookup failed");
                return Ok(APOLOGY.to_string());
            }
        };

        let lines =
            self.resolver.extract_cart_lines(text, &snapshot.history, Some(&target.lines)).await;
        if lines.is_empty() {
            return self.reply_or_apology(ReplyPayload::NoItemsDetected, &snapshot.history).await;
        }

        match self.engine.update_cart(target.id, &lines).await {
            Ok(CartOutcome::Realized(cart)) => self.finish_update(session_id, cart, snapshot).await,
            Ok(CartOutcome::Shortfall { shortfalls }) if auto_adjust => {
                let adjusted = adjust_to_available(&lines, &shortfalls);
                match self.engine.update_cart(target.id, &adjusted).await {
                    Ok(CartOutcome::Realized(cart)) => {
                        self.finish_update(session_id, cart, snapshot).await
                    }
                    Ok(CartOutcome::Shortfall { shortfalls }) => {
                        self.park_shortfall(session_id, Intent::UpdateCart, shortfalls, snapshot)
                            .await
                    }
                    Err(cart_error) => {
                        self.cart_error_reply(cart_error, Intent::UpdateCart, snapshot).await
                    }
                }
            }
            Ok(CartOutcome::Shortfall { shortfalls }) => {
                self.park_shortfall(session_id, Intent::UpdateCart, shortfalls, snapshot).await
            }
            Err(cart_error) => self.cart_error_reply(cart_error, Intent::UpdateCart, snapshot).await,
        }
    }

    /// Clarifying reply with no side effects. An unconfirmed pending action
    /// survives this turn untouched.
    async fn handle_fallback(&self, text: &str, snapshot: &SessionSnapshot) -> String {
        match self
            .rephraser
            .rephrase(ReplyPayload::Fallback { user_message: text }, &snapshot.history)
            .await
        {
            Ok(reply) => reply,
            Err(completion_error) => {
                warn!(%completion_error, "fallback rephrase failed");
                APOLOGY.to_string()
            }
        }
    }

    async fn finish_create(
        &self,
        session_id: &str,
        cart: Cart,
        snapshot: &SessionSnapshot,
    ) -> Result<String, SessionError> {
        self.sessions.set_cart_id(session_id, cart.id).await?;
        self.sessions.set_pending_action(session_id, None).await?;
        self.sessions.append_turn(session_id, ChatTurn::system(announcement_turn(&cart))).await?;
        info!(session_id, cart_id = cart.id.0, "cart created");
        self.reply_or_apology(ReplyPayload::CartCreated { cart: &cart }, &snapshot.history).await
    }

    async fn finish_update(
        &self,
        session_id: &str,
        cart: Cart,
        snapshot: &SessionSnapshot,
    ) -> Result<String, SessionError> {
        self.sessions.set_cart_id(session_id, cart.id).await?;
        self.sessions.set_pending_action(session_id, None).await?;
        info!(session_id, cart_id = cart.id.0, "cart updated");
        self.reply_or_apology(ReplyPayload::CartUpdated { cart: &cart }, &snapshot.history).await
    }

    /// Records the shortfall as a pending confirmation and asks the user
    /// whether to adjust to available stock.
    async fn park_shortfall(
        &self,
        session_id: &str,
        intent: Intent,
        shortfalls: Vec<StockShortfall>,
        snapshot: &SessionSnapshot,
    ) -> Result<String, SessionError> {
        let (pending, last_intent) = match intent {
            Intent::UpdateCart => {
                (PendingAction::AdjustStockAndUpdateCart, LastIntent::UpdateCartError)
            }
            _ => (PendingAction::AdjustStockAndCreateCart, LastIntent::CreateCartError),
        };
        self.sessions.set_pending_action(session_id, Some(pending)).await?;
        self.sessions.set_last_intent(session_id, last_intent).await?;
        info!(session_id, shortfalls = shortfalls.len(), "awaiting stock confirmation");

        self.reply_or_apology(
            ReplyPayload::Shortfall { shortfalls: &shortfalls, intent },
            &snapshot.history,
        )
        .await
    }

    async fn cart_error_reply(
        &self,
        cart_error: CartError,
        intent: Intent,
        snapshot: &SessionSnapshot,
    ) -> Result<String, SessionError> {
        match cart_error {
            CartError::Backend(backend_error) => {
                error!(%backend_error, "cart backend failure");
                Ok(APOLOGY.to_string())
            }
            other => {
                let message = other.user_message();
                self.reply_or_apology(
                    ReplyPayload::OperationError { message: &message, intent },
                    &snapshot.history,
                )
                .await
            }
        }
    }

    async fn reply_or_apology(
        &self,
        payload: ReplyPayload<'_>,
        history: &[ChatTurn],
    ) -> Result<String, SessionError> {
        match self.rephraser.rephrase(payload, history).await {
            Ok(reply) => Ok(reply),
            Err(completion_error) => {
                warn!(%completion_error, "rephrase failed; degrading to apology");
                Ok(APOLOGY.to_string())
            }
        }
    }
}

fn product_summary(products: &[Product]) -> String {
    let listing = products
        .iter()
        .enumerate()
        .map(|(index, product)| {
            format!("{}. {} (ID: {}) - {}", index + 1, product.name, product.id, product.description)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("Here is a list of available products:\n\n{listing}")
}

fn announcement_turn(cart: &Cart) -> String {
    let items = cart
        .lines
        .iter()
        .map(|line| format!("{} x {} (ID {})", line.quantity, line.product.name, line.product_id))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}. Items: {items}", cart_announcement(cart.id.0))
}

#[cfg(test)]
mod tests {
    use super::{announcement_turn, product_summary};
    use chatcart_core::intent::find_announced_cart_id;
    use chatcart_core::{Cart, CartId, CartLine, ChatTurn, Product, ProductId};
    use rust_decimal::Decimal;

    fn cart_fixture() -> Cart {
        Cart {
            id: CartId(12),
            lines: vec![CartLine {
                product_id: ProductId(2),
                quantity: 3,
                product: Product {
                    id: ProductId(2),
                    name: "Beef empanada".to_string(),
                    description: "Hand-cut beef".to_string(),
                    price: Decimal::new(275, 2),
                    stock: 9,
                },
            }],
        }
    }

    #[test]
    fn announcement_is_recognized_by_the_history_scanner() {
        let turn = ChatTurn::system(announcement_turn(&cart_fixture()));
        assert_eq!(find_announced_cart_id(&[turn]), Some(12));
    }

    #[test]
    fn product_summary_lists_ids_and_names() {
        let product = cart_fixture().lines.remove(0).product;
        let summary = product_summary(&[product]);
        assert!(summary.contains("Beef empanada (ID: 2)"));
        assert!(summary.starts_with("Here is a list of available products:"));
    }
}
