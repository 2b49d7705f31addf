//! Classification and extraction over the completion oracle.
//!
//! Every operation here is best-effort: oracle trouble or unparseable output
//! degrades to `Fallback` / `None` / an empty list, never an error. The only
//! hard failures that leave this module come from the cart backend while
//! confirming a candidate cart id.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use chatcart_core::intent::{find_announced_cart_id, find_explicit_cart_id, override_intent};
use chatcart_core::{
    BackendError, Cart, CartBackend, CartId, CartLine, CartLineRequest, ChatTurn, Intent,
};

use crate::llm::CompletionClient;

/// Low temperature for classification and extraction; the oracle is a
/// translator here, not a writer.
const EXTRACTION_TEMPERATURE: f32 = 0.2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedIntent {
    pub intent: Intent,
    pub query: Option<String>,
}

#[derive(Deserialize)]
struct ClassificationEnvelope {
    intent: String,
    #[serde(default)]
    query: Option<String>,
}

pub struct IntentResolver<C> {
    oracle: Arc<C>,
}

impl<C> IntentResolver<C>
where
    C: CompletionClient,
{
    pub fn new(oracle: Arc<C>) -> Self {
        Self { oracle }
    }

    /// Classifies the latest message against the closed intent set, then
    /// applies the action-verb second pass. Parse or oracle failure yields
    /// `Fallback` with no query.
    pub async fn classify(&self, text: &str, history: &[ChatTurn]) -> ResolvedIntent {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatTurn::system(CLASSIFY_INSTRUCTION));
        messages.extend_from_slice(history);
        messages.push(ChatTurn::user(text));

        let resolved = match self.oracle.complete(&messages, EXTRACTION_TEMPERATURE).await {
            Ok(raw) => parse_classification(&raw).unwrap_or_else(|| {
                warn!("classifier reply was not the expected JSON envelope");
                ResolvedIntent { intent: Intent::Fallback, query: None }
            }),
            Err(error) => {
                warn!(%error, "classification failed; treating as fallback");
                ResolvedIntent { intent: Intent::Fallback, query: None }
            }
        };

        let intent = override_intent(resolved.intent, text);
        if intent != resolved.intent {
            debug!(from = %resolved.intent, to = %intent, "heuristic override applied");
        }
        ResolvedIntent { intent, query: resolved.query }
    }

    /// Asks the oracle for filterable catalog keywords. The literal reply
    /// `null` (any casing) and every failure mode mean "nothing to search
    /// by".
    pub async fn extract_search_query(&self, text: &str, history: &[ChatTurn]) -> Option<String> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatTurn::system(SEARCH_QUERY_INSTRUCTION));
        messages.extend_from_slice(history);
        messages.push(ChatTurn::user(text));

        let raw = match self.oracle.complete(&messages, EXTRACTION_TEMPERATURE).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%error, "search query extraction failed; listing unfiltered");
                return None;
            }
        };

        let cleaned = raw.trim().trim_matches('"').trim().to_string();
        if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("null") {
            None
        } else {
            Some(cleaned.to_lowercase())
        }
    }

    /// Extracts `{product_id, quantity}` lines from the message. When the
    /// target cart's current items are known they are included verbatim so
    /// the oracle can match lines by fuzzy name. Unparseable output is an
    /// empty list by contract.
    pub async fn extract_cart_lines(
        &self,
        text: &str,
        history: &[ChatTurn],
        known_items: Option<&[CartLine]>,
    ) -> Vec<CartLineRequest> {
        let mut instruction = String::from(CART_LINES_INSTRUCTION);
        if let Some(items) = known_items {
            instruction.push_str("\nThe cart being discussed currently contains:\n");
            for item in items {
                instruction.push_str(&format!(
                    "- {} (product_id {}) x{}\n",
                    item.product.name, item.product_id, item.quantity
                ));
            }
            instruction.push_str(
                "Quantities you output are final desired quantities for the whole cart.\n",
            );
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatTurn::system(instruction));
        messages.extend_from_slice(history);
        messages.push(ChatTurn::user(text));

        let raw = match self.oracle.complete(&messages, EXTRACTION_TEMPERATURE).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%error, "cart line extraction failed");
                return Vec::new();
            }
        };

        parse_cart_lines(&raw)
    }

    /// Resolves which cart a follow-up refers to, in one deterministic
    /// order: an explicit number in the user text, then the announcement
    /// pattern scanned from history, then the session's stored cart id.
    /// Each candidate must still exist; a dead candidate falls through to
    /// the next.
    pub async fn extract_target_cart<B>(
        &self,
        text: &str,
        history: &[ChatTurn],
        session_cart_id: Option<CartId>,
        backend: &B,
    ) -> Result<Option<Cart>, BackendError>
    where
        B: CartBackend,
    {
        let mut candidates = Vec::new();
        if let Some(id) = find_explicit_cart_id(text) {
            candidates.push(CartId(id));
        }
        if let Some(id) = find_announced_cart_id(history) {
            candidates.push(CartId(id));
        }
        if let Some(id) = session_cart_id {
            candidates.push(id);
        }
        candidates.dedup();

        for candidate in candidates {
            if let Some(cart) = backend.get_cart_with_lines(candidate).await? {
                debug!(cart_id = candidate.0, "target cart resolved");
                return Ok(Some(cart));
            }
            debug!(cart_id = candidate.0, "candidate cart no longer exists");
        }
        Ok(None)
    }
}

const CLASSIFY_INSTRUCTION: &str = "\
You are the intent classifier of a shopping assistant. Classify the user's \
latest message into exactly one of these intents:
- get_products: the user wants to browse or list available products
- get_product: the user asks about one specific product in detail
- create_cart: the user wants to start a new cart / place a new order
- update_cart: the user wants to change an existing cart (add, remove, change quantities)
- fallback: none of the above

Reply with a single JSON object and nothing else, for example:
{\"intent\": \"get_products\", \"query\": \"empanadas\"}
Set \"query\" to the product-search keywords mentioned, or null when there are none.";

const SEARCH_QUERY_INSTRUCTION: &str = "\
If the user's latest message mentions a product, category, ingredient or \
descriptive detail worth searching the catalog for (like \"empanadas\", \
\"with cheese\", \"something with ham\"), reply with only those keywords.
If there is nothing useful to search by, reply with exactly: null
No explanations.";

const CART_LINES_INSTRUCTION: &str = "\
Extract the products and quantities the user is asking for as a JSON array, \
matching product names mentioned in the conversation to their ids. Example \
output:
[
  { \"product_id\": 3, \"qty\": 2 },
  { \"product_id\": 5, \"qty\": 1 }
]
Use qty 0 for products the user wants removed. Reply with only the JSON \
array, no explanations.";

fn parse_classification(raw: &str) -> Option<ResolvedIntent> {
    let body = slice_between(raw, '{', '}')?;
    let envelope: ClassificationEnvelope = serde_json::from_str(body).ok()?;
    let query = envelope
        .query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty() && !q.eq_ignore_ascii_case("null"));
    Some(ResolvedIntent { intent: Intent::normalize(&envelope.intent), query })
}

fn parse_cart_lines(raw: &str) -> Vec<CartLineRequest> {
    let Some(body) = slice_between(raw, '[', ']') else {
        return Vec::new();
    };
    serde_json::from_str(body).unwrap_or_default()
}

/// The oracle likes to wrap JSON in prose or code fences; take the outermost
/// delimited slice instead of failing on the wrapping.
fn slice_between(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    (end >= start).then(|| &raw[start..=end])
}
