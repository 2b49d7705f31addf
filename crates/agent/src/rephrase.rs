//! Turns structured handler results into prose via the completion oracle.
//!
//! The payload shapes handed to the oracle are the engine's own serde forms
//! (`Cart`, `StockShortfall`), passed through unmodified. This module never
//! decides anything; it only narrates.

use std::sync::Arc;

use tracing::warn;

use chatcart_core::{Cart, ChatTurn, Intent, Product, StockShortfall};

use crate::llm::{CompletionClient, CompletionError};

/// Fixed degradation string for any collaborator failure on the reply path.
pub const APOLOGY: &str =
    "Sorry, something went wrong on my side. Please try that again in a moment.";

/// Presentation temperature; the fallback persona gets a warmer one.
const REPHRASE_TEMPERATURE: f32 = 0.4;
const FALLBACK_TEMPERATURE: f32 = 0.7;

#[derive(Clone, Debug)]
pub enum ReplyPayload<'a> {
    ProductList { products: &'a [Product], query: Option<&'a str> },
    ProductDetail { products: &'a [Product], query: Option<&'a str> },
    CartCreated { cart: &'a Cart },
    CartUpdated { cart: &'a Cart },
    Shortfall { shortfalls: &'a [StockShortfall], intent: Intent },
    OperationError { message: &'a str, intent: Intent },
    NoCartFound,
    NoItemsDetected,
    Fallback { user_message: &'a str },
}

pub struct Rephraser<C> {
    oracle: Arc<C>,
}

impl<C> Rephraser<C>
where
    C: CompletionClient,
{
    pub fn new(oracle: Arc<C>) -> Self {
        Self { oracle }
    }

    pub async fn rephrase(
        &self,
        payload: ReplyPayload<'_>,
        history: &[ChatTurn],
    ) -> Result<String, CompletionError> {
        let temperature = match payload {
            ReplyPayload::Fallback { .. } => FALLBACK_TEMPERATURE,
            _ => REPHRASE_TEMPERATURE,
        };
        let instruction = build_prompt(&payload);

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.extend_from_slice(history);
        messages.push(ChatTurn::system(instruction));

        let reply = self.oracle.complete(&messages, temperature).await?;
        let trimmed = reply.trim();
        if trimmed.is_empty() {
            warn!("oracle produced an empty reply");
            return Err(CompletionError::Malformed("empty reply".to_string()));
        }
        Ok(trimmed.to_string())
    }
}

fn build_prompt(payload: &ReplyPayload<'_>) -> String {
    match payload {
        ReplyPayload::ProductList { products, query } => {
            let scope = match query {
                Some(query) => format!("matching \"{query}\""),
                None => "in the catalog".to_string(),
            };
            format!(
                "You are a friendly shop assistant. The user asked to see products {scope}. \
                 Present this list clearly, with names and prices:\n{}",
                to_json(products)
            )
        }
        ReplyPayload::ProductDetail { products, query } => {
            let scope = match query {
                Some(query) => format!(" about \"{query}\""),
                None => String::new(),
            };
            format!(
                "You are a friendly shop assistant. The user asked{scope} for product details. \
                 Describe what matched, including price and availability:\n{}",
                to_json(products)
            )
        }
        ReplyPayload::CartCreated { cart } => format!(
            "The user's new cart was just created. Confirm it warmly and repeat the cart \
             number and its items:\n{}",
            to_json(cart)
        ),
        ReplyPayload::CartUpdated { cart } => format!(
            "The user's cart was just updated. Confirm the change and list the cart's \
             current items:\n{}",
            to_json(cart)
        ),
        ReplyPayload::Shortfall { shortfalls, intent } => format!(
            "The user's {} request could not be fully satisfied because of limited stock. \
             For each product below, tell the user what they asked for and what is \
             available, then ask whether you should adjust the quantities to what is in \
             stock:\n{}",
            describe_cart_intent(*intent),
            to_json(shortfalls)
        ),
        ReplyPayload::OperationError { message, intent } => format!(
            "The user's {} request failed. Explain this politely in one or two sentences, \
             without technical jargon: {message}",
            describe_cart_intent(*intent)
        ),
        ReplyPayload::NoCartFound => "Tell the user you could not figure out which cart they \
             mean, and ask them to create one first or mention its number."
            .to_string(),
        ReplyPayload::NoItemsDetected => "Tell the user you could not tell which products or \
             quantities they meant, and ask them to name the items again."
            .to_string(),
        ReplyPayload::Fallback { user_message } => format!(
            "You are a friendly shop assistant. The user wrote:\n\"{user_message}\"\n\
             No shopping action was detected. Answer warmly like a human would, without \
             performing any action, and gently steer them toward browsing products or \
             managing their cart."
        ),
    }
}

fn describe_cart_intent(intent: Intent) -> &'static str {
    match intent {
        Intent::CreateCart => "cart creation",
        Intent::UpdateCart => "cart update",
        Intent::GetProducts | Intent::GetProduct => "product lookup",
        Intent::Fallback => "last",
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chatcart_core::{Intent, ProductId, StockShortfall};

    use super::{build_prompt, ReplyPayload, Rephraser};
    use crate::llm::ScriptedCompletionClient;

    #[test]
    fn shortfall_prompt_carries_the_exact_shapes() {
        let shortfalls = vec![StockShortfall {
            product_id: ProductId(1),
            product_name: "Beef empanada".to_string(),
            available_stock: 5,
            requested_quantity: 10,
        }];
        let prompt = build_prompt(&ReplyPayload::Shortfall {
            shortfalls: &shortfalls,
            intent: Intent::CreateCart,
        });

        assert!(prompt.contains("\"available_stock\": 5"));
        assert!(prompt.contains("\"requested_quantity\": 10"));
        assert!(prompt.contains("cart creation"));
    }

    #[test]
    fn error_prompt_embeds_the_user_message() {
        let prompt = build_prompt(&ReplyPayload::OperationError {
            message: "These products don't exist in the catalog: 9.",
            intent: Intent::UpdateCart,
        });
        assert!(prompt.contains("cart update"));
        assert!(prompt.contains("catalog: 9"));
    }

    #[tokio::test]
    async fn empty_oracle_output_is_a_malformed_reply() {
        let rephraser = Rephraser::new(Arc::new(ScriptedCompletionClient::new(["   "])));
        let result = rephraser.rephrase(ReplyPayload::NoCartFound, &[]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn successful_rephrase_is_trimmed() {
        let rephraser =
            Rephraser::new(Arc::new(ScriptedCompletionClient::new(["  Here you go!  "])));
        let reply = rephraser.rephrase(ReplyPayload::NoItemsDetected, &[]).await.expect("reply");
        assert_eq!(reply, "Here you go!");
    }
}
