//! The closed intent enumeration and the pure text heuristics layered around
//! classification: the action-verb override, affirmation matching, and cart
//! id scanning. Everything here is deterministic and oracle-free.

use serde::{Deserialize, Serialize};

use crate::domain::session::{ChatRole, ChatTurn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    GetProducts,
    GetProduct,
    CreateCart,
    UpdateCart,
    Fallback,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetProducts => "get_products",
            Self::GetProduct => "get_product",
            Self::CreateCart => "create_cart",
            Self::UpdateCart => "update_cart",
            Self::Fallback => "fallback",
        }
    }

    /// Maps a raw classifier label onto the closed enumeration. Anything
    /// unrecognized is `Fallback`, never an error.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "get_products" => Self::GetProducts,
            "get_product" => Self::GetProduct,
            "create_cart" => Self::CreateCart,
            "update_cart" => Self::UpdateCart,
            _ => Self::Fallback,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Second-pass check applied after classification. The classifier
/// under-detects short imperative follow-ups ("add two more") in ongoing
/// conversations, so a `Fallback` verdict over text that pairs a cart action
/// verb with a numeral is forced to `UpdateCart`.
///
/// Kept separate from the oracle call so it can be tested on its own.
pub fn override_intent(classified: Intent, raw_text: &str) -> Intent {
    if classified == Intent::Fallback && mentions_cart_action(raw_text) {
        Intent::UpdateCart
    } else {
        classified
    }
}

const ACTION_VERBS: &[&str] = &[
    "add", "remove", "delete", "drop", "change", "update", "increase", "decrease", "set", "put",
    "quita", "saca", "agrega", "suma", "cambia",
];

const NUMBER_WORDS: &[&str] = &[
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten", "uno", "dos",
    "tres", "cuatro", "cinco",
];

fn mentions_cart_action(text: &str) -> bool {
    let tokens = tokenize(&fold_text(text));
    let has_verb = tokens.iter().any(|token| ACTION_VERBS.contains(&token.as_str()));
    let has_numeral = tokens
        .iter()
        .any(|token| token.parse::<i64>().is_ok() || NUMBER_WORDS.contains(&token.as_str()));
    has_verb && has_numeral
}

const AFFIRMATIONS: &[&str] = &[
    "yes", "y", "yeah", "yep", "sure", "ok", "okay", "confirm", "confirmed", "go ahead", "do it",
    "sounds good", "si", "dale", "confirmo", "de acuerdo",
];

/// Whether a reply counts as agreement to a pending confirmation. Matching
/// is case- and diacritic-insensitive over the enumerated phrase set;
/// trailing punctuation is ignored.
pub fn is_affirmative(text: &str) -> bool {
    let folded = fold_text(text);
    let trimmed = folded.trim_matches(|c: char| c.is_whitespace() || matches!(c, '.' | '!' | ','));
    AFFIRMATIONS.contains(&trimmed)
}

/// A cart id stated explicitly by the user, e.g. "update cart 3" or
/// "cart #12": the first numeric token after a cart word.
pub fn find_explicit_cart_id(text: &str) -> Option<i64> {
    let tokens = tokenize(&fold_text(text));
    let cart_position =
        tokens.iter().position(|token| matches!(token.as_str(), "cart" | "carrito"))?;
    tokens[cart_position + 1..].iter().find_map(|token| token.parse::<i64>().ok())
}

const ANNOUNCEMENT_MARKER: &str = "cart number generated";

/// The announcement every successful create leaves in history, matched later
/// to resolve which cart a follow-up refers to.
pub fn cart_announcement(cart_id: i64) -> String {
    format!("{ANNOUNCEMENT_MARKER} is {cart_id}")
}

/// Scans history newest-first for a cart announcement from the assistant
/// side and extracts the id that follows the marker phrase.
pub fn find_announced_cart_id(history: &[ChatTurn]) -> Option<i64> {
    history.iter().rev().find_map(|turn| {
        if turn.role == ChatRole::User {
            return None;
        }
        let folded = fold_text(&turn.content);
        let after = folded.split(ANNOUNCEMENT_MARKER).nth(1)?;
        tokenize(after).iter().find_map(|token| token.parse::<i64>().ok())
    })
}

/// Lowercases and folds the accented characters the agreement set and cart
/// words can arrive with.
fn fold_text(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            'ñ' => 'n',
            _ => c,
        })
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        cart_announcement, find_announced_cart_id, find_explicit_cart_id, is_affirmative,
        override_intent, Intent,
    };
    use crate::domain::session::ChatTurn;

    #[test]
    fn normalize_accepts_known_labels_and_defaults_to_fallback() {
        assert_eq!(Intent::normalize(" Get_Products \n"), Intent::GetProducts);
        assert_eq!(Intent::normalize("create_cart"), Intent::CreateCart);
        assert_eq!(Intent::normalize("order_pizza"), Intent::Fallback);
        assert_eq!(Intent::normalize(""), Intent::Fallback);
    }

    #[test]
    fn override_forces_update_cart_on_imperative_with_numeral() {
        assert_eq!(override_intent(Intent::Fallback, "add 2 more"), Intent::UpdateCart);
        assert_eq!(override_intent(Intent::Fallback, "remove two of those"), Intent::UpdateCart);
        assert_eq!(override_intent(Intent::Fallback, "agrega 3 empanadas"), Intent::UpdateCart);
    }

    #[test]
    fn override_leaves_other_verdicts_and_plain_text_alone() {
        assert_eq!(override_intent(Intent::GetProducts, "add 2 more"), Intent::GetProducts);
        assert_eq!(override_intent(Intent::Fallback, "add some more"), Intent::Fallback);
        assert_eq!(override_intent(Intent::Fallback, "2 plus 2 is 4"), Intent::Fallback);
    }

    #[test]
    fn affirmations_match_case_and_diacritic_insensitively() {
        assert!(is_affirmative("Yes"));
        assert!(is_affirmative("  ok!"));
        assert!(is_affirmative("Sí"));
        assert!(is_affirmative("go ahead"));
        assert!(!is_affirmative("no"));
        assert!(!is_affirmative("yes but make it three"));
    }

    #[test]
    fn explicit_cart_id_follows_a_cart_word() {
        assert_eq!(find_explicit_cart_id("update cart 3 please"), Some(3));
        assert_eq!(find_explicit_cart_id("change cart #12"), Some(12));
        assert_eq!(find_explicit_cart_id("add 2 empanadas"), None);
        assert_eq!(find_explicit_cart_id("my cart"), None);
    }

    #[test]
    fn announced_cart_id_is_found_newest_first() {
        let history = vec![
            ChatTurn::system(format!("{}. Items: ...", cart_announcement(4))),
            ChatTurn::user("thanks"),
            ChatTurn::system(format!("{}. Items: ...", cart_announcement(9))),
        ];
        assert_eq!(find_announced_cart_id(&history), Some(9));
    }

    #[test]
    fn user_turns_never_match_the_announcement() {
        let history = vec![ChatTurn::user(cart_announcement(7))];
        assert_eq!(find_announced_cart_id(&history), None);
    }
}
