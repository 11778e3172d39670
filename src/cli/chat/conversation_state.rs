use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Fallback tag used whenever category parsing produces nothing.
pub const FALLBACK_CATEGORY: &str = "Furniture";

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Monotonic suffix so ids minted within the same millisecond stay unique.
fn next_seq() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// One conversation turn half. Immutable once created; ordering is append
/// order and the whole sequence is sent to the API on every call.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("msg-{}-{}", now.timestamp_millis(), next_seq()),
            role,
            content: content.into(),
            timestamp: now,
        }
    }
}

/// A product record parsed out of assistant text, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductDraft {
    pub title: String,
    pub price: String,
    pub description: String,
    pub categories: Vec<String>,
}

/// A fully-formed product suggestion card.
#[derive(Debug, Clone)]
pub struct ProductSuggestion {
    pub id: String,
    pub title: String,
    pub price: String,
    pub description: String,
    pub categories: Vec<String>,
}

impl ProductSuggestion {
    pub fn from_draft(draft: ProductDraft, index: usize) -> Self {
        Self {
            id: format!("product-{}-{}", Utc::now().timestamp_millis(), index),
            title: draft.title,
            price: draft.price,
            description: draft.description,
            categories: draft.categories,
        }
    }
}

/// Session-local conversation state: one instance per chat session, nothing
/// persisted. `is_typing` is true exactly while a request is outstanding and
/// gates new sends.
pub struct ConversationState {
    messages: Vec<Message>,
    products: Vec<ProductSuggestion>,
    is_typing: bool,
    api_key: String,
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            products: Vec::new(),
            is_typing: false,
            api_key: String::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn products(&self) -> &[ProductSuggestion] {
        &self.products
    }

    pub fn is_typing(&self) -> bool {
        self.is_typing
    }

    pub fn set_typing(&mut self, typing: bool) {
        self.is_typing = typing;
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn set_api_key(&mut self, key: impl Into<String>) {
        self.api_key = key.into();
    }

    pub fn add_user_message(&mut self, content: &str) {
        self.messages.push(Message::new(MessageRole::User, content));
    }

    pub fn add_assistant_message(&mut self, content: &str) {
        self.messages
            .push(Message::new(MessageRole::Assistant, content));
    }

    /// Replace the suggestion set wholesale, assigning fresh ids.
    pub fn replace_products(&mut self, drafts: Vec<ProductDraft>) {
        self.products = drafts
            .into_iter()
            .enumerate()
            .map(|(index, draft)| ProductSuggestion::from_draft(draft, index))
            .collect();
    }

    /// Clear messages and products but keep the API key.
    pub fn clear_conversation(&mut self) {
        self.messages.clear();
        self.products.clear();
        self.is_typing = false;
    }

    /// Full session reset: clearing the key also wipes the conversation.
    pub fn clear_api_key(&mut self) {
        self.api_key.clear();
        self.clear_conversation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_unique() {
        let a = Message::new(MessageRole::User, "hello");
        let b = Message::new(MessageRole::User, "hello");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn replace_products_is_wholesale() {
        let mut state = ConversationState::new();
        state.replace_products(vec![ProductDraft {
            title: "Oak Table".into(),
            price: "$299".into(),
            description: "A table".into(),
            categories: vec!["Oak".into()],
        }]);
        assert_eq!(state.products().len(), 1);

        state.replace_products(vec![
            ProductDraft {
                title: "Walnut Desk".into(),
                price: "$499".into(),
                description: "A desk".into(),
                categories: vec!["Walnut".into()],
            },
            ProductDraft {
                title: "Pine Shelf".into(),
                price: "$99".into(),
                description: "A shelf".into(),
                categories: vec!["Pine".into()],
            },
        ]);
        let titles: Vec<&str> = state.products().iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Walnut Desk", "Pine Shelf"]);
    }

    #[test]
    fn clearing_api_key_wipes_conversation() {
        let mut state = ConversationState::new();
        state.set_api_key("secret");
        state.add_user_message("hi");
        state.add_assistant_message("hello");
        state.clear_api_key();
        assert!(!state.has_api_key());
        assert!(state.messages().is_empty());
        assert!(state.products().is_empty());
        assert!(!state.is_typing());
    }
}
