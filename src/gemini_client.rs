use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::cli::chat::conversation_state::Message;

const GEMINI_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

const SYSTEM_PROMPT: &str = "\
You are Pity, a friendly, helpful, and knowledgeable furniture assistant.
Your task is to help users discover and refine furniture ideas through a text conversation.
Ask clarifying questions about their furniture needs, including style, type, size, material, color, room, and budget.
Once you have gathered enough details, generate 3 to 5 fictional furniture product suggestions that match their criteria.

Each product suggestion must include:
- Title: A plausible product name
- Price: A realistic price with a currency symbol
- Description: 1-2 sentences highlighting key features
- Categories/Tags: Relevant tags reflecting the criteria discussed

Be patient, inquisitive, clear, and focused on furniture details.
Always act as a furniture expert, but keep your responses conversational and friendly.
Do NOT generate or reference any images.";

const SUGGESTION_DIRECTIVE: &str = "\
Now is the time to generate product suggestions based on the conversation. \
Present 3 to 5 fictional furniture products that match the user's criteria. \
Format them clearly with Title, Price, Description and Categories/Tags.";

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("A Gemini API key is required")]
    MissingApiKey,

    #[error("Gemini API error: {message}")]
    Api { message: String },

    #[error("Could not reach the Gemini API: {0}")]
    Transport(#[from] reqwest::Error),
}

/// The assistant's reply for one turn. `text` is the first text part of the
/// first candidate; `raw` keeps the full response body for diagnostics.
#[derive(Debug)]
pub struct GeminiReply {
    pub text: String,
    pub raw: Value,
}

/// Seam between the orchestrator and the remote completion API, so the chat
/// flow can be exercised against a stub in tests.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn send_turn(
        &self,
        api_key: &str,
        history: &[Message],
        want_suggestions: bool,
    ) -> Result<GeminiReply, GeminiError>;
}

pub struct GeminiClient {
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CompletionBackend for GeminiClient {
    /// Issue exactly one `generateContent` call carrying the full history.
    /// No retry, no streaming, no timeout beyond the client default.
    async fn send_turn(
        &self,
        api_key: &str,
        history: &[Message],
        want_suggestions: bool,
    ) -> Result<GeminiReply, GeminiError> {
        if api_key.is_empty() {
            return Err(GeminiError::MissingApiKey);
        }

        let request_body = build_request_body(history, want_suggestions);
        debug!(
            "Sending request to Gemini API: {}",
            serde_json::to_string_pretty(&request_body).unwrap_or_default()
        );

        let response = self
            .client
            .post(GEMINI_API_URL)
            .header("x-goog-api-key", api_key)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("API request failed with response: {}", error_text);
            return Err(GeminiError::Api {
                message: extract_error_message(&error_text),
            });
        }

        let raw: Value = response.json().await?;
        debug!(
            "Received response from Gemini API: {}",
            serde_json::to_string_pretty(&raw).unwrap_or_default()
        );

        let text = extract_reply_text(&raw);
        Ok(GeminiReply { text, raw })
    }
}

/// Build the `generateContent` body: the system prompt as a leading user
/// part (with the product-block directive appended in suggestion mode),
/// then the conversation role-for-role.
fn build_request_body(history: &[Message], want_suggestions: bool) -> Value {
    let system_text = if want_suggestions {
        format!("{}\n\n{}", SYSTEM_PROMPT, SUGGESTION_DIRECTIVE)
    } else {
        SYSTEM_PROMPT.to_string()
    };

    let mut contents = vec![json!({
        "role": "user",
        "parts": [{ "text": system_text }]
    })];

    for message in history {
        contents.push(json!({
            "role": message.role.as_str(),
            "parts": [{ "text": message.content }]
        }));
    }

    json!({
        "contents": contents,
        "generationConfig": {
            "temperature": 0.7,
            "topK": 40,
            "topP": 0.95,
            "maxOutputTokens": 1024
        }
    })
}

/// First text part of the first candidate. A 200 response missing any of
/// the expected fields degrades to an empty reply rather than an error.
fn extract_reply_text(response: &Value) -> String {
    response
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Pull `error.message` out of a failure body when it is JSON, otherwise
/// fall back to a generic message.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| "Unknown error".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::chat::conversation_state::MessageRole;

    #[test]
    fn request_body_includes_directive_only_in_suggestion_mode() {
        let history = vec![Message::new(MessageRole::User, "I need a sofa")];

        let plain = build_request_body(&history, false);
        let plain_text = plain["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(!plain_text.contains("generate product suggestions"));

        let suggesting = build_request_body(&history, true);
        let suggesting_text = suggesting["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap();
        assert!(suggesting_text.contains("Title, Price, Description and Categories/Tags"));
    }

    #[test]
    fn request_body_maps_history_role_for_role() {
        let history = vec![
            Message::new(MessageRole::Assistant, "Hi there!"),
            Message::new(MessageRole::User, "I need a sofa"),
        ];
        let body = build_request_body(&history, false);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "assistant");
        assert_eq!(contents[1]["parts"][0]["text"], "Hi there!");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["text"], "I need a sofa");
    }

    #[test]
    fn reply_text_comes_from_first_candidate() {
        let response = json!({
            "candidates": [
                { "content": { "parts": [{ "text": "first" }, { "text": "second" }] } },
                { "content": { "parts": [{ "text": "other" }] } }
            ]
        });
        assert_eq!(extract_reply_text(&response), "first");
    }

    #[test]
    fn malformed_response_degrades_to_empty_text() {
        assert_eq!(extract_reply_text(&json!({})), "");
        assert_eq!(extract_reply_text(&json!({ "candidates": [] })), "");
        assert_eq!(
            extract_reply_text(&json!({ "candidates": [{ "content": {} }] })),
            ""
        );
    }

    #[test]
    fn error_message_parsed_from_body_when_present() {
        let body = r#"{"error":{"code":400,"message":"API key not valid"}}"#;
        assert_eq!(extract_error_message(body), "API key not valid");
        assert_eq!(extract_error_message("<html>nope</html>"), "Unknown error");
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_network_call() {
        let client = GeminiClient::new();
        let result = client.send_turn("", &[], false).await;
        assert!(matches!(result, Err(GeminiError::MissingApiKey)));
    }
}
