//! Google Gemini chat client.
//!
//! Talks to the `generateContent` endpoint of the Generative Language API.
//! The conversation history lives client-side in the handle and is replayed
//! with every request, which is how the upstream chat API works.

use super::{ChatClient, ChatHandle};
use crate::error::{ChatError, ChatResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini chat client.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Create a new client with the given API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create a client from the `GEMINI_API_KEY` or `GOOGLE_API_KEY`
    /// environment variable.
    pub fn from_env() -> ChatResult<Self> {
        std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map(Self::new)
            .map_err(|_| {
                ChatError::MissingKey("set GEMINI_API_KEY or GOOGLE_API_KEY".to_string())
            })
    }

    /// Override the API base URL (used by tests against a local server).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl ChatClient for GeminiClient {
    fn start_chat(&self, model_id: &str) -> ChatResult<Box<dyn ChatHandle>> {
        debug!(model = %model_id, "starting gemini chat");
        Ok(Box::new(GeminiChat {
            http: self.http.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model_id: model_id.to_string(),
            history: Vec::new(),
        }))
    }
}

/// One live Gemini conversation with client-side history.
struct GeminiChat {
    http: Client,
    api_key: String,
    base_url: String,
    model_id: String,
    history: Vec<Content>,
}

impl GeminiChat {
    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model_id, self.api_key
        )
    }
}

#[async_trait]
impl ChatHandle for GeminiChat {
    async fn send(&mut self, text: &str) -> ChatResult<String> {
        self.history.push(Content::user(text));

        let request = GenerateContentRequest {
            contents: self.history.clone(),
        };

        let result = async {
            let response = self.http.post(self.endpoint()).json(&request).send().await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ChatError::Api {
                    status: Some(status.as_u16()),
                    message: body,
                });
            }

            let parsed: GenerateContentResponse = response.json().await?;

            if let Some(err) = parsed.error {
                return Err(ChatError::Api {
                    status: err.code,
                    message: err.message,
                });
            }

            let reply = parsed
                .candidates
                .and_then(|c| c.into_iter().next())
                .map(|candidate| {
                    candidate
                        .content
                        .parts
                        .into_iter()
                        .filter_map(|p| p.text)
                        .collect::<Vec<_>>()
                        .join("")
                })
                .filter(|reply| !reply.is_empty())
                .ok_or_else(|| ChatError::EmptyResponse(self.model_id.clone()))?;

            Ok(reply)
        }
        .await;

        match result {
            Ok(reply) => {
                self.history.push(Content::model(&reply));
                Ok(reply)
            }
            Err(e) => {
                // A failed turn leaves no trace in the history.
                self.history.pop();
                Err(e)
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

impl Content {
    fn user(text: &str) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }

    fn model(text: &str) -> Self {
        Self {
            role: "model".to_string(),
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<u16>,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_chat_binds_model() {
        let client = GeminiClient::new("test-key").with_base_url("http://localhost:9999");
        let chat = client.start_chat("gemini-1.5-flash").unwrap();
        assert_eq!(chat.model_id(), "gemini-1.5-flash");
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "Hello "}, {"text": "there"}]}}
            ]
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let text: String = parsed
            .candidates
            .unwrap()
            .remove(0)
            .content
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        assert_eq!(text, "Hello there");
    }

    #[test]
    fn test_error_body_parsing() {
        let body = r#"{"error": {"code": 429, "message": "quota exceeded"}}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let err = parsed.error.unwrap();
        assert_eq!(err.code, Some(429));
        assert_eq!(err.message, "quota exceeded");
    }
}
