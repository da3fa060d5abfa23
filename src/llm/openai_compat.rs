use super::{prompt, CorrectionCandidate, CorrectionProvider, LlmError, Message};
use crate::fragment::{Finding, SourceFragment};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for OpenAI-compatible endpoints (llama.cpp server, LM Studio,
/// vLLM, or a hosted API).
pub struct OpenAiCompatClient {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    client: reqwest::blocking::Client,
}

// --- OpenAI-compatible API request/response types ---

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Serialize, Deserialize, Debug)]
struct ChatMessage {
    role: String,
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatMessage,
}

// --- Implementation ---

impl OpenAiCompatClient {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, deadline: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client: reqwest::blocking::Client::builder()
                .timeout(deadline)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|m| ChatMessage {
                role: m.role.to_string(),
                content: Some(m.content.clone()),
            })
            .collect()
    }
}

impl CorrectionProvider for OpenAiCompatClient {
    fn request_correction(
        &self,
        source: &SourceFragment,
        findings: &[Finding],
        context: &[Message],
    ) -> Result<CorrectionCandidate, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let messages = prompt::correction_messages(source, findings, context);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(&messages),
            stream: false,
        };

        let mut req_builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = req_builder.send().map_err(|e| {
            if e.is_timeout() {
                LlmError::DeadlineExceeded
            } else if e.is_connect() {
                LlmError::Connection(format!("Cannot connect to {}", self.base_url))
            } else {
                LlmError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LlmError::ModelNotFound(self.model.clone()));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LlmError::Request(
                "Unauthorized: check the configured api_key".to_string(),
            ));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Request(format!(
                "endpoint returned status {}: {}",
                status, body
            )));
        }

        let resp_body: ChatResponse = response
            .json()
            .map_err(|e| LlmError::Parse(format!("Failed to parse response: {}", e)))?;

        let content = resp_body
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| LlmError::Parse("response carries no message content".to_string()))?;

        prompt::parse_candidate(source, content, findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_messages() {
        let messages = vec![Message::system("sys"), Message::user("usr")];
        let converted = OpenAiCompatClient::convert_messages(&messages);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[0].content.as_deref(), Some("sys"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = OpenAiCompatClient::new(
            "http://localhost:8080/",
            "local-model",
            None,
            Duration::from_secs(5),
        );
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_connection_error_maps_to_llm_error() {
        let client = OpenAiCompatClient::new(
            "http://127.0.0.1:1",
            "local-model",
            None,
            Duration::from_secs(2),
        );
        let source = SourceFragment::new("print(1/0)");
        let result = client.request_correction(&source, &[], &[]);
        assert!(result.is_err());
    }
}
