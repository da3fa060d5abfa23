use super::{prompt, CorrectionCandidate, CorrectionProvider, LlmError, Message};
use crate::fragment::{Finding, SourceFragment};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct OllamaClient {
    pub base_url: String,
    pub model: String,
    client: reqwest::blocking::Client,
}

// --- Ollama API request/response types ---

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    format: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Deserialize, Debug)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

// --- Implementation ---

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, deadline: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::blocking::Client::builder()
                .timeout(deadline)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    fn convert_messages(messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|m| OllamaMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect()
    }
}

impl CorrectionProvider for OllamaClient {
    fn request_correction(
        &self,
        source: &SourceFragment,
        findings: &[Finding],
        context: &[Message],
    ) -> Result<CorrectionCandidate, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let messages = prompt::correction_messages(source, findings, context);

        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(&messages),
            stream: false,
            // constrain the reply to the JSON candidate contract
            format: "json".to_string(),
        };

        let response = self.client.post(&url).json(&request).send().map_err(|e| {
            if e.is_timeout() {
                LlmError::DeadlineExceeded
            } else if e.is_connect() {
                LlmError::Connection(
                    "Cannot connect to Ollama. Is it running? Start with: ollama serve"
                        .to_string(),
                )
            } else {
                LlmError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LlmError::ModelNotFound(format!(
                "Model '{}' not found. Pull it with: ollama pull {}",
                self.model, self.model
            )));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Request(format!(
                "Ollama returned status {}: {}",
                status, body
            )));
        }

        let resp_body: OllamaChatResponse = response
            .json()
            .map_err(|e| LlmError::Parse(format!("Failed to parse Ollama response: {}", e)))?;

        prompt::parse_candidate(source, &resp_body.message.content, findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_messages_roles() {
        let messages = vec![
            Message::system("be helpful"),
            Message::user("fix it"),
            Message::assistant("done"),
        ];
        let converted = OllamaClient::convert_messages(&messages);
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].role, "user");
        assert_eq!(converted[2].role, "assistant");
        assert_eq!(converted[1].content, "fix it");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = OllamaClient::new("http://localhost:11434/", "qwen2.5:7b", Duration::from_secs(5));
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_connection_error_maps_to_llm_error() {
        let client = OllamaClient::new("http://127.0.0.1:1", "qwen2.5:7b", Duration::from_secs(2));
        let source = SourceFragment::new("print(1/0)");
        let result = client.request_correction(&source, &[], &[]);
        assert!(result.is_err());
    }
}
